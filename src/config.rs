use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveTime;

use crate::model::Schedule;

/// Server settings, read once at start-up from `SLOTGRID_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub schedule: Schedule,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let defaults = Schedule::default();

        let schedule = Schedule {
            work_start: time_var(&lookup, "SLOTGRID_WORK_START")?.unwrap_or(defaults.work_start),
            work_end: time_var(&lookup, "SLOTGRID_WORK_END")?.unwrap_or(defaults.work_end),
            step_minutes: parsed(&lookup, "SLOTGRID_SLOT_MINUTES").unwrap_or(defaults.step_minutes),
            lead_time_minutes: parsed(&lookup, "SLOTGRID_LEAD_TIME_MINUTES")
                .unwrap_or(defaults.lead_time_minutes),
        };
        schedule.validate()?;

        Ok(Self {
            bind: lookup("SLOTGRID_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SLOTGRID_PORT").unwrap_or(5433),
            data_dir: PathBuf::from(lookup("SLOTGRID_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("SLOTGRID_PASSWORD").unwrap_or_else(|| "slotgrid".into()),
            max_connections: parsed(&lookup, "SLOTGRID_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&lookup, "SLOTGRID_COMPACT_THRESHOLD").unwrap_or(1000),
            tls_cert: lookup("SLOTGRID_TLS_CERT"),
            tls_key: lookup("SLOTGRID_TLS_KEY"),
            metrics_port: parsed(&lookup, "SLOTGRID_METRICS_PORT"),
            schedule,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.parse().ok())
}

fn time_var(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<NaiveTime>, String> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Some)
            .map_err(|e| format!("{key}={raw}: expected HH:MM ({e})")),
    }
}
