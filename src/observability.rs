use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotgrid_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotgrid_query_duration_seconds";

// ── Scheduling metrics ──────────────────────────────────────────

/// Counter: booking attempts. Labels: source (online, staff), outcome
/// (booked, validation, conflict, error).
pub const BOOKINGS_TOTAL: &str = "slotgrid_bookings_total";

/// Counter: Free grid cells materialized by the generator.
pub const GRID_SLOTS_CREATED_TOTAL: &str = "slotgrid_grid_slots_created_total";

/// Counter: clients created by booking upserts.
pub const CLIENTS_CREATED_TOTAL: &str = "slotgrid_clients_created_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotgrid_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotgrid_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotgrid_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotgrid_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotgrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotgrid_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotgrid_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertStaff(_) => "insert_staff",
        Command::InsertService(_) => "insert_service",
        Command::GenerateGrid { .. } => "generate_grid",
        Command::InsertBooking(_) => "insert_booking",
        Command::InsertSlotBooking(_) => "insert_slot_booking",
        Command::SelectStaff => "select_staff",
        Command::SelectServices { .. } => "select_services",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectClients => "select_clients",
        Command::SelectDiagnostics => "select_diagnostics",
    }
}
