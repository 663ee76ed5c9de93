mod availability;
mod booking;
mod catalog;
mod clients;
mod error;
mod grid;
mod queries;
mod rules;
mod snapshot;

pub use availability::free_slots;
pub use clients::ClientBook;
pub use error::{ConflictKind, EngineError, ValidationError};
pub use grid::plan_grid;
pub use rules::{parse_date, parse_time};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::wal::Wal;

pub type SharedStaffState = Arc<RwLock<StaffState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then flushes the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have first; the command runs after.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        flush_and_respond(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't bleed
    // into the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            flush_and_respond(wal, &mut vec![(event, response)]);
        }
    }
}

/// Scheduling engine for one tenant: staff calendars, services and clients.
pub struct Engine {
    pub(super) staff: DashMap<StaffId, SharedStaffState>,
    pub(super) services: DashMap<ServiceId, Service>,
    pub(super) clients: Mutex<ClientBook>,
    /// Reverse lookup: slot id → owning staff id
    pub(super) slot_owner: DashMap<SlotId, StaffId>,
    next_slot_id: AtomicI64,
    pub(super) schedule: Schedule,
    clock: Arc<dyn Clock>,
    /// Shared by every WAL append together with its in-memory apply,
    /// exclusive while compaction snapshots. Taken before any staff lock.
    pub(super) commit_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply the slot half of an event to a staff calendar (caller holds the lock).
fn apply_to_staff(st: &mut StaffState, event: &Event, slot_owner: &DashMap<SlotId, StaffId>) {
    match event {
        Event::SlotsGenerated { staff_id, slots } => {
            for (id, span) in slots {
                st.insert_slot(Slot::free(*id, *staff_id, *span));
                slot_owner.insert(*id, *staff_id);
            }
        }
        Event::SlotsBooked {
            booking_id,
            slot_ids,
            service_id,
            client,
            notes,
            ..
        } => {
            let client_id = client.client_id();
            for id in slot_ids {
                if let Some(slot) = st.slot_mut(*id) {
                    slot.status = SlotStatus::Booked;
                    slot.service_id = Some(*service_id);
                    slot.client_id = Some(client_id);
                    slot.booking_id = Some(*booking_id);
                    slot.notes = Some(notes.clone());
                }
            }
        }
        // Catalog and client events don't touch slot rows
        Event::StaffCreated(_) | Event::ServiceCreated(_) | Event::ClientRestored(_) => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, schedule: Schedule) -> io::Result<Self> {
        Self::with_clock(wal_path, schedule, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        schedule: Schedule,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let staff: DashMap<StaffId, SharedStaffState> = DashMap::new();
        let services = DashMap::new();
        let slot_owner = DashMap::new();
        let mut book = ClientBook::new();
        let mut max_slot_id: SlotId = 0;

        // Replay: we're the sole owner of these Arcs, so try_write always
        // succeeds. Never block here; this may run inside an async context.
        for event in &events {
            match event {
                Event::StaffCreated(s) => {
                    staff.insert(s.id, Arc::new(RwLock::new(StaffState::new(s.clone()))));
                }
                Event::ServiceCreated(s) => {
                    services.insert(s.id, s.clone());
                }
                Event::ClientRestored(c) => book.restore(c.clone()),
                Event::SlotsGenerated { staff_id, .. } | Event::SlotsBooked { staff_id, .. } => {
                    let Some(st) = staff.get(staff_id).map(|e| e.value().clone()) else {
                        tracing::warn!("replay: skipping event for unknown staff {staff_id}");
                        continue;
                    };
                    let mut guard = st
                        .try_write()
                        .map_err(|_| io::Error::other("replay: contended staff state"))?;
                    apply_to_staff(&mut guard, event, &slot_owner);
                    match event {
                        Event::SlotsGenerated { slots, .. } => {
                            max_slot_id = slots.iter().map(|(id, _)| *id).fold(max_slot_id, i64::max);
                        }
                        Event::SlotsBooked { client, .. } => book.apply(client),
                        _ => {}
                    }
                }
            }
        }

        Ok(Self {
            staff,
            services,
            clients: Mutex::new(book),
            slot_owner,
            next_slot_id: AtomicI64::new(max_slot_id + 1),
            schedule,
            clock,
            commit_gate: RwLock::new(()),
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply to the calendar the caller holds locked.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut StaffState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_staff(st, event, &self.slot_owner);
        Ok(())
    }

    /// Reserve `n` consecutive slot ids and return the first.
    pub(super) fn allocate_slot_ids(&self, n: usize) -> SlotId {
        self.next_slot_id.fetch_add(n as i64, Ordering::Relaxed)
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn get_staff_state(&self, id: StaffId) -> Option<SharedStaffState> {
        self.staff.get(&id).map(|e| e.value().clone())
    }

    pub fn get_service(&self, id: ServiceId) -> Option<Service> {
        self.services.get(&id).map(|e| e.value().clone())
    }

    pub fn owner_of_slot(&self, id: SlotId) -> Option<StaffId> {
        self.slot_owner.get(&id).map(|e| *e.value())
    }
}
