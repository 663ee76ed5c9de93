use std::collections::BTreeMap;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Grid and booking events that rebuild one staff calendar.
fn calendar_events(st: &StaffState, events: &mut Vec<Event>) {
    if st.slots.is_empty() {
        return;
    }
    events.push(Event::SlotsGenerated {
        staff_id: st.id(),
        slots: st.slots.iter().map(|s| (s.id, s.span)).collect(),
    });

    let mut bookings: BTreeMap<Ulid, Vec<&Slot>> = BTreeMap::new();
    for slot in st.slots.iter().filter(|s| s.is_booked()) {
        if let Some(bid) = slot.booking_id {
            bookings.entry(bid).or_default().push(slot);
        }
    }
    for (booking_id, slots) in bookings {
        let first = slots[0];
        let (Some(service_id), Some(client_id)) = (first.service_id, first.client_id) else {
            continue;
        };
        events.push(Event::SlotsBooked {
            booking_id,
            staff_id: st.id(),
            slot_ids: slots.iter().map(|s| s.id).collect(),
            service_id,
            client: ClientWrite::Existing(client_id),
            notes: first.notes.clone().unwrap_or_default(),
        });
    }
}

impl Engine {
    /// Rewrite the WAL as the shortest event stream producing the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No append may land between the snapshot and the file swap.
        let _gate = self.commit_gate.write().await;

        let mut ids: Vec<StaffId> = self.staff.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        let mut calendars = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(st) = self.get_staff_state(id) {
                calendars.push(st.read().await.clone());
            }
        }

        // Catalog and clients first so bookings replay onto known records.
        let mut events: Vec<Event> = calendars
            .iter()
            .map(|st| Event::StaffCreated(st.staff.clone()))
            .collect();
        let mut services: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(Event::ServiceCreated));
        events.extend(
            self.clients
                .lock()
                .await
                .iter()
                .cloned()
                .map(Event::ClientRestored),
        );
        for st in &calendars {
            calendar_events(st, &mut events);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
