use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::rules::*;
use super::{
    ConflictKind, Engine, EngineError, SharedStaffState, ValidationError, apply_to_staff,
};

/// Ids of the contiguous Free cells that start exactly at `start` and reach
/// at least `end`, plus the end of the last one. Rows keep the length they
/// were generated with, so the walk follows row ends rather than the
/// configured step. Any gap fails the whole chain.
pub(super) fn candidate_chain(
    st: &StaffState,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<(Vec<SlotId>, NaiveDateTime), ConflictKind> {
    let mut ids = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let slot = st
            .free_slot_at(cursor)
            .ok_or(ConflictKind::SlotUnavailable)?;
        if slot.span.end <= cursor || ids.len() >= MAX_SLOTS_PER_BOOKING {
            return Err(ConflictKind::SlotUnavailable);
        }
        ids.push(slot.id);
        cursor = slot.span.end;
    }
    Ok((ids, cursor))
}

/// What a commit claims, as sampled before taking the write lock.
struct Claim {
    staff_id: StaffId,
    service: Service,
    slot_ids: Vec<SlotId>,
    /// Union of the claimed cells.
    covered: Span,
    start: NaiveDateTime,
    contact: ContactDetails,
    source: BookingSource,
}

fn record_outcome(source: BookingSource, result: &Result<BookingConfirmation, EngineError>) {
    let source_label = match source {
        BookingSource::Online => "online",
        BookingSource::Staff => "staff",
    };
    let outcome = match result {
        Ok(b) => {
            tracing::info!(
                "booked {} for staff {} at {} ({} cells)",
                b.booking_id,
                b.staff_id,
                b.start,
                b.slot_ids.len()
            );
            "booked"
        }
        Err(e) if e.is_validation() => {
            tracing::debug!("{source_label} booking rejected: {e}");
            "validation"
        }
        Err(e) if e.is_conflict() => {
            tracing::debug!("{source_label} booking lost: {e}");
            "conflict"
        }
        Err(e) => {
            tracing::warn!("{source_label} booking failed: {e}");
            "error"
        }
    };
    metrics::counter!(crate::observability::BOOKINGS_TOTAL, "source" => source_label, "outcome" => outcome)
        .increment(1);
}

impl Engine {
    /// Claim the contiguous run of cells a service needs, starting at an
    /// exact time. All or nothing.
    pub async fn book_by_start(
        &self,
        req: BookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let result = self.try_book_by_start(req).await;
        record_outcome(BookingSource::Online, &result);
        result
    }

    /// Book explicitly chosen grid cells on behalf of a client.
    pub async fn book_slots(
        &self,
        req: SlotBookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let result = self.try_book_slots(req).await;
        record_outcome(BookingSource::Staff, &result);
        result
    }

    fn active_service(&self, service_id: i64) -> Result<Service, ValidationError> {
        match self.get_service(service_id) {
            Some(s) if s.active => Ok(s),
            _ => Err(ValidationError::InvalidService(service_id)),
        }
    }

    async fn active_staff(&self, staff_id: StaffId) -> Result<SharedStaffState, ValidationError> {
        let st = self
            .get_staff_state(staff_id)
            .ok_or(ValidationError::UnknownStaff(staff_id))?;
        if !st.read().await.staff.active {
            return Err(ValidationError::UnknownStaff(staff_id));
        }
        Ok(st)
    }

    async fn try_book_by_start(
        &self,
        req: BookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let staff_id = validate_staff_id(req.staff_id)?;
        let date = parse_date(&req.date)?;
        let time = parse_time(&req.start_time)?;
        let service = self.active_service(req.service_id)?;
        if service.staff_id != staff_id {
            return Err(ValidationError::ServiceStaffMismatch {
                service_id: service.id,
                staff_id,
            }
            .into());
        }
        let contact = validate_contact(req.contact)?;
        let st = self.active_staff(staff_id).await?;

        let start = date.and_time(time);
        let span = Span::new(start, start + service.duration());
        check_within_hours(&span, date, &self.schedule)?;
        check_lead_time(start, self.now(), &self.schedule)?;

        self.ensure_daily_grid(staff_id, date).await?;

        let (slot_ids, covered_end) = {
            let guard = st.read().await;
            candidate_chain(&guard, start, span.end)?
        };

        let claim = Claim {
            staff_id,
            service,
            slot_ids,
            covered: Span::new(start, covered_end),
            start,
            contact,
            source: BookingSource::Online,
        };
        self.commit(&st, claim).await
    }

    async fn try_book_slots(
        &self,
        req: SlotBookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let mut ids = req.slot_ids;
        if ids.is_empty() {
            return Err(
                ValidationError::InvalidField("appointment_ids", "at least one required".into())
                    .into(),
            );
        }
        if ids.len() > MAX_SLOTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many appointments in one booking"));
        }
        ids.sort_unstable();
        ids.dedup();

        let service = self.active_service(req.service_id)?;
        let staff_id = service.staff_id;
        let contact = validate_contact(req.contact)?;
        let st = self.active_staff(staff_id).await?;

        let mut spans = Vec::with_capacity(ids.len());
        {
            let guard = st.read().await;
            for &id in &ids {
                match self.owner_of_slot(id) {
                    Some(owner) if owner == staff_id => {}
                    Some(_) => {
                        return Err(ValidationError::InvalidField(
                            "appointment_ids",
                            format!("{id} belongs to another staff member"),
                        )
                        .into());
                    }
                    None => return Err(ConflictKind::SlotUnavailable.into()),
                }
                match guard.slot(id) {
                    Some(slot) if slot.is_free() => spans.push((slot.span, id)),
                    _ => return Err(ConflictKind::SlotUnavailable.into()),
                }
            }
        }

        spans.sort_by_key(|(span, _)| span.start);
        if spans.windows(2).any(|w| w[0].0.end != w[1].0.start) {
            return Err(ValidationError::NotContiguous.into());
        }
        let (Some((first, _)), Some((last, _))) = (spans.first(), spans.last()) else {
            return Err(ConflictKind::SlotUnavailable.into());
        };
        let covered = Span::new(first.start, last.end);

        let needed = self.schedule.cells_needed(service.duration());
        if spans.len() < needed || covered.duration() < service.duration() {
            return Err(ValidationError::TooShort {
                needed_min: i64::from(service.duration_min),
                covered_min: covered.duration().num_minutes(),
            }
            .into());
        }
        if spans.len() > needed {
            return Err(ValidationError::InvalidField(
                "appointment_ids",
                format!("service needs {needed} appointments, got {}", spans.len()),
            )
            .into());
        }

        let start = covered.start;
        let date = start.date();
        let booked = Span::new(start, start + service.duration());
        check_within_hours(&booked, date, &self.schedule)?;
        check_lead_time(start, self.now(), &self.schedule)?;

        let claim = Claim {
            staff_id,
            service,
            slot_ids: spans.into_iter().map(|(_, id)| id).collect(),
            covered,
            start,
            contact,
            source: BookingSource::Staff,
        };
        self.commit(&st, claim).await
    }

    /// Re-fetch every claimed cell by id under the write lock and flip them
    /// all to Booked in a single WAL record, or write nothing.
    async fn commit(
        &self,
        st: &SharedStaffState,
        claim: Claim,
    ) -> Result<BookingConfirmation, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut guard = st.write().await;
        for &id in &claim.slot_ids {
            match guard.slot(id) {
                Some(slot) if slot.is_free() => {}
                _ => return Err(ConflictKind::SlotTaken(id).into()),
            }
        }
        if guard.has_booked_overlap(&claim.covered) {
            return Err(ConflictKind::SlotUnavailable.into());
        }

        // Lock order: commit gate, staff calendar, client book.
        let mut clients = self.clients.lock().await;
        let client = clients.resolve(&claim.contact);
        let booking_id = Ulid::new();
        let event = Event::SlotsBooked {
            booking_id,
            staff_id: claim.staff_id,
            slot_ids: claim.slot_ids.clone(),
            service_id: claim.service.id,
            client: client.clone(),
            notes: clamp_note(claim.contact.compose_note(claim.source)),
        };
        self.wal_append(&event).await?;
        apply_to_staff(&mut guard, &event, &self.slot_owner);
        clients.apply(&client);

        if matches!(client, ClientWrite::Created(_)) {
            metrics::counter!(crate::observability::CLIENTS_CREATED_TOTAL).increment(1);
        }

        Ok(BookingConfirmation {
            booking_id,
            staff_id: claim.staff_id,
            client_id: client.client_id(),
            slot_ids: claim.slot_ids,
            start: claim.start,
            end: claim.start + claim.service.duration(),
        })
    }
}
