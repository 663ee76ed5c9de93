use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::rules::validate_staff_id;
use super::{Engine, EngineError, ValidationError};

/// Cells of `date` that can be added without touching any existing record.
///
/// Closed days plan nothing. A cell overlapping a row of either status is
/// skipped, so running the plan again after applying it yields nothing.
pub fn plan_grid(st: &StaffState, date: NaiveDate, schedule: &Schedule) -> Vec<Span> {
    if !schedule.is_open(date) {
        return Vec::new();
    }
    schedule
        .cells(date)
        .into_iter()
        .filter(|cell| st.overlapping(cell).next().is_none())
        .collect()
}

impl Engine {
    /// Make sure the standard grid exists for one staff member on one day.
    /// Returns how many Free cells were created; zero when already complete.
    pub async fn ensure_daily_grid(
        &self,
        staff_id: i64,
        date: NaiveDate,
    ) -> Result<usize, EngineError> {
        let staff_id = validate_staff_id(staff_id)?;
        let st = self
            .get_staff_state(staff_id)
            .ok_or(ValidationError::UnknownStaff(staff_id))?;

        {
            let guard = st.read().await;
            if !guard.staff.active {
                return Err(ValidationError::UnknownStaff(staff_id).into());
            }
            if plan_grid(&guard, date, &self.schedule).is_empty() {
                return Ok(0);
            }
        }

        // Another generator or a booking may have run in between; plan again
        // under the write lock.
        let _gate = self.commit_gate.read().await;
        let mut guard = st.write().await;
        let cells = plan_grid(&guard, date, &self.schedule);
        if cells.is_empty() {
            return Ok(0);
        }
        if guard.slots.len() + cells.len() > MAX_SLOTS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many slots on staff calendar"));
        }

        let first = self.allocate_slot_ids(cells.len());
        let slots: Vec<(SlotId, Span)> = cells
            .into_iter()
            .enumerate()
            .map(|(i, span)| (first + i as SlotId, span))
            .collect();
        let created = slots.len();
        let event = Event::SlotsGenerated { staff_id, slots };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(crate::observability::GRID_SLOTS_CREATED_TOTAL).increment(created as u64);
        tracing::debug!("generated {created} cells for staff {staff_id} on {date}");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn staff() -> StaffState {
        StaffState::new(Staff {
            id: 1,
            name: "Bella".into(),
            skills: None,
            color: None,
            active: true,
        })
    }

    fn apply(st: &mut StaffState, spans: &[Span]) {
        let base = st.slots.len() as SlotId;
        for (i, span) in spans.iter().enumerate() {
            st.insert_slot(Slot::free(base + i as SlotId + 1, 1, *span));
        }
    }

    #[test]
    fn empty_calendar_gets_full_day() {
        let plan = plan_grid(&staff(), monday(), &Schedule::default());
        assert_eq!(plan.len(), 16);
    }

    #[test]
    fn second_plan_is_empty() {
        let schedule = Schedule::default();
        let mut st = staff();
        let plan = plan_grid(&st, monday(), &schedule);
        apply(&mut st, &plan);
        assert!(plan_grid(&st, monday(), &schedule).is_empty());
    }

    #[test]
    fn weekend_plans_nothing() {
        let saturday = NaiveDate::from_ymd_opt(2030, 1, 5).unwrap();
        assert!(plan_grid(&staff(), saturday, &Schedule::default()).is_empty());
    }

    #[test]
    fn existing_booking_is_not_overlapped() {
        let schedule = Schedule::default();
        let mut st = staff();
        // A booked 10:00-11:00 row claimed before the grid existed
        let at = |h, m| monday().and_hms_opt(h, m, 0).unwrap();
        let mut booked = Slot::free(99, 1, Span::new(at(10, 0), at(11, 0)));
        booked.status = SlotStatus::Booked;
        st.insert_slot(booked);

        let plan = plan_grid(&st, monday(), &schedule);
        assert_eq!(plan.len(), 14);
        assert!(plan.iter().all(|c| !c.overlaps(&Span::new(at(10, 0), at(11, 0)))));
    }

    #[test]
    fn partial_day_is_completed() {
        let schedule = Schedule::default();
        let mut st = staff();
        let plan = plan_grid(&st, monday(), &schedule);
        apply(&mut st, &plan[..5]);
        let rest = plan_grid(&st, monday(), &schedule);
        assert_eq!(rest.len(), 11);
        assert_eq!(rest[0], plan[5]);
    }
}
