use chrono::NaiveDateTime;

use crate::model::*;

use super::rules::{parse_date, validate_staff_id};
use super::{Engine, EngineError, ValidationError};

/// Bookable cells of one day, ascending by start.
///
/// Reads Free rows inside working hours and drops any that overlap a Booked
/// row of the same staff member. Closed days and days before `now` yield
/// nothing; on the current day a cell must start at or after `now + lead time`.
pub fn free_slots(
    st: &StaffState,
    date: chrono::NaiveDate,
    schedule: &Schedule,
    now: NaiveDateTime,
) -> Vec<FreeSlot> {
    if !schedule.is_open(date) || date < now.date() {
        return Vec::new();
    }
    let cutoff: Option<NaiveDateTime> = (date == now.date()).then(|| now + schedule.lead_time());
    let hours = schedule.working_span(date);

    st.overlapping(&hours)
        .filter(|s| s.is_free())
        .filter(|s| s.span.start >= hours.start && s.span.end <= hours.end)
        .filter(|s| cutoff.is_none_or(|c| s.span.start >= c))
        .filter(|s| !st.has_booked_overlap(&s.span))
        .map(|s| FreeSlot {
            appointment_id: s.id,
            start: s.span.start,
            end: s.span.end,
        })
        .collect()
}

impl Engine {
    /// Availability for one staff member on one day. Materializes the grid
    /// first when some cell of the day can still be booked.
    pub async fn get_free_windows(
        &self,
        staff_id: i64,
        date: &str,
    ) -> Result<Vec<FreeSlot>, EngineError> {
        let staff_id = validate_staff_id(staff_id)?;
        let date = parse_date(date)?;
        let st = self
            .get_staff_state(staff_id)
            .ok_or(ValidationError::UnknownStaff(staff_id))?;
        if !st.read().await.staff.active {
            return Err(ValidationError::UnknownStaff(staff_id).into());
        }

        let now = self.now();
        if !self.schedule.is_open(date)
            || date < now.date()
            || now + self.schedule.lead_time() >= self.schedule.working_span(date).end
        {
            return Ok(Vec::new());
        }
        self.ensure_daily_grid(staff_id, date).await?;

        let guard = st.read().await;
        Ok(free_slots(&guard, date, &self.schedule, now))
    }
}
