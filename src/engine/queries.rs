use crate::model::*;

use super::rules::{parse_date, validate_staff_id};
use super::{Engine, EngineError, ValidationError};

impl Engine {
    /// Every row (Free and Booked) starting on `date`, ordered by start.
    pub async fn list_appointments(
        &self,
        staff_id: i64,
        date: &str,
    ) -> Result<Vec<Slot>, EngineError> {
        let staff_id = validate_staff_id(staff_id)?;
        let date = parse_date(date)?;
        let st = self
            .get_staff_state(staff_id)
            .ok_or(ValidationError::UnknownStaff(staff_id))?;
        let day = Span::day(date);
        let guard = st.read().await;
        Ok(guard
            .overlapping(&day)
            .filter(|s| s.span.start >= day.start)
            .cloned()
            .collect())
    }

    pub async fn list_clients(&self) -> Vec<Client> {
        self.clients.lock().await.iter().cloned().collect()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let states: Vec<_> = self.staff.iter().map(|e| e.value().clone()).collect();
        let mut appointments = 0;
        for st in &states {
            appointments += st.read().await.slots.len();
        }
        Diagnostics {
            staff: states.len(),
            services: self.services.len(),
            appointments,
            clients: self.clients.lock().await.len(),
        }
    }
}
