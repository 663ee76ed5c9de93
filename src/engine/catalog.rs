use std::sync::Arc;

use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::rules::require_len;
use super::{Engine, EngineError, ValidationError};

fn check_optional(value: &Option<String>, max: usize, field: &'static str) -> Result<(), EngineError> {
    if let Some(v) = value
        && v.chars().count() > max
    {
        return Err(ValidationError::FieldTooLong(field).into());
    }
    Ok(())
}

impl Engine {
    pub async fn create_staff(&self, staff: Staff) -> Result<(), EngineError> {
        if staff.id <= 0 {
            return Err(ValidationError::InvalidStaff(staff.id).into());
        }
        require_len(&staff.name, MAX_STAFF_NAME_LEN, "name")?;
        check_optional(&staff.skills, MAX_SKILLS_LEN, "skills")?;
        check_optional(&staff.color, MAX_COLOR_LEN, "color")?;
        if self.staff.len() >= MAX_STAFF_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        let _gate = self.commit_gate.read().await;
        if self.staff.contains_key(&staff.id) {
            return Err(EngineError::AlreadyExists("staff", staff.id));
        }

        let event = Event::StaffCreated(staff.clone());
        self.wal_append(&event).await?;
        tracing::info!("staff {} created: {}", staff.id, staff.name);
        self.staff
            .insert(staff.id, Arc::new(RwLock::new(StaffState::new(staff))));
        Ok(())
    }

    pub async fn create_service(&self, service: Service) -> Result<(), EngineError> {
        if service.id <= 0 {
            return Err(ValidationError::InvalidService(service.id).into());
        }
        require_len(&service.name, MAX_SERVICE_NAME_LEN, "name")?;
        if service.duration_min == 0 || service.duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(ValidationError::InvalidField(
                "duration_min",
                format!("must be between 1 and {MAX_SERVICE_DURATION_MIN}"),
            )
            .into());
        }
        if service.price_cents < 0 {
            return Err(ValidationError::InvalidField("price", "must not be negative".into()).into());
        }
        if !self.staff.contains_key(&service.staff_id) {
            return Err(EngineError::NotFound("staff", service.staff_id));
        }
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let _gate = self.commit_gate.read().await;
        if self.services.contains_key(&service.id) {
            return Err(EngineError::AlreadyExists("service", service.id));
        }

        let event = Event::ServiceCreated(service.clone());
        self.wal_append(&event).await?;
        self.services.insert(service.id, service);
        Ok(())
    }

    /// Active staff, ordered by name.
    pub async fn list_staff(&self) -> Vec<Staff> {
        let states: Vec<_> = self.staff.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for st in states {
            let guard = st.read().await;
            if guard.staff.active {
                out.push(guard.staff.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Active services, optionally for one staff member, ordered by name.
    pub fn list_services(&self, staff_id: Option<StaffId>) -> Vec<Service> {
        let mut out: Vec<Service> = self
            .services
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.active && staff_id.is_none_or(|id| s.staff_id == id))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }
}
