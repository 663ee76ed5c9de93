use crate::model::SlotId;

/// Malformed or out-of-domain input. Nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidStaff(i64),
    UnknownStaff(i64),
    InvalidDate(String),
    InvalidTime(String),
    InvalidService(i64),
    ServiceStaffMismatch { service_id: i64, staff_id: i64 },
    /// Closed day, or the booking starts before opening / ends after closing.
    OutOfHours,
    TooSoonOrPast,
    NotContiguous,
    TooShort { needed_min: i64, covered_min: i64 },
    FieldTooLong(&'static str),
    InvalidField(&'static str, String),
}

/// Lost (or could never win) the race for a slot. Nothing was written; retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// A required cell is missing or not Free at lookup time.
    SlotUnavailable,
    /// A cell changed status between lookup and commit.
    SlotTaken(SlotId),
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    Conflict(ConflictKind),
    NotFound(&'static str, i64),
    AlreadyExists(&'static str, i64),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<ConflictKind> for EngineError {
    fn from(c: ConflictKind) -> Self {
        EngineError::Conflict(c)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidStaff(id) => write!(f, "invalid staff id: {id}"),
            ValidationError::UnknownStaff(id) => write!(f, "no active staff member with id {id}"),
            ValidationError::InvalidDate(raw) => {
                write!(f, "invalid date '{raw}', expected yyyy-MM-dd")
            }
            ValidationError::InvalidTime(raw) => write!(f, "invalid time '{raw}', expected HH:mm"),
            ValidationError::InvalidService(id) => write!(f, "invalid service: {id}"),
            ValidationError::ServiceStaffMismatch {
                service_id,
                staff_id,
            } => write!(
                f,
                "service {service_id} does not belong to staff member {staff_id}"
            ),
            ValidationError::OutOfHours => write!(f, "outside working hours"),
            ValidationError::TooSoonOrPast => {
                write!(f, "start time is in the past or inside the lead time")
            }
            ValidationError::NotContiguous => write!(f, "appointments are not contiguous"),
            ValidationError::TooShort {
                needed_min,
                covered_min,
            } => write!(
                f,
                "appointments cover {covered_min} min, service needs {needed_min} min"
            ),
            ValidationError::FieldTooLong(field) => write!(f, "{field} too long"),
            ValidationError::InvalidField(field, why) => write!(f, "invalid {field}: {why}"),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "validation failed: {e}"),
            EngineError::Conflict(ConflictKind::SlotUnavailable) => {
                write!(f, "conflict: slot unavailable")
            }
            EngineError::Conflict(ConflictKind::SlotTaken(id)) => {
                write!(f, "conflict: slot {id} just became unavailable")
            }
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::AlreadyExists(what, id) => write!(f, "{what} already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl std::error::Error for EngineError {}
