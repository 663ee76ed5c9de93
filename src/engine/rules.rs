use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::limits::*;
use crate::model::*;

use super::{EngineError, ValidationError};

pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

/// Accepts `HH:mm` and `HH:mm:ss`.
pub fn parse_time(raw: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTime(raw.to_string()))
}

pub(crate) fn validate_staff_id(id: i64) -> Result<StaffId, ValidationError> {
    if id <= 0 {
        return Err(ValidationError::InvalidStaff(id));
    }
    Ok(id)
}

/// The whole booking must sit inside the working day of an open day.
pub(crate) fn check_within_hours(
    span: &Span,
    date: NaiveDate,
    schedule: &Schedule,
) -> Result<(), ValidationError> {
    if !schedule.is_open(date) {
        return Err(ValidationError::OutOfHours);
    }
    let hours = schedule.working_span(date);
    if span.start < hours.start || span.end > hours.end {
        return Err(ValidationError::OutOfHours);
    }
    Ok(())
}

/// Reject starts earlier than `now + lead time`; this also rejects the past.
pub(crate) fn check_lead_time(
    start: NaiveDateTime,
    now: NaiveDateTime,
    schedule: &Schedule,
) -> Result<(), ValidationError> {
    if start < now + schedule.lead_time() {
        return Err(ValidationError::TooSoonOrPast);
    }
    Ok(())
}

fn check_len(value: &Option<String>, max: usize, field: &'static str) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.chars().count() > max => Err(ValidationError::FieldTooLong(field)),
        _ => Ok(()),
    }
}

/// Normalize a submission and bound every field.
pub(crate) fn validate_contact(contact: ContactDetails) -> Result<ContactDetails, ValidationError> {
    let contact = contact.normalized();
    check_len(&contact.full_name, MAX_CLIENT_NAME_LEN, "full_name")?;
    check_len(&contact.email, MAX_EMAIL_LEN, "email")?;
    check_len(&contact.phone, MAX_PHONE_LEN, "phone")?;
    check_len(&contact.notes, MAX_REQUEST_NOTES_LEN, "notes")?;
    if let Some(email) = &contact.email
        && !email.contains('@')
    {
        return Err(ValidationError::InvalidField("email", email.clone()));
    }
    Ok(contact)
}

/// Cap a composed note at `MAX_NOTES_LEN` characters.
pub(crate) fn clamp_note(note: String) -> String {
    match note.char_indices().nth(MAX_NOTES_LEN) {
        Some((byte_idx, _)) => note[..byte_idx].to_string(),
        None => note,
    }
}

pub(crate) fn require_len(
    value: &str,
    max: usize,
    field: &'static str,
) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidField(field, "must not be empty".into()).into());
    }
    if value.chars().count() > max {
        return Err(ValidationError::FieldTooLong(field).into());
    }
    Ok(())
}
