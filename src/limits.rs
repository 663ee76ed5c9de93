//! Hard caps on input sizes and per-tenant cardinality.

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_STAFF_PER_TENANT: usize = 1_000;
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;
/// Slot rows kept per staff member (roughly ten years of 30-minute weekday grids).
pub const MAX_SLOTS_PER_STAFF: usize = 50_000;

pub const MAX_STAFF_NAME_LEN: usize = 100;
pub const MAX_SERVICE_NAME_LEN: usize = 150;
pub const MAX_COLOR_LEN: usize = 16;
pub const MAX_SKILLS_LEN: usize = 500;

pub const MAX_SERVICE_DURATION_MIN: u32 = 480;

pub const MAX_CLIENT_NAME_LEN: usize = 150;
pub const MAX_EMAIL_LEN: usize = 256;
pub const MAX_PHONE_LEN: usize = 50;
pub const MAX_REQUEST_NOTES_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 1000;

/// Max appointment ids in a single slot booking.
pub const MAX_SLOTS_PER_BOOKING: usize = 32;
