use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type StaffId = i64;
pub type ServiceId = i64;
pub type ClientId = i64;
pub type SlotId = i64;

/// Half-open interval `[start, end)` in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whole calendar day `[00:00, next 00:00)`.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN);
        Self::new(start, start + Duration::days(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Free,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "free",
            SlotStatus::Booked => "booked",
        }
    }
}

/// One grid cell (or claimed cell) on a staff member's calendar.
///
/// Created Free by the grid generator; only a committed booking moves it to
/// Booked, and nothing moves it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub staff_id: StaffId,
    pub span: Span,
    pub status: SlotStatus,
    pub service_id: Option<ServiceId>,
    pub client_id: Option<ClientId>,
    /// Shared by every cell claimed in the same booking.
    pub booking_id: Option<Ulid>,
    pub notes: Option<String>,
}

impl Slot {
    pub fn free(id: SlotId, staff_id: StaffId, span: Span) -> Self {
        Self {
            id,
            staff_id,
            span,
            status: SlotStatus::Free,
            service_id: None,
            client_id: None,
            booking_id: None,
            notes: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }

    pub fn is_booked(&self) -> bool {
        self.status == SlotStatus::Booked
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub name: String,
    pub skills: Option<String>,
    pub color: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub staff_id: StaffId,
    pub name: String,
    pub duration_min: u32,
    pub price_cents: i64,
    pub active: bool,
}

impl Service {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_min))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<String>,
}

/// Per-staff calendar: the staff record plus every slot row, sorted by start.
#[derive(Debug, Clone)]
pub struct StaffState {
    pub staff: Staff,
    pub slots: Vec<Slot>,
}

impl StaffState {
    pub fn new(staff: Staff) -> Self {
        Self {
            staff,
            slots: Vec::new(),
        }
    }

    pub fn id(&self) -> StaffId {
        self.staff.id
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .partition_point(|s| s.span.start <= slot.span.start);
        self.slots.insert(pos, slot);
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    /// The Free slot starting exactly at `start`, if any.
    pub fn free_slot_at(&self, start: NaiveDateTime) -> Option<&Slot> {
        let from = self.slots.partition_point(|s| s.span.start < start);
        self.slots[from..]
            .iter()
            .take_while(|s| s.span.start == start)
            .find(|s| s.is_free())
    }

    pub fn has_booked_overlap(&self, span: &Span) -> bool {
        self.overlapping(span).any(|s| s.is_booked())
    }
}

/// Working-day shape shared by the generator, the resolver and the booking path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub step_minutes: u32,
    pub lead_time_minutes: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            step_minutes: 30,
            lead_time_minutes: 30,
        }
    }
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        if self.work_end <= self.work_start {
            return Err(format!(
                "work day ends ({}) before it starts ({})",
                self.work_end, self.work_start
            ));
        }
        if self.step_minutes == 0 {
            return Err("slot length must be at least one minute".into());
        }
        if self.step() > self.work_end - self.work_start {
            return Err("slot length exceeds the working day".into());
        }
        Ok(())
    }

    pub fn step(&self) -> Duration {
        Duration::minutes(i64::from(self.step_minutes))
    }

    pub fn lead_time(&self) -> Duration {
        Duration::minutes(i64::from(self.lead_time_minutes))
    }

    /// Weekends are closed.
    pub fn is_open(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn working_span(&self, date: NaiveDate) -> Span {
        Span::new(date.and_time(self.work_start), date.and_time(self.work_end))
    }

    /// Step-aligned cells in `[work_start, work_end)`. A trailing partial cell is dropped.
    pub fn cells(&self, date: NaiveDate) -> Vec<Span> {
        let hours = self.working_span(date);
        let step = self.step();
        let mut cells = Vec::new();
        let mut cur = hours.start;
        while cur + step <= hours.end {
            cells.push(Span::new(cur, cur + step));
            cur += step;
        }
        cells
    }

    /// Number of grid cells a service of `duration` must claim.
    pub fn cells_needed(&self, duration: Duration) -> usize {
        let minutes = duration.num_minutes().max(0) as u64;
        let step = u64::from(self.step_minutes);
        minutes.div_ceil(step) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingSource {
    /// Submitted by a client through the public booking form.
    Online,
    /// Entered by staff on the client's behalf.
    Staff,
}

impl BookingSource {
    pub fn label(&self) -> &'static str {
        match self {
            BookingSource::Online => "Online booking",
            BookingSource::Staff => "Staff booking",
        }
    }
}

/// Who is booking. Every field is optional; blanks are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetails {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ContactDetails {
    /// Trim every field and drop the blank ones.
    pub fn normalized(self) -> Self {
        Self {
            full_name: non_blank(self.full_name),
            email: non_blank(self.email),
            phone: non_blank(self.phone),
            notes: non_blank(self.notes),
        }
    }

    /// Booking note: source prefix followed by whatever the requester supplied.
    pub fn compose_note(&self, source: BookingSource) -> String {
        let parts: Vec<&str> = [&self.full_name, &self.email, &self.phone, &self.notes]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .collect();
        if parts.is_empty() {
            format!("{}: no contact details", source.label())
        } else {
            format!("{}: {}", source.label(), parts.join(" | "))
        }
    }
}

/// Book-by-start submission as it arrives from the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub staff_id: i64,
    pub date: String,
    pub start_time: String,
    pub service_id: i64,
    pub contact: ContactDetails,
}

/// Staff-side booking of explicit grid records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBookingRequest {
    pub slot_ids: Vec<SlotId>,
    pub service_id: i64,
    pub contact: ContactDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfirmation {
    pub booking_id: Ulid,
    pub staff_id: StaffId,
    pub client_id: ClientId,
    pub slot_ids: Vec<SlotId>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// How a booking touched the client table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientWrite {
    Existing(ClientId),
    Created(Client),
    /// Existing client with blank fields backfilled.
    Updated(Client),
}

impl ClientWrite {
    pub fn client_id(&self) -> ClientId {
        match self {
            ClientWrite::Existing(id) => *id,
            ClientWrite::Created(c) | ClientWrite::Updated(c) => c.id,
        }
    }
}

/// The event types. This is the WAL record format; one record is one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffCreated(Staff),
    ServiceCreated(Service),
    ClientRestored(Client),
    SlotsGenerated {
        staff_id: StaffId,
        slots: Vec<(SlotId, Span)>,
    },
    SlotsBooked {
        booking_id: Ulid,
        staff_id: StaffId,
        slot_ids: Vec<SlotId>,
        service_id: ServiceId,
        client: ClientWrite,
        notes: String,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSlot {
    pub appointment_id: SlotId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostics {
    pub staff: usize,
    pub services: usize,
    pub appointments: usize,
    pub clients: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 7)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn state_with(spans: &[(u32, u32, u32, u32)]) -> StaffState {
        let mut st = StaffState::new(Staff {
            id: 1,
            name: "Bella".into(),
            skills: None,
            color: None,
            active: true,
        });
        for (i, (sh, sm, eh, em)) in spans.iter().enumerate() {
            st.insert_slot(Slot::free(i as SlotId + 1, 1, Span::new(at(*sh, *sm), at(*eh, *em))));
        }
        st
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(at(9, 0), at(10, 0));
        let b = Span::new(at(9, 30), at(10, 30));
        let c = Span::new(at(10, 0), at(11, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.duration(), Duration::minutes(60));
    }

    #[test]
    fn slots_kept_sorted() {
        let st = state_with(&[(10, 0, 10, 30), (9, 0, 9, 30), (9, 30, 10, 0)]);
        let starts: Vec<_> = st.slots.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![at(9, 0), at(9, 30), at(10, 0)]);
    }

    #[test]
    fn overlapping_skips_outside_window() {
        let st = state_with(&[(9, 0, 9, 30), (9, 30, 10, 0), (10, 0, 10, 30)]);
        let hits: Vec<_> = st
            .overlapping(&Span::new(at(9, 30), at(10, 0)))
            .map(|s| s.id)
            .collect();
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn overlapping_catches_long_record() {
        let st = state_with(&[(9, 0, 11, 0)]);
        let hits = st.overlapping(&Span::new(at(10, 0), at(10, 30))).count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn free_slot_at_requires_exact_start() {
        let mut st = state_with(&[(9, 0, 9, 30), (9, 30, 10, 0)]);
        assert_eq!(st.free_slot_at(at(9, 30)).map(|s| s.id), Some(2));
        assert!(st.free_slot_at(at(9, 15)).is_none());
        st.slot_mut(2).unwrap().status = SlotStatus::Booked;
        assert!(st.free_slot_at(at(9, 30)).is_none());
    }

    #[test]
    fn default_schedule_has_sixteen_cells() {
        let schedule = Schedule::default();
        let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let cells = schedule.cells(date);
        assert_eq!(cells.len(), 16);
        assert_eq!(cells[0], Span::new(at(9, 0), at(9, 30)));
        assert_eq!(cells[15], Span::new(at(16, 30), at(17, 0)));
    }

    #[test]
    fn partial_trailing_cell_dropped() {
        let schedule = Schedule {
            step_minutes: 45,
            ..Schedule::default()
        };
        let date = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        let cells = schedule.cells(date);
        // 8h / 45min = 10 full cells, the 11th would end at 17:15
        assert_eq!(cells.len(), 10);
        assert_eq!(cells[9].end, at(16, 30));
    }

    #[test]
    fn cells_needed_rounds_up() {
        let schedule = Schedule::default();
        assert_eq!(schedule.cells_needed(Duration::minutes(30)), 1);
        assert_eq!(schedule.cells_needed(Duration::minutes(45)), 2);
        assert_eq!(schedule.cells_needed(Duration::minutes(60)), 2);
        assert_eq!(schedule.cells_needed(Duration::minutes(61)), 3);
    }

    #[test]
    fn weekends_closed() {
        let schedule = Schedule::default();
        let sat = NaiveDate::from_ymd_opt(2030, 1, 5).unwrap();
        let sun = NaiveDate::from_ymd_opt(2030, 1, 6).unwrap();
        let mon = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        assert!(!schedule.is_open(sat));
        assert!(!schedule.is_open(sun));
        assert!(schedule.is_open(mon));
    }

    #[test]
    fn schedule_validation() {
        assert!(Schedule::default().validate().is_ok());
        let inverted = Schedule {
            work_start: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            ..Schedule::default()
        };
        assert!(inverted.validate().is_err());
        let zero_step = Schedule {
            step_minutes: 0,
            ..Schedule::default()
        };
        assert!(zero_step.validate().is_err());
    }

    #[test]
    fn contact_normalization_drops_blanks() {
        let c = ContactDetails {
            full_name: Some("  Ana Kovač ".into()),
            email: Some("   ".into()),
            phone: None,
            notes: Some("".into()),
        }
        .normalized();
        assert_eq!(c.full_name.as_deref(), Some("Ana Kovač"));
        assert_eq!(c.email, None);
        assert_eq!(c.notes, None);
    }

    #[test]
    fn note_lists_supplied_fields_with_prefix() {
        let c = ContactDetails {
            full_name: Some("Ana".into()),
            email: None,
            phone: Some("091 555".into()),
            notes: Some("first visit".into()),
        };
        assert_eq!(
            c.compose_note(BookingSource::Online),
            "Online booking: Ana | 091 555 | first visit"
        );
        assert_eq!(
            ContactDetails::default().compose_note(BookingSource::Staff),
            "Staff booking: no contact details"
        );
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SlotsBooked {
            booking_id: Ulid::new(),
            staff_id: 1,
            slot_ids: vec![3, 4],
            service_id: 2,
            client: ClientWrite::Created(Client {
                id: 1,
                full_name: "Ana".into(),
                email: Some("a@x.com".into()),
                phone: None,
                notes: None,
                tags: None,
            }),
            notes: "Online booking: Ana".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
