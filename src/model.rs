use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_SERVICE_DURATION_MINUTES;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// The lifecycle table. `from == None` is creation.
    pub fn can_transition(from: Option<BookingStatus>, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (from, to),
            (None, Pending)
                | (None, Confirmed)
                | (Some(Pending), Confirmed)
                | (Some(Pending), Cancelled)
                | (Some(Confirmed), Cancelled)
        )
    }

    /// Whether a booking in this status occupies its span.
    pub fn is_live(self) -> bool {
        self != BookingStatus::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    /// Business-local offset from UTC, used when callers don't supply a zone.
    pub tz_offset_minutes: i32,
    pub requires_staff: bool,
    pub requires_location: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub price_cents: Option<i64>,
    pub duration_minutes: Option<u32>,
    pub active: bool,
}

impl Service {
    pub fn effective_duration_minutes(&self) -> u32 {
        match self.duration_minutes {
            Some(d) if d > 0 => d,
            _ => DEFAULT_SERVICE_DURATION_MINUTES,
        }
    }
}

/// Recurring weekly open window. `weekday` 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub staff_member_id: Ulid,
    pub weekday: u8,
    pub from_minute: u16,
    pub to_minute: u16,
}

// ── Bookings ─────────────────────────────────────────────────────

/// Service snapshot taken when the item was attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingItem {
    pub id: Ulid,
    pub service_id: Ulid,
    pub price_cents: Option<i64>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub location_id: Option<Ulid>,
    pub staff_member_id: Option<Ulid>,
    pub user_id: Ulid,
    pub customer_name: String,
    pub span: Span,
    pub status: BookingStatus,
    pub items: Vec<BookingItem>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn total_price_cents(&self) -> i64 {
        self.items.iter().filter_map(|i| i.price_cents).sum()
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// What an occupied interval represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    Blackout { reason: Option<String> },
    /// A non-cancelled booking; the record itself lives in `LedgerState::bookings`.
    Booking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_blackout(&self) -> bool {
        matches!(self.kind, IntervalKind::Blackout { .. })
    }

    pub fn is_booking(&self) -> bool {
        matches!(self.kind, IntervalKind::Booking)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// One per staff member; id == staff member id.
    Staff,
    /// One per business for bookings without a staff member; id == business id.
    Pool,
}

/// Everything that can make one bookable resource busy, plus its bookings.
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub id: Ulid,
    pub business_id: Ulid,
    pub kind: LedgerKind,
    pub name: Option<String>,
    pub rules: Vec<AvailabilityRule>,
    /// Blackouts and live bookings, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Every booking ever placed on this ledger, cancelled ones included.
    pub bookings: HashMap<Ulid, Booking>,
}

impl LedgerState {
    pub fn new(id: Ulid, business_id: Ulid, kind: LedgerKind, name: Option<String>) -> Self {
        Self {
            id,
            business_id,
            kind,
            name,
            rules: Vec::new(),
            intervals: Vec::new(),
            bookings: HashMap::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// Store a booking record; live bookings also occupy their span.
    pub fn put_booking(&mut self, booking: Booking) {
        self.remove_interval(booking.id);
        if booking.is_live() {
            self.insert_interval(Interval {
                id: booking.id,
                span: booking.span,
                kind: IntervalKind::Booking,
            });
        }
        self.bookings.insert(booking.id, booking);
    }

    pub fn rules_for_weekday(&self, weekday: u8) -> impl Iterator<Item = &AvailabilityRule> {
        self.rules.iter().filter(move |r| r.weekday == weekday)
    }

    pub fn live_booking_count(&self) -> usize {
        self.intervals.iter().filter(|i| i.is_booking()).count()
    }

    pub fn blackouts(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(|i| i.is_blackout())
    }
}

/// WAL record format. Flat, no nesting beyond record structs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        name: String,
        tz_offset_minutes: i32,
        requires_staff: bool,
        requires_location: bool,
        /// Staff member provisioned with the business. Compacted logs carry
        /// `None` and list every staff member as its own `StaffCreated`.
        default_staff_id: Option<Ulid>,
    },
    BusinessDeleted {
        id: Ulid,
    },
    LocationAdded {
        id: Ulid,
        business_id: Ulid,
        name: String,
    },
    LocationRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    ServiceUpserted {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
        business_id: Ulid,
    },
    StaffCreated {
        id: Ulid,
        business_id: Ulid,
        name: String,
    },
    StaffDeleted {
        id: Ulid,
        business_id: Ulid,
    },
    RuleAdded {
        rule: AvailabilityRule,
    },
    RuleRemoved {
        id: Ulid,
        staff_member_id: Ulid,
    },
    BlackoutAdded {
        id: Ulid,
        staff_member_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    BlackoutRemoved {
        id: Ulid,
        staff_member_id: Ulid,
    },
    BookingCreated {
        ledger_id: Ulid,
        booking: Booking,
    },
    BookingItemAdded {
        id: Ulid,
        ledger_id: Ulid,
        item: BookingItem,
        at: Ms,
    },
    BookingTransitioned {
        id: Ulid,
        ledger_id: Ulid,
        to: BookingStatus,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        ledger_id: Ulid,
        span: Span,
        at: Ms,
    },
}

impl Event {
    /// The ledger this event mutates, if any. Used for notification routing.
    pub fn ledger_id(&self) -> Option<Ulid> {
        match self {
            Event::StaffCreated { id, .. } | Event::StaffDeleted { id, .. } => Some(*id),
            Event::RuleAdded { rule } => Some(rule.staff_member_id),
            Event::RuleRemoved { staff_member_id, .. }
            | Event::BlackoutAdded { staff_member_id, .. }
            | Event::BlackoutRemoved { staff_member_id, .. } => Some(*staff_member_id),
            Event::BookingCreated { ledger_id, .. }
            | Event::BookingItemAdded { ledger_id, .. }
            | Event::BookingTransitioned { ledger_id, .. }
            | Event::BookingRescheduled { ledger_id, .. } => Some(*ledger_id),
            Event::BusinessCreated { id, .. } | Event::BusinessDeleted { id } => Some(*id),
            Event::LocationAdded { .. }
            | Event::LocationRemoved { .. }
            | Event::ServiceUpserted { .. }
            | Event::ServiceRemoved { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffInfo {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutInfo {
    pub id: Ulid,
    pub staff_member_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_on(span: Span, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            business_id: Ulid::new(),
            location_id: None,
            staff_member_id: None,
            user_id: Ulid::new(),
            customer_name: "Ada".into(),
            span,
            status,
            items: vec![],
            created_at: 0,
            updated_at: 0,
        }
    }

    fn ledger() -> LedgerState {
        LedgerState::new(Ulid::new(), Ulid::new(), LedgerKind::Staff, None)
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        assert!(BookingStatus::can_transition(None, Pending));
        assert!(BookingStatus::can_transition(None, Confirmed));
        assert!(!BookingStatus::can_transition(None, Cancelled));
        assert!(BookingStatus::can_transition(Some(Pending), Confirmed));
        assert!(BookingStatus::can_transition(Some(Pending), Cancelled));
        assert!(!BookingStatus::can_transition(Some(Pending), Pending));
        assert!(BookingStatus::can_transition(Some(Confirmed), Cancelled));
        assert!(!BookingStatus::can_transition(Some(Confirmed), Pending));
        assert!(!BookingStatus::can_transition(Some(Confirmed), Confirmed));
        for to in [Pending, Confirmed, Cancelled] {
            assert!(!BookingStatus::can_transition(Some(Cancelled), to));
        }
    }

    #[test]
    fn service_duration_fallback() {
        let mut svc = Service {
            id: Ulid::new(),
            business_id: Ulid::new(),
            name: "Cut".into(),
            price_cents: Some(2500),
            duration_minutes: None,
            active: true,
        };
        assert_eq!(svc.effective_duration_minutes(), 30);
        svc.duration_minutes = Some(0);
        assert_eq!(svc.effective_duration_minutes(), 30);
        svc.duration_minutes = Some(45);
        assert_eq!(svc.effective_duration_minutes(), 45);
    }

    #[test]
    fn interval_ordering() {
        let mut ls = ledger();
        for start in [300, 100, 200] {
            ls.insert_interval(Interval {
                id: Ulid::new(),
                span: Span::new(start, start + 50),
                kind: IntervalKind::Blackout { reason: None },
            });
        }
        let starts: Vec<_> = ls.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ls = ledger();
        ls.put_booking(booking_on(Span::new(100, 200), BookingStatus::Confirmed));
        ls.put_booking(booking_on(Span::new(450, 600), BookingStatus::Pending));
        ls.put_booking(booking_on(Span::new(1000, 1100), BookingStatus::Confirmed));

        let hits: Vec<_> = ls.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut ls = ledger();
        ls.put_booking(booking_on(Span::new(100, 200), BookingStatus::Confirmed));
        assert_eq!(ls.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(ls.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn cancelled_booking_is_kept_but_does_not_occupy() {
        let mut ls = ledger();
        let mut b = booking_on(Span::new(100, 200), BookingStatus::Pending);
        ls.put_booking(b.clone());
        assert_eq!(ls.live_booking_count(), 1);

        b.status = BookingStatus::Cancelled;
        ls.put_booking(b.clone());
        assert_eq!(ls.live_booking_count(), 0);
        assert_eq!(ls.bookings[&b.id].status, BookingStatus::Cancelled);
    }

    #[test]
    fn put_booking_moves_interval_on_reschedule() {
        let mut ls = ledger();
        let mut b = booking_on(Span::new(100, 200), BookingStatus::Confirmed);
        ls.put_booking(b.clone());
        b.span = Span::new(500, 600);
        ls.put_booking(b);
        assert_eq!(ls.intervals.len(), 1);
        assert_eq!(ls.intervals[0].span, Span::new(500, 600));
    }

    #[test]
    fn event_ledger_routing() {
        let staff = Ulid::new();
        let ev = Event::BlackoutRemoved {
            id: Ulid::new(),
            staff_member_id: staff,
        };
        assert_eq!(ev.ledger_id(), Some(staff));
        let ev = Event::ServiceRemoved {
            id: Ulid::new(),
            business_id: Ulid::new(),
        };
        assert_eq!(ev.ledger_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            ledger_id: Ulid::new(),
            booking: booking_on(Span::new(0, 1_800_000), BookingStatus::Pending),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
