use crate::model::Ms;

// ── Tenants ──────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

// ── Directory ────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BUSINESSES_PER_TENANT: usize = 100_000;
pub const MAX_STAFF_PER_BUSINESS: usize = 1_000;
pub const MAX_LOCATIONS_PER_BUSINESS: usize = 1_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 10_000;
pub const MAX_RULES_PER_STAFF: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;

// ── Ledger ───────────────────────────────────────────────────

/// Live occupied intervals (bookings + blackouts) on one ledger.
pub const MAX_INTERVALS_PER_LEDGER: usize = 100_000;
pub const MAX_ITEMS_PER_BOOKING: usize = 32;
pub const MAX_CUSTOMER_NAME_LEN: usize = 256;

// ── Time ─────────────────────────────────────────────────────

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single booking may not exceed one day.
pub const MAX_BOOKING_DURATION_MS: Ms = 86_400_000;
/// Blackouts may cover long vacations, but not more than a year.
pub const MAX_BLACKOUT_DURATION_MS: Ms = 366 * 86_400_000;

pub const MINUTES_PER_DAY: u16 = 1440;
/// Spacing between candidate slot starts.
pub const SLOT_STEP_MINUTES: i64 = 5;
/// Slot length used when a service has no duration.
pub const DEFAULT_SERVICE_DURATION_MINUTES: u32 = 30;

// ── Wire ─────────────────────────────────────────────────────

pub const MAX_LINE_LEN: usize = 64 * 1024;
