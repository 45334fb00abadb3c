use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn validate_range(span: &Span, max_duration: Ms, what: &'static str) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > max_duration {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

pub(crate) fn validate_booking_span(span: &Span) -> Result<(), EngineError> {
    validate_range(span, MAX_BOOKING_DURATION_MS, "booking too long")
}

pub(crate) fn validate_blackout_span(span: &Span) -> Result<(), EngineError> {
    validate_range(span, MAX_BLACKOUT_DURATION_MS, "blackout too long")
}

/// Fails with the first live booking on any of `ledgers` that overlaps `span`.
/// Blackouts are not bookings and never conflict here.
pub(crate) fn check_no_conflict<'a>(
    ledgers: impl IntoIterator<Item = &'a LedgerState>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for ledger in ledgers {
        for interval in ledger.overlapping(span) {
            if interval.is_booking() && Some(interval.id) != exclude {
                return Err(EngineError::SlotConflict(interval.id));
            }
        }
    }
    Ok(())
}
