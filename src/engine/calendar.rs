//! Business-local calendar days to absolute millisecond windows.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Offset, TimeZone};

use crate::limits::MINUTES_PER_DAY;
use crate::model::*;

/// 0 = Sunday ... 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Absolute instant of a local wall-clock reading, `None` past chrono's range.
/// Ambiguous readings (clocks going back) resolve to the earlier instant.
pub fn local_to_ms<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> Option<Ms> {
    match tz.from_local_datetime(naive).earliest() {
        Some(dt) => Some(dt.timestamp_millis()),
        None => {
            // Inside a DST gap: apply the offset from before the jump, which
            // lands the same distance past it.
            let day_before = naive.checked_sub_signed(Duration::days(1))?;
            let before = tz.offset_from_utc_datetime(&day_before).fix();
            let shift = Duration::seconds(i64::from(before.local_minus_utc()));
            let utc = naive.checked_sub_signed(shift)?;
            Some(utc.and_utc().timestamp_millis())
        }
    }
}

/// Minute-of-day on `date` as an absolute instant. `1440` is the next midnight.
pub fn local_minute_to_ms<Tz: TimeZone>(tz: &Tz, date: NaiveDate, minute: u16) -> Option<Ms> {
    let (day, minute) = if minute >= MINUTES_PER_DAY {
        (date.succ_opt()?, minute - MINUTES_PER_DAY)
    } else {
        (date, minute)
    };
    let naive = day.and_hms_opt(u32::from(minute / 60), u32::from(minute % 60), 0)?;
    local_to_ms(tz, &naive)
}

/// The whole local day `[00:00, next 00:00)`.
pub fn day_span<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<Span> {
    let start = local_minute_to_ms(tz, date, 0)?;
    let end = local_minute_to_ms(tz, date, MINUTES_PER_DAY)?;
    (start < end).then(|| Span::new(start, end))
}

/// `YYYY-MM-DD`, limited to years that can hold a valid timestamp.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .filter(|d| (1970..=2100).contains(&d.year()))
}
