use chrono::{FixedOffset, NaiveDate, TimeZone};
use ulid::Ulid;

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS, SLOT_STEP_MINUTES};
use crate::model::*;

use super::calendar::{local_minute_to_ms, weekday_index};
use super::intervals::{grid_starts_within, merge_overlapping, subtract_intervals};
use super::{Engine, EngineError, LedgerHandle};

/// One rule window on a concrete day and what is still free inside it.
struct RuleWindow {
    window: Span,
    free: Vec<Span>,
}

/// Occupied spans (live bookings and blackouts) on the given ledgers
/// that touch `query`, sorted and merged.
fn occupied<'a>(ledgers: impl IntoIterator<Item = &'a LedgerState>, query: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = ledgers
        .into_iter()
        .flat_map(|ls| ls.overlapping(query).map(|i| i.span))
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

impl Engine {
    /// Rule windows of `staff` on `date`, each minus the occupied set.
    async fn rule_windows<Tz: TimeZone>(
        &self,
        staff: &LedgerHandle,
        staff_id: Ulid,
        date: NaiveDate,
        tz: &Tz,
    ) -> Result<Vec<RuleWindow>, EngineError> {
        let plan = self.staff_read_plan(staff_id, staff.business_id);
        let locks = self.lock_ledgers(plan).await?;
        let ls = locks.get(&staff_id).ok_or(EngineError::NotFound(staff_id))?;

        let mut windows = Vec::new();
        for rule in ls.rules_for_weekday(weekday_index(date)) {
            let (Some(start), Some(end)) = (
                local_minute_to_ms(tz, date, rule.from_minute),
                local_minute_to_ms(tz, date, rule.to_minute),
            ) else {
                return Err(EngineError::LimitExceeded("date out of range"));
            };
            if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
                return Err(EngineError::LimitExceeded("date out of range"));
            }
            // A rule collapsed to nothing by a DST jump contributes nothing.
            if start >= end {
                continue;
            }
            let window = Span::new(start, end);
            let busy = occupied(locks.ledgers(), &window);
            windows.push(RuleWindow {
                window,
                free: subtract_intervals(&[window], &busy),
            });
        }
        Ok(windows)
    }

    /// Bookable start times for `service_id` with `staff_id` on the local
    /// `date` in `tz`: grid points every five minutes from each rule's start
    /// whose full service duration is free. Advisory only; nothing is held.
    pub async fn find_slots<Tz: TimeZone>(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        location_id: Option<Ulid>,
        tz: &Tz,
    ) -> Result<Vec<Ms>, EngineError> {
        let staff = self.get_staff_ledger(&staff_id)?;
        let duration_ms = {
            let service = self
                .services
                .get(&service_id)
                .filter(|s| s.business_id == staff.business_id)
                .ok_or(EngineError::NotFound(service_id))?;
            if !service.active {
                return Err(EngineError::InactiveService(service_id));
            }
            i64::from(service.effective_duration_minutes()) * MINUTE_MS
        };
        if let Some(location_id) = location_id {
            let known = self
                .locations
                .get(&location_id)
                .is_some_and(|l| l.business_id == staff.business_id);
            if !known {
                return Err(EngineError::NotFound(location_id));
            }
        }

        let step = SLOT_STEP_MINUTES * MINUTE_MS;
        let mut slots: Vec<Ms> = Vec::new();
        for rw in self.rule_windows(&staff, staff_id, date, tz).await? {
            for free in &rw.free {
                slots.extend(grid_starts_within(rw.window.start, step, duration_ms, free));
            }
        }
        slots.sort_unstable();
        slots.dedup();
        Ok(slots)
    }

    /// Free sub-windows of every rule on the local `date`, sorted by start.
    pub async fn free_windows<Tz: TimeZone>(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        tz: &Tz,
    ) -> Result<Vec<Span>, EngineError> {
        let staff = self.get_staff_ledger(&staff_id)?;
        let mut free: Vec<Span> = self
            .rule_windows(&staff, staff_id, date, tz)
            .await?
            .into_iter()
            .flat_map(|rw| rw.free)
            .collect();
        free.sort_by_key(|s| (s.start, s.end));
        free.dedup();
        Ok(free)
    }

    /// The business's fixed offset, for callers that work in business-local time.
    pub fn business_timezone(&self, business_id: &Ulid) -> Result<FixedOffset, EngineError> {
        let offset_minutes = self
            .businesses
            .get(business_id)
            .map(|bs| bs.business.tz_offset_minutes)
            .ok_or(EngineError::NotFound(*business_id))?;
        FixedOffset::east_opt(offset_minutes * 60)
            .ok_or(EngineError::LimitExceeded("timezone offset out of range"))
    }

    /// `find_slots` in the staff member's business-local time.
    pub async fn find_slots_local(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        location_id: Option<Ulid>,
    ) -> Result<Vec<Ms>, EngineError> {
        let staff = self.get_staff_ledger(&staff_id)?;
        let tz = self.business_timezone(&staff.business_id)?;
        self.find_slots(staff_id, service_id, date, location_id, &tz)
            .await
    }

    /// `free_windows` in the staff member's business-local time.
    pub async fn free_windows_local(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        let staff = self.get_staff_ledger(&staff_id)?;
        let tz = self.business_timezone(&staff.business_id)?;
        self.free_windows(staff_id, date, &tz).await
    }
}
