use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let ledger_id = self
            .get_ledger_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let handle = self.get_ledger(&ledger_id).ok_or(EngineError::NotFound(id))?;
        let guard = handle.state.read().await;
        guard.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every booking on a staff or pool ledger, cancelled ones included,
    /// ordered by start time.
    pub async fn list_bookings(&self, ledger_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let handle = self
            .get_ledger(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let guard = handle.state.read().await;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.span.start, b.id));
        Ok(bookings)
    }

    pub async fn list_rules(&self, staff_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        let handle = self.get_staff_ledger(&staff_id)?;
        let guard = handle.state.read().await;
        let mut rules = guard.rules.clone();
        rules.sort_by_key(|r| (r.weekday, r.from_minute, r.id));
        Ok(rules)
    }

    pub async fn list_blackouts(&self, staff_id: Ulid) -> Result<Vec<BlackoutInfo>, EngineError> {
        let handle = self.get_staff_ledger(&staff_id)?;
        let guard = handle.state.read().await;
        Ok(guard
            .intervals
            .iter()
            .filter_map(|i| match &i.kind {
                IntervalKind::Blackout { reason } => Some(BlackoutInfo {
                    id: i.id,
                    staff_member_id: staff_id,
                    start: i.span.start,
                    end: i.span.end,
                    reason: reason.clone(),
                }),
                IntervalKind::Booking => None,
            })
            .collect())
    }

    pub async fn list_staff(&self, business_id: Ulid) -> Result<Vec<StaffInfo>, EngineError> {
        let mut staff_ids = self
            .businesses
            .get(&business_id)
            .map(|bs| bs.staff.clone())
            .ok_or(EngineError::NotFound(business_id))?;
        staff_ids.sort();

        let mut out = Vec::with_capacity(staff_ids.len());
        for id in staff_ids {
            // Deleted since we copied the list.
            let Some(handle) = self.get_ledger(&id) else {
                continue;
            };
            let guard = handle.state.read().await;
            out.push(StaffInfo {
                id,
                business_id,
                name: guard.name.clone(),
            });
        }
        Ok(out)
    }

    pub fn get_business(&self, id: Ulid) -> Result<Business, EngineError> {
        self.businesses
            .get(&id)
            .map(|bs| bs.business.clone())
            .ok_or(EngineError::NotFound(id))
    }

    pub fn list_services(&self, business_id: Ulid) -> Result<Vec<Service>, EngineError> {
        let ids = self
            .businesses
            .get(&business_id)
            .map(|bs| bs.services.clone())
            .ok_or(EngineError::NotFound(business_id))?;
        let mut services: Vec<Service> = ids
            .iter()
            .filter_map(|id| self.services.get(id).map(|s| s.clone()))
            .collect();
        services.sort_by_key(|s| s.id);
        Ok(services)
    }

    pub fn list_locations(&self, business_id: Ulid) -> Result<Vec<Location>, EngineError> {
        let ids = self
            .businesses
            .get(&business_id)
            .map(|bs| bs.locations.clone())
            .ok_or(EngineError::NotFound(business_id))?;
        let mut locations: Vec<Location> = ids
            .iter()
            .filter_map(|id| self.locations.get(id).map(|l| l.clone()))
            .collect();
        locations.sort_by_key(|l| l.id);
        Ok(locations)
    }
}
