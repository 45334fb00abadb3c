use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_blackout_span;
use super::locks::Mode;
use super::{Engine, EngineError};

/// Offsets beyond UTC±14:00 do not exist anywhere.
const MAX_TZ_OFFSET_MINUTES: i32 = 14 * 60;

pub const DEFAULT_STAFF_NAME: &str = "Default";

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_rule(rule: &AvailabilityRule) -> Result<(), EngineError> {
    if rule.weekday > 6 {
        return Err(EngineError::InvalidRule("weekday must be 0-6"));
    }
    if rule.to_minute > MINUTES_PER_DAY {
        return Err(EngineError::InvalidRule("window ends after midnight"));
    }
    if rule.from_minute >= rule.to_minute {
        return Err(EngineError::InvalidRule("window must start before it ends"));
    }
    Ok(())
}

impl Engine {
    /// Create a business with its pool ledger and a default staff member.
    /// Returns the default staff member's id.
    pub async fn create_business(
        &self,
        id: Ulid,
        name: String,
        tz_offset_minutes: i32,
        requires_staff: bool,
        requires_location: bool,
    ) -> Result<Ulid, EngineError> {
        check_name(&name, "business name too long")?;
        if tz_offset_minutes.abs() > MAX_TZ_OFFSET_MINUTES {
            return Err(EngineError::LimitExceeded("timezone offset out of range"));
        }
        let _dir = self.directory_lock.lock().await;
        if self.businesses.len() >= MAX_BUSINESSES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        if self.businesses.contains_key(&id) || self.ledgers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let staff_id = Ulid::new();
        self.persist_directory(&Event::BusinessCreated {
            id,
            name,
            tz_offset_minutes,
            requires_staff,
            requires_location,
            default_staff_id: Some(staff_id),
        })
        .await?;
        Ok(staff_id)
    }

    /// Remove a business and everything it owns, bookings included.
    pub async fn delete_business(&self, id: Ulid) -> Result<(), EngineError> {
        let _dir = self.directory_lock.lock().await;
        let mut plan = vec![(id, Mode::Write)];
        {
            let bs = self.businesses.get(&id).ok_or(EngineError::NotFound(id))?;
            plan.extend(bs.staff.iter().map(|s| (*s, Mode::Write)));
        }
        let locks = self.lock_ledgers(plan).await?;

        let event = Event::BusinessDeleted { id };
        self.wal_append(&event).await?;
        for ls in locks.ledgers() {
            self.forget_entities(ls);
            self.notify.send(ls.id, &event);
        }
        self.apply_directory(&event);
        Ok(())
    }

    pub async fn add_location(&self, id: Ulid, business_id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name, "location name too long")?;
        let _dir = self.directory_lock.lock().await;
        {
            let bs = self
                .businesses
                .get(&business_id)
                .ok_or(EngineError::NotFound(business_id))?;
            if bs.locations.len() >= MAX_LOCATIONS_PER_BUSINESS {
                return Err(EngineError::LimitExceeded("too many locations"));
            }
        }
        if self.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_directory(&Event::LocationAdded {
            id,
            business_id,
            name,
        })
        .await
    }

    /// Existing bookings keep the location id they were made with.
    pub async fn remove_location(&self, id: Ulid) -> Result<(), EngineError> {
        let _dir = self.directory_lock.lock().await;
        let business_id = self
            .locations
            .get(&id)
            .map(|l| l.business_id)
            .ok_or(EngineError::NotFound(id))?;
        self.persist_directory(&Event::LocationRemoved { id, business_id })
            .await
    }

    /// Create or replace a service. A service never moves between businesses.
    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        check_name(&service.name, "service name too long")?;
        if service.price_cents.is_some_and(|p| p < 0) {
            return Err(EngineError::LimitExceeded("price must not be negative"));
        }
        let _dir = self.directory_lock.lock().await;
        let existing_owner = self.services.get(&service.id).map(|s| s.business_id);
        match existing_owner {
            Some(owner) if owner != service.business_id => {
                return Err(EngineError::AlreadyExists(service.id));
            }
            Some(_) => {}
            None => {
                let bs = self
                    .businesses
                    .get(&service.business_id)
                    .ok_or(EngineError::NotFound(service.business_id))?;
                if bs.services.len() >= MAX_SERVICES_PER_BUSINESS {
                    return Err(EngineError::LimitExceeded("too many services"));
                }
            }
        }
        self.persist_directory(&Event::ServiceUpserted { service })
            .await
    }

    /// Existing booking items keep their snapshot.
    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _dir = self.directory_lock.lock().await;
        let business_id = self
            .services
            .get(&id)
            .map(|s| s.business_id)
            .ok_or(EngineError::NotFound(id))?;
        self.persist_directory(&Event::ServiceRemoved { id, business_id })
            .await
    }

    pub async fn create_staff(&self, id: Ulid, business_id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name, "staff name too long")?;
        let _dir = self.directory_lock.lock().await;
        {
            let bs = self
                .businesses
                .get(&business_id)
                .ok_or(EngineError::NotFound(business_id))?;
            if bs.staff.len() >= MAX_STAFF_PER_BUSINESS {
                return Err(EngineError::LimitExceeded("too many staff members"));
            }
        }
        if self.ledgers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_directory(&Event::StaffCreated {
            id,
            business_id,
            name,
        })
        .await
    }

    /// Refused while the staff member has a pending or confirmed booking.
    pub async fn delete_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let _dir = self.directory_lock.lock().await;
        let business_id = self.get_staff_ledger(&id)?.business_id;
        let locks = self.lock_ledgers(vec![(id, Mode::Write)]).await?;
        let ls = locks.get(&id).ok_or(EngineError::NotFound(id))?;
        if ls.live_booking_count() > 0 {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::StaffDeleted { id, business_id };
        self.wal_append(&event).await?;
        self.forget_entities(ls);
        self.apply_directory(&event);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn add_rule(&self, rule: AvailabilityRule) -> Result<(), EngineError> {
        validate_rule(&rule)?;
        let staff_id = rule.staff_member_id;
        self.get_staff_ledger(&staff_id)?;
        if self.entity_to_ledger.contains_key(&rule.id) {
            return Err(EngineError::AlreadyExists(rule.id));
        }
        let mut locks = self.lock_ledgers(vec![(staff_id, Mode::Write)]).await?;
        let ls = locks
            .get_mut(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        if ls.rules.len() >= MAX_RULES_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }
        self.persist_and_apply(staff_id, ls, &Event::RuleAdded { rule })
            .await
    }

    /// Returns the staff member the rule belonged to.
    pub async fn remove_rule(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let staff_id = self
            .get_ledger_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut locks = self.lock_ledgers(vec![(staff_id, Mode::Write)]).await?;
        let ls = locks
            .get_mut(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        if !ls.rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::RuleRemoved {
            id,
            staff_member_id: staff_id,
        };
        self.persist_and_apply(staff_id, ls, &event).await?;
        Ok(staff_id)
    }

    pub async fn add_blackout(
        &self,
        id: Ulid,
        staff_id: Ulid,
        start: Ms,
        end: Ms,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if start >= end {
            return Err(EngineError::LimitExceeded("blackout must end after it starts"));
        }
        let span = Span::new(start, end);
        validate_blackout_span(&span)?;
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("blackout reason too long"));
        }
        self.get_staff_ledger(&staff_id)?;
        if self.entity_to_ledger.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut locks = self.lock_ledgers(vec![(staff_id, Mode::Write)]).await?;
        let ls = locks
            .get_mut(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        if ls.intervals.len() >= MAX_INTERVALS_PER_LEDGER {
            return Err(EngineError::LimitExceeded("too many intervals on ledger"));
        }
        let event = Event::BlackoutAdded {
            id,
            staff_member_id: staff_id,
            span,
            reason,
        };
        self.persist_and_apply(staff_id, ls, &event).await
    }

    /// Returns the staff member the blackout belonged to.
    pub async fn remove_blackout(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let staff_id = self
            .get_ledger_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut locks = self.lock_ledgers(vec![(staff_id, Mode::Write)]).await?;
        let ls = locks
            .get_mut(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        if !ls.blackouts().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlackoutRemoved {
            id,
            staff_member_id: staff_id,
        };
        self.persist_and_apply(staff_id, ls, &event).await?;
        Ok(staff_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(weekday: u8, from_minute: u16, to_minute: u16) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            staff_member_id: Ulid::new(),
            weekday,
            from_minute,
            to_minute,
        }
    }

    #[test]
    fn rule_validation() {
        assert!(validate_rule(&rule(0, 0, 1440)).is_ok());
        assert!(validate_rule(&rule(6, 540, 1080)).is_ok());
        assert_eq!(
            validate_rule(&rule(7, 540, 1080)),
            Err(EngineError::InvalidRule("weekday must be 0-6"))
        );
        assert!(validate_rule(&rule(1, 600, 600)).is_err());
        assert!(validate_rule(&rule(1, 700, 600)).is_err());
        assert!(validate_rule(&rule(1, 0, 1441)).is_err());
    }
}
