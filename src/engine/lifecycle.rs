use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_booking_span};
use super::locks::Mode;
use super::{Engine, EngineError};

/// What to do when a booking request names no staff member / location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    #[default]
    LeaveUnset,
    /// The business's resource with the smallest id.
    FirstById,
}

/// Per-call policy for filling in missing resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultResourcePolicy {
    #[serde(default)]
    pub staff: Fallback,
    #[serde(default)]
    pub location: Fallback,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Ulid,
    pub business_id: Ulid,
    pub staff_member_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub user_id: Ulid,
    pub customer_name: String,
    pub start: Option<Ms>,
    /// Derived from the items' durations when absent.
    pub end: Option<Ms>,
    pub service_ids: Vec<Ulid>,
    pub status: BookingStatus,
}

fn resolve(
    explicit: Option<Ulid>,
    known: &[Ulid],
    fallback: Fallback,
) -> Result<Option<Ulid>, EngineError> {
    match explicit {
        Some(id) if known.contains(&id) => Ok(Some(id)),
        Some(id) => Err(EngineError::NotFound(id)),
        None => match fallback {
            Fallback::LeaveUnset => Ok(None),
            Fallback::FirstById => Ok(known.iter().min().copied()),
        },
    }
}

impl Engine {
    /// Snapshot an active service of `business_id` as a booking item.
    fn snapshot_item(&self, business_id: Ulid, service_id: Ulid) -> Result<BookingItem, EngineError> {
        let service = self
            .services
            .get(&service_id)
            .filter(|s| s.business_id == business_id)
            .ok_or(EngineError::NotFound(service_id))?;
        if !service.active {
            return Err(EngineError::InactiveService(service_id));
        }
        Ok(BookingItem {
            id: Ulid::new(),
            service_id,
            price_cents: service.price_cents,
            duration_minutes: service.effective_duration_minutes(),
        })
    }

    pub async fn create_booking(
        &self,
        input: NewBooking,
        policy: DefaultResourcePolicy,
    ) -> Result<Booking, EngineError> {
        if input.customer_name.len() > MAX_CUSTOMER_NAME_LEN {
            return Err(EngineError::LimitExceeded("customer name too long"));
        }
        if input.service_ids.len() > MAX_ITEMS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many items on booking"));
        }

        let (business, staff, locations) = {
            let bs = self
                .businesses
                .get(&input.business_id)
                .ok_or(EngineError::NotFound(input.business_id))?;
            (bs.business.clone(), bs.staff.clone(), bs.locations.clone())
        };
        let items = input
            .service_ids
            .iter()
            .map(|sid| self.snapshot_item(business.id, *sid))
            .collect::<Result<Vec<_>, _>>()?;

        // Time presence.
        let start = input.start.ok_or(EngineError::MissingTime)?;
        let end = match input.end {
            Some(end) => end,
            None if items.is_empty() => return Err(EngineError::MissingTime),
            None => {
                let minutes: i64 = items.iter().map(|i| i64::from(i.duration_minutes)).sum();
                start.saturating_add(minutes * MINUTE_MS)
            }
        };
        if start >= end {
            return Err(EngineError::MissingTime);
        }
        let span = Span::new(start, end);
        validate_booking_span(&span)?;

        // Resource resolution.
        let staff_member_id = resolve(input.staff_member_id, &staff, policy.staff)?;
        let location_id = resolve(input.location_id, &locations, policy.location)?;
        if business.requires_staff && staff_member_id.is_none() {
            return Err(EngineError::ResourceUnavailable("staff member"));
        }
        if business.requires_location && location_id.is_none() {
            return Err(EngineError::ResourceUnavailable("location"));
        }

        let ledger_id = staff_member_id.unwrap_or(business.id);
        let mut locks = self.lock_for_booking(business.id, ledger_id).await?;

        if self.entity_to_ledger.contains_key(&input.id) {
            return Err(EngineError::AlreadyExists(input.id));
        }

        // Overlap.
        if let Err(e) = check_no_conflict(locks.ledgers(), &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        if !BookingStatus::can_transition(None, input.status) {
            return Err(EngineError::InvalidTransition {
                from: None,
                to: input.status,
            });
        }
        if input.customer_name.trim().is_empty() {
            return Err(EngineError::MissingCustomerName);
        }
        if input.status == BookingStatus::Confirmed && items.is_empty() {
            return Err(EngineError::MissingBookingItem);
        }

        let ls = locks
            .get_mut(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        if ls.intervals.len() >= MAX_INTERVALS_PER_LEDGER {
            return Err(EngineError::LimitExceeded("too many intervals on ledger"));
        }

        let now = self.now_ms();
        let booking = Booking {
            id: input.id,
            business_id: business.id,
            location_id,
            staff_member_id,
            user_id: input.user_id,
            customer_name: input.customer_name,
            span,
            status: input.status,
            items,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            ledger_id,
            booking: booking.clone(),
        };
        self.persist_and_apply(ledger_id, ls, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL, "status" => booking.status.as_str())
            .increment(1);
        Ok(booking)
    }

    /// Business and ledger a booking lives on, without taking any lock.
    fn locate_booking(&self, id: Ulid) -> Result<(Ulid, Ulid), EngineError> {
        let ledger_id = self
            .get_ledger_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let handle = self.get_ledger(&ledger_id).ok_or(EngineError::NotFound(id))?;
        Ok((handle.business_id, ledger_id))
    }

    pub async fn transition_booking(
        &self,
        id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (business_id, ledger_id) = self.locate_booking(id)?;
        let mut locks = self.lock_for_booking(business_id, ledger_id).await?;

        let current = locks
            .get(&ledger_id)
            .and_then(|ls| ls.bookings.get(&id))
            .cloned()
            .ok_or(EngineError::NotFound(id))?;

        if !BookingStatus::can_transition(Some(current.status), to) {
            return Err(EngineError::InvalidTransition {
                from: Some(current.status),
                to,
            });
        }
        if to.is_live() {
            if let Err(e) = check_no_conflict(locks.ledgers(), &current.span, Some(id)) {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }
        }
        if to == BookingStatus::Confirmed && current.items.is_empty() {
            return Err(EngineError::MissingBookingItem);
        }

        let ls = locks
            .get_mut(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let event = Event::BookingTransitioned {
            id,
            ledger_id,
            to,
            at: self.now_ms(),
        };
        self.persist_and_apply(ledger_id, ls, &event).await?;
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str())
            .increment(1);
        ls.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Move a live booking to `new_start`, keeping its duration.
    pub async fn reschedule_booking(&self, id: Ulid, new_start: Ms) -> Result<Booking, EngineError> {
        let (business_id, ledger_id) = self.locate_booking(id)?;
        let mut locks = self.lock_for_booking(business_id, ledger_id).await?;

        let current = locks
            .get(&ledger_id)
            .and_then(|ls| ls.bookings.get(&id))
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !current.is_live() {
            return Err(EngineError::NotReschedulable(id));
        }

        let end = new_start
            .checked_add(current.span.duration_ms())
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let span = Span::new(new_start, end);
        validate_booking_span(&span)?;
        check_no_conflict(locks.ledgers(), &span, Some(id))?;

        let ls = locks
            .get_mut(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;
        let event = Event::BookingRescheduled {
            id,
            ledger_id,
            span,
            at: self.now_ms(),
        };
        self.persist_and_apply(ledger_id, ls, &event).await?;
        ls.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Attach one more service to a live booking. The booking's span is not changed.
    pub async fn add_booking_item(&self, id: Ulid, service_id: Ulid) -> Result<Booking, EngineError> {
        let (business_id, ledger_id) = self.locate_booking(id)?;
        let item = self.snapshot_item(business_id, service_id)?;
        let mut locks = self.lock_ledgers(vec![(ledger_id, Mode::Write)]).await?;
        let ls = locks
            .get_mut(&ledger_id)
            .ok_or(EngineError::NotFound(ledger_id))?;

        let current = ls.bookings.get(&id).ok_or(EngineError::NotFound(id))?;
        if !current.is_live() {
            return Err(EngineError::NotReschedulable(id));
        }
        if current.items.len() >= MAX_ITEMS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many items on booking"));
        }

        let event = Event::BookingItemAdded {
            id,
            ledger_id,
            item,
            at: self.now_ms(),
        };
        self.persist_and_apply(ledger_id, ls, &event).await?;
        ls.bookings.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }
}
