use tokio::sync::oneshot;
use ulid::Ulid;

use crate::model::*;

use super::locks::Mode;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Pending bookings created at or before `cutoff`, as (booking, ledger) pairs.
    /// Skips ledgers that are busy right now; the next sweep will see them.
    pub fn collect_stale_pending(&self, cutoff: Ms) -> Vec<(Ulid, Ulid)> {
        let mut stale = Vec::new();
        for entry in self.ledgers.iter() {
            let Ok(guard) = entry.value().state.try_read() else {
                continue;
            };
            for booking in guard.bookings.values() {
                if booking.status == BookingStatus::Pending && booking.created_at <= cutoff {
                    stale.push((booking.id, guard.id));
                }
            }
        }
        stale
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Holds the directory lock and a read lock on every ledger while the
    /// snapshot is written, so no accepted mutation can fall between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _dir = self.directory_lock.lock().await;

        let mut business_ids: Vec<Ulid> = self.businesses.iter().map(|e| *e.key()).collect();
        business_ids.sort();
        let plan: Vec<(Ulid, Mode)> = self
            .ledgers
            .iter()
            .map(|e| (*e.key(), Mode::Read))
            .collect();
        let locks = self.lock_ledgers(plan).await?;

        let mut events = Vec::new();
        for business_id in business_ids {
            let Some(bs) = self.businesses.get(&business_id).map(|b| b.clone()) else {
                continue;
            };
            let b = &bs.business;
            events.push(Event::BusinessCreated {
                id: b.id,
                name: b.name.clone(),
                tz_offset_minutes: b.tz_offset_minutes,
                requires_staff: b.requires_staff,
                requires_location: b.requires_location,
                default_staff_id: None,
            });
            for location_id in &bs.locations {
                if let Some(l) = self.locations.get(location_id) {
                    events.push(Event::LocationAdded {
                        id: l.id,
                        business_id: l.business_id,
                        name: l.name.clone(),
                    });
                }
            }
            for service_id in &bs.services {
                if let Some(s) = self.services.get(service_id) {
                    events.push(Event::ServiceUpserted { service: s.clone() });
                }
            }

            let ledger_ids = bs.staff.iter().copied().chain(std::iter::once(business_id));
            for ledger_id in ledger_ids {
                let Some(ls) = locks.get(&ledger_id) else {
                    continue;
                };
                if ls.kind == LedgerKind::Staff {
                    events.push(Event::StaffCreated {
                        id: ls.id,
                        business_id,
                        name: ls.name.clone().unwrap_or_default(),
                    });
                }
                for rule in &ls.rules {
                    events.push(Event::RuleAdded { rule: *rule });
                }
                for interval in ls.blackouts() {
                    if let IntervalKind::Blackout { reason } = &interval.kind {
                        events.push(Event::BlackoutAdded {
                            id: interval.id,
                            staff_member_id: ls.id,
                            span: interval.span,
                            reason: reason.clone(),
                        });
                    }
                }
                let mut bookings: Vec<&Booking> = ls.bookings.values().collect();
                bookings.sort_by_key(|b| (b.created_at, b.id));
                for booking in bookings {
                    events.push(Event::BookingCreated {
                        ledger_id: ls.id,
                        booking: booking.clone(),
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(locks);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
