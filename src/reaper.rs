use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::{BookingStatus, Ms};

const REAPER_INTERVAL: Duration = Duration::from_secs(5);
const COMPACTOR_INTERVAL: Duration = Duration::from_secs(30);

/// Cancel every pending booking older than `ttl_ms`. Returns how many were cancelled.
pub async fn reap_once(engine: &Engine, ttl_ms: Ms) -> usize {
    let cutoff = engine.now_ms() - ttl_ms;
    let mut reaped = 0;
    for (booking_id, _ledger_id) in engine.collect_stale_pending(cutoff) {
        match engine
            .transition_booking(booking_id, BookingStatus::Cancelled)
            .await
        {
            Ok(_) => {
                info!("expired pending booking {booking_id}");
                reaped += 1;
            }
            // Confirmed or cancelled since we looked.
            Err(e) => tracing::debug!("reaper skip {booking_id}: {e}"),
        }
    }
    if reaped > 0 {
        metrics::counter!(crate::observability::PENDING_EXPIRED_TOTAL).increment(reaped as u64);
    }
    reaped
}

/// Background task that periodically expires stale pending bookings.
pub async fn run_reaper(engine: Arc<Engine>, ttl_ms: Ms) {
    let mut interval = tokio::time::interval(REAPER_INTERVAL);
    loop {
        interval.tick().await;
        reap_once(&engine, ttl_ms).await;
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACTOR_INTERVAL);
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{DefaultResourcePolicy, NewBooking};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    const MIN: Ms = 60_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_cancels_only_stale_pending() {
        let clock = Arc::new(ManualClock::new(1_741_000_000_000));
        let engine = Engine::with_clock(
            test_wal_path("reaper_stale.wal"),
            Arc::new(NotifyHub::new()),
            clock.clone(),
        )
        .unwrap();

        let business = Ulid::new();
        let staff = engine
            .create_business(business, "Nails".into(), 0, false, false)
            .await
            .unwrap();
        let service = Ulid::new();
        engine
            .upsert_service(Service {
                id: service,
                business_id: business,
                name: "Manicure".into(),
                price_cents: Some(3000),
                duration_minutes: Some(45),
                active: true,
            })
            .await
            .unwrap();

        let start = 1_741_172_400_000;
        let place = |offset: Ms, status| NewBooking {
            id: Ulid::new(),
            business_id: business,
            staff_member_id: Some(staff),
            location_id: None,
            user_id: Ulid::new(),
            customer_name: "Lin".into(),
            start: Some(start + offset),
            end: None,
            service_ids: vec![service],
            status,
        };
        let old = place(0, BookingStatus::Pending);
        let confirmed = place(60 * MIN, BookingStatus::Confirmed);
        let old = engine
            .create_booking(old, DefaultResourcePolicy::default())
            .await
            .unwrap();
        engine
            .create_booking(confirmed, DefaultResourcePolicy::default())
            .await
            .unwrap();

        clock.advance(10 * MIN);
        let fresh = engine
            .create_booking(place(120 * MIN, BookingStatus::Pending), DefaultResourcePolicy::default())
            .await
            .unwrap();

        // TTL of 5 minutes: only the first pending booking is old enough.
        assert_eq!(reap_once(&engine, 5 * MIN).await, 1);
        assert_eq!(
            engine.get_booking(old.id).await.unwrap().status,
            BookingStatus::Cancelled
        );
        assert_eq!(
            engine.get_booking(fresh.id).await.unwrap().status,
            BookingStatus::Pending
        );

        assert_eq!(reap_once(&engine, 5 * MIN).await, 0);
    }
}
