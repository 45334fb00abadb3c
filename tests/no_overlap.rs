use std::sync::Arc;

use proptest::prelude::*;
use proptest::test_runner::Config;
use ulid::Ulid;

use slotbook::engine::{DefaultResourcePolicy, Engine, EngineError, NewBooking};
use slotbook::model::{BookingStatus, Ms, Span};
use slotbook::notify::NotifyHub;

const DAY_START: Ms = 1_741_168_800_000;
const MINUTE: Ms = 60_000;

#[derive(Debug, Clone)]
struct Attempt {
    /// 0 or 1 picks a staff member, 2 leaves the booking unassigned.
    who: u8,
    start_min: i64,
    len_min: i64,
}

fn attempt() -> impl Strategy<Value = Attempt> {
    (0u8..3, 0i64..48, 1i64..18).prop_map(|(who, start, len)| Attempt {
        who,
        start_min: start * 5,
        len_min: len * 5,
    })
}

/// Run every attempt concurrently; return (staff, span, outcome) per attempt.
fn run_concurrently(attempts: &[Attempt]) -> Vec<(Option<Ulid>, Span, Result<(), EngineError>)> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let dir = std::env::temp_dir().join("slotbook_test_no_overlap");
        std::fs::create_dir_all(&dir).unwrap();
        let engine = Arc::new(
            Engine::new(dir.join(format!("{}.wal", Ulid::new())), Arc::new(NotifyHub::new()))
                .unwrap(),
        );

        let business = Ulid::new();
        let first = engine
            .create_business(business, "Prop Salon".into(), 0, false, false)
            .await
            .unwrap();
        let second = Ulid::new();
        engine
            .create_staff(second, business, "Second".into())
            .await
            .unwrap();
        let staff = [Some(first), Some(second), None];

        let handles: Vec<_> = attempts
            .iter()
            .map(|a| {
                let engine = engine.clone();
                let staff_member_id = staff[a.who as usize];
                let span = Span::new(
                    DAY_START + a.start_min * MINUTE,
                    DAY_START + (a.start_min + a.len_min) * MINUTE,
                );
                tokio::spawn(async move {
                    let result = engine
                        .create_booking(
                            NewBooking {
                                id: Ulid::new(),
                                business_id: business,
                                staff_member_id,
                                location_id: None,
                                user_id: Ulid::new(),
                                customer_name: "Prop".into(),
                                start: Some(span.start),
                                end: Some(span.end),
                                service_ids: Vec::new(),
                                status: BookingStatus::Pending,
                            },
                            DefaultResourcePolicy::default(),
                        )
                        .await
                        .map(|_| ());
                    (staff_member_id, span, result)
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap());
        }
        outcomes
    })
}

/// Whether two bookings compete for the same capacity: same staff member,
/// or either one is unassigned.
fn compete(a: &(Option<Ulid>, Span), b: &(Option<Ulid>, Span)) -> bool {
    a.1.overlaps(&b.1) && (a.0 == b.0 || a.0.is_none() || b.0.is_none())
}

proptest! {
    #![proptest_config(Config::with_cases(32))]
    #[test]
    fn concurrent_bookings_never_overlap(attempts in prop::collection::vec(attempt(), 1..24)) {
        let outcomes = run_concurrently(&attempts);

        let accepted: Vec<(Option<Ulid>, Span)> = outcomes
            .iter()
            .filter(|o| o.2.is_ok())
            .map(|o| (o.0, o.1))
            .collect();

        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                prop_assert!(!compete(a, b), "accepted bookings overlap: {:?} {:?}", a, b);
            }
        }

        for (staff, span, result) in &outcomes {
            if let Err(e) = result {
                prop_assert!(matches!(e, EngineError::SlotConflict(_)), "unexpected error {e:?}");
                let rejected = (*staff, *span);
                prop_assert!(
                    accepted.iter().any(|a| compete(a, &rejected)),
                    "rejected {:?} overlaps no accepted booking",
                    rejected
                );
            }
        }
    }
}
