//! Payment collaborator boundary. Payment outcomes arrive as events and are
//! turned into ordinary lifecycle transitions; nothing here writes bookings
//! directly.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::{Booking, BookingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentOutcome {
    pub fn target_status(self) -> BookingStatus {
        match self {
            PaymentOutcome::Succeeded => BookingStatus::Confirmed,
            PaymentOutcome::Failed | PaymentOutcome::Refunded => BookingStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub booking_id: Ulid,
    pub outcome: PaymentOutcome,
    /// Processor-side reference, only logged.
    #[serde(default)]
    pub reference: Option<String>,
}

pub async fn apply_payment_event(engine: &Engine, event: &PaymentEvent) -> Result<Booking, EngineError> {
    let to = event.outcome.target_status();
    let result = engine.transition_booking(event.booking_id, to).await;
    match &result {
        Ok(_) => tracing::info!(
            "payment {:?} for booking {} (ref {})",
            event.outcome,
            event.booking_id,
            event.reference.as_deref().unwrap_or("-")
        ),
        Err(e) => e.log("payment_event"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DefaultResourcePolicy, NewBooking};
    use crate::model::Service;
    use crate::notify::NotifyHub;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_payment");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn pending_booking(engine: &Engine) -> Booking {
        let business = Ulid::new();
        let staff = engine
            .create_business(business, "Studio".into(), 0, false, false)
            .await
            .unwrap();
        let service = Ulid::new();
        engine
            .upsert_service(Service {
                id: service,
                business_id: business,
                name: "Massage".into(),
                price_cents: Some(8000),
                duration_minutes: Some(60),
                active: true,
            })
            .await
            .unwrap();
        engine
            .create_booking(
                NewBooking {
                    id: Ulid::new(),
                    business_id: business,
                    staff_member_id: Some(staff),
                    location_id: None,
                    user_id: Ulid::new(),
                    customer_name: "Kim".into(),
                    start: Some(1_741_172_400_000),
                    end: None,
                    service_ids: vec![service],
                    status: BookingStatus::Pending,
                },
                DefaultResourcePolicy::default(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn outcome_mapping() {
        assert_eq!(PaymentOutcome::Succeeded.target_status(), BookingStatus::Confirmed);
        assert_eq!(PaymentOutcome::Failed.target_status(), BookingStatus::Cancelled);
        assert_eq!(PaymentOutcome::Refunded.target_status(), BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn success_then_refund() {
        let engine = Engine::new(test_wal_path("success_refund.wal"), Arc::new(NotifyHub::new())).unwrap();
        let b = pending_booking(&engine).await;

        let paid = PaymentEvent {
            booking_id: b.id,
            outcome: PaymentOutcome::Succeeded,
            reference: Some("pi_123".into()),
        };
        assert_eq!(
            apply_payment_event(&engine, &paid).await.unwrap().status,
            BookingStatus::Confirmed
        );

        // A duplicate success webhook is an invalid confirmed -> confirmed move.
        assert!(matches!(
            apply_payment_event(&engine, &paid).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        let refund = PaymentEvent {
            outcome: PaymentOutcome::Refunded,
            ..paid
        };
        assert_eq!(
            apply_payment_event(&engine, &refund).await.unwrap().status,
            BookingStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn failure_cancels_pending() {
        let engine = Engine::new(test_wal_path("failure.wal"), Arc::new(NotifyHub::new())).unwrap();
        let b = pending_booking(&engine).await;
        let failed = PaymentEvent {
            booking_id: b.id,
            outcome: PaymentOutcome::Failed,
            reference: None,
        };
        assert_eq!(
            apply_payment_event(&engine, &failed).await.unwrap().status,
            BookingStatus::Cancelled
        );
    }

    #[test]
    fn event_json_shape() {
        let ev: PaymentEvent = serde_json::from_str(
            r#"{"booking_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","outcome":"refunded"}"#,
        )
        .unwrap();
        assert_eq!(ev.outcome, PaymentOutcome::Refunded);
        assert_eq!(ev.reference, None);
    }
}
