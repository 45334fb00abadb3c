use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotbook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotbook_request_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings created. Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotbook_bookings_created_total";

/// Counter: booking writes rejected for overlapping a live booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotbook_booking_conflicts_total";

/// Counter: lifecycle transitions applied. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "slotbook_booking_transitions_total";

/// Counter: pending bookings cancelled by the reaper.
pub const PENDING_EXPIRED_TOTAL: &str = "slotbook_pending_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Request variant to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Startup { .. } => "startup",
        Request::CreateBusiness { .. } => "create_business",
        Request::DeleteBusiness { .. } => "delete_business",
        Request::GetBusiness { .. } => "get_business",
        Request::AddLocation { .. } => "add_location",
        Request::RemoveLocation { .. } => "remove_location",
        Request::ListLocations { .. } => "list_locations",
        Request::UpsertService { .. } => "upsert_service",
        Request::RemoveService { .. } => "remove_service",
        Request::ListServices { .. } => "list_services",
        Request::CreateStaff { .. } => "create_staff",
        Request::DeleteStaff { .. } => "delete_staff",
        Request::ListStaff { .. } => "list_staff",
        Request::AddRule { .. } => "add_rule",
        Request::RemoveRule { .. } => "remove_rule",
        Request::ListRules { .. } => "list_rules",
        Request::AddBlackout { .. } => "add_blackout",
        Request::RemoveBlackout { .. } => "remove_blackout",
        Request::ListBlackouts { .. } => "list_blackouts",
        Request::FindSlots { .. } => "find_slots",
        Request::FreeWindows { .. } => "free_windows",
        Request::CreateBooking { .. } => "create_booking",
        Request::TransitionBooking { .. } => "transition_booking",
        Request::RescheduleBooking { .. } => "reschedule_booking",
        Request::AddBookingItem { .. } => "add_booking_item",
        Request::PaymentEvent { .. } => "payment_event",
        Request::GetBooking { .. } => "get_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::Listen { .. } => "listen",
        Request::Unlisten { .. } => "unlisten",
        Request::UnlistenAll => "unlisten_all",
    }
}
