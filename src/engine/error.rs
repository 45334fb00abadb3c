use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    MissingTime,
    ResourceUnavailable(&'static str),
    SlotConflict(Ulid),
    InvalidTransition {
        from: Option<BookingStatus>,
        to: BookingStatus,
    },
    MissingCustomerName,
    MissingBookingItem,
    InactiveService(Ulid),
    NotReschedulable(Ulid),
    HasActiveBookings(Ulid),
    InvalidRule(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

/// Coarse grouping used for logging levels and the wire error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Resource,
    Conflict,
    State,
    Lookup,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Input => "input",
            ErrorClass::Resource => "resource",
            ErrorClass::Conflict => "conflict",
            ErrorClass::State => "state",
            ErrorClass::Lookup => "lookup",
            ErrorClass::Internal => "internal",
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::MissingTime
            | EngineError::MissingCustomerName
            | EngineError::InvalidRule(_)
            | EngineError::LimitExceeded(_) => ErrorClass::Input,
            EngineError::ResourceUnavailable(_) | EngineError::InactiveService(_) => {
                ErrorClass::Resource
            }
            EngineError::SlotConflict(_) => ErrorClass::Conflict,
            EngineError::InvalidTransition { .. }
            | EngineError::MissingBookingItem
            | EngineError::NotReschedulable(_)
            | EngineError::HasActiveBookings(_) => ErrorClass::State,
            EngineError::NotFound(_) | EngineError::AlreadyExists(_) => ErrorClass::Lookup,
            EngineError::WalError(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::MissingTime => "missing_time",
            EngineError::ResourceUnavailable(_) => "resource_unavailable",
            EngineError::SlotConflict(_) => "slot_conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::MissingCustomerName => "missing_customer_name",
            EngineError::MissingBookingItem => "missing_booking_item",
            EngineError::InactiveService(_) => "inactive_service",
            EngineError::NotReschedulable(_) => "not_reschedulable",
            EngineError::HasActiveBookings(_) => "has_active_bookings",
            EngineError::InvalidRule(_) => "invalid_rule",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// Emit a log line at the level matching this error's class.
    pub fn log(&self, op: &str) {
        match self.class() {
            ErrorClass::Internal => tracing::error!("{op}: {self}"),
            ErrorClass::State => tracing::warn!("{op}: {self}"),
            ErrorClass::Resource => tracing::info!("{op}: {self}"),
            ErrorClass::Input | ErrorClass::Conflict | ErrorClass::Lookup => {
                tracing::debug!("{op}: {self}")
            }
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::MissingTime => write!(f, "booking needs a start time before its end time"),
            EngineError::ResourceUnavailable(what) => write!(f, "no {what} available"),
            EngineError::SlotConflict(id) => write!(f, "slot conflicts with booking: {id}"),
            EngineError::InvalidTransition { from, to } => match from {
                Some(from) => write!(f, "invalid transition: {from} -> {to}"),
                None => write!(f, "invalid initial status: {to}"),
            },
            EngineError::MissingCustomerName => write!(f, "customer name is required"),
            EngineError::MissingBookingItem => {
                write!(f, "a confirmed booking needs at least one item")
            }
            EngineError::InactiveService(id) => write!(f, "service is not active: {id}"),
            EngineError::NotReschedulable(id) => {
                write!(f, "booking {id} is cancelled and cannot be changed")
            }
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete staff member {id}: has active bookings")
            }
            EngineError::InvalidRule(msg) => write!(f, "invalid availability rule: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
