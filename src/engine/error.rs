use serde::Serialize;
use ulid::Ulid;

use crate::model::{BreakViolation, ReservationStatus};

/// Why a requested booking window is not bookable. All applicable reasons
/// are collected, never short-circuited, to aid client diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidTimeRange,
    NoShift,
    OnBreak,
    OverlapExistingReservation,
    CapacityExceeded,
    InternalError,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTimeRange => "invalid_time_range",
            Self::NoShift => "no_shift",
            Self::OnBreak => "on_break",
            Self::OverlapExistingReservation => "overlap_existing_reservation",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed interval (end <= start) or out-of-range timestamps.
    InvalidTimeRange,
    InvalidBreaks(BreakViolation),
    /// The new/edited shift overlaps another shift of the same provider.
    ShiftOverlaps(Ulid),
    /// The booking window failed one or more availability checks.
    BookingRejected(Vec<RejectReason>),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// The delivery already reached a terminal status.
    DeliveryTerminal(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidTimeRange => write!(f, "invalid time range"),
            EngineError::InvalidBreaks(v) => {
                let what = match v {
                    BreakViolation::Malformed => "break start must be before its end",
                    BreakViolation::OutsideShift => "break must nest inside the shift",
                    BreakViolation::Overlapping => "breaks must not overlap each other",
                };
                write!(f, "invalid breaks: {what}")
            }
            EngineError::ShiftOverlaps(id) => {
                write!(f, "shift overlaps existing shift: {id}")
            }
            EngineError::BookingRejected(reasons) => {
                let joined: Vec<&str> = reasons.iter().map(|r| r.as_str()).collect();
                write!(f, "booking rejected: {}", joined.join(", "))
            }
            EngineError::InvalidTransition { from, to } => {
                write!(
                    f,
                    "invalid status transition: {} -> {}",
                    from.as_str(),
                    to.as_str()
                )
            }
            EngineError::DeliveryTerminal(id) => {
                write!(f, "delivery already terminal: {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
