// libs/appointment-cell/src/error.rs
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{ReviewStatus, SessionStatus};

/// Coarse classification that decides how an error is logged and which
/// status code it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Contention,
    Entitlement,
    State,
    Integrity,
    NotFound,
    Unauthorized,
    Validation,
    Infrastructure,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    Duplicate(String),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        if shared_database::supabase::unique_violation(&err) {
            StoreError::Duplicate(err.to_string())
        } else {
            StoreError::Backend(format!("{:#}", err))
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulingError {
    #[error("Slot not found: {0}")]
    SlotNotFound(Uuid),

    #[error("Slot {0} is not available")]
    SlotUnavailable(Uuid),

    #[error("Slot {0} starts in the past")]
    SlotInPast(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Cancellation request not found: {0}")]
    CancellationNotFound(Uuid),

    #[error("A cancellation request is already pending for session {0}")]
    RequestAlreadyPending(Uuid),

    #[error("Concurrent modification of {0}")]
    ConcurrentModification(String),

    #[error("No credit available")]
    NoCreditAvailable,

    #[error("Entitlement blocked by pending payment")]
    EntitlementBlocked,

    #[error("Session has not started yet")]
    NotYetStartable,

    #[error("Session access window is closed")]
    WindowClosed,

    #[error("Operation not allowed while session is {0}")]
    InvalidSessionState(SessionStatus),

    #[error("Cancellation request already {0}")]
    AlreadyReviewed(ReviewStatus),

    #[error("Supporting documents are required for late cancellations")]
    DocumentsRequired,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("{step} timed out after {timeout_ms} ms")]
    Timeout { step: &'static str, timeout_ms: u64 },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl SchedulingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulingError::SlotUnavailable(_)
            | SchedulingError::RequestAlreadyPending(_)
            | SchedulingError::ConcurrentModification(_) => ErrorKind::Contention,
            SchedulingError::NoCreditAvailable | SchedulingError::EntitlementBlocked => {
                ErrorKind::Entitlement
            }
            SchedulingError::SlotInPast(_)
            | SchedulingError::NotYetStartable
            | SchedulingError::WindowClosed
            | SchedulingError::InvalidSessionState(_)
            | SchedulingError::AlreadyReviewed(_) => ErrorKind::State,
            SchedulingError::SlotNotFound(_)
            | SchedulingError::SessionNotFound(_)
            | SchedulingError::CancellationNotFound(_) => ErrorKind::NotFound,
            SchedulingError::Unauthorized(_) => ErrorKind::Unauthorized,
            SchedulingError::Validation(_) | SchedulingError::DocumentsRequired => {
                ErrorKind::Validation
            }
            SchedulingError::Integrity(_) => ErrorKind::Integrity,
            SchedulingError::Store(StoreError::Corrupt(_)) => ErrorKind::Integrity,
            SchedulingError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            SchedulingError::Store(_) | SchedulingError::Timeout { .. } => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Message safe to show the caller. Entitlement errors say what to do next.
    pub fn user_message(&self) -> String {
        match self {
            SchedulingError::NoCreditAvailable => {
                "No session credit available. Renew your plan or purchase a single session to book."
                    .to_string()
            }
            SchedulingError::EntitlementBlocked => {
                "Your last payment is still pending. Booking resumes once it is confirmed."
                    .to_string()
            }
            SchedulingError::SlotUnavailable(_) => {
                "This time slot was just taken. Please pick another one.".to_string()
            }
            SchedulingError::DocumentsRequired => {
                "Late cancellations need supporting documents attached to the request.".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn log(&self) {
        match self.kind() {
            ErrorKind::Contention => debug!("Scheduling contention: {}", self),
            ErrorKind::Entitlement | ErrorKind::State => info!("Scheduling rejected: {}", self),
            ErrorKind::NotFound | ErrorKind::Unauthorized | ErrorKind::Validation => {
                debug!("Scheduling request refused: {}", self)
            }
            ErrorKind::Integrity => error!("Scheduling integrity violation: {}", self),
            ErrorKind::Infrastructure => error!("Scheduling infrastructure failure: {}", self),
        }
    }
}

impl From<SchedulingError> for AppError {
    fn from(err: SchedulingError) -> Self {
        err.log();
        let message = err.user_message();
        match err.kind() {
            ErrorKind::Contention | ErrorKind::State => AppError::Conflict(message),
            ErrorKind::Entitlement => AppError::Unprocessable(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Unauthorized => AppError::Forbidden(message),
            ErrorKind::Validation => AppError::BadRequest(message),
            ErrorKind::Integrity | ErrorKind::Infrastructure => AppError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors_by_kind() {
        assert_eq!(SchedulingError::SlotUnavailable(Uuid::nil()).kind(), ErrorKind::Contention);
        assert_eq!(SchedulingError::NoCreditAvailable.kind(), ErrorKind::Entitlement);
        assert_eq!(SchedulingError::WindowClosed.kind(), ErrorKind::State);
        assert_eq!(
            SchedulingError::Store(StoreError::Corrupt("bad row".into())).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            SchedulingError::Timeout { step: "debit", timeout_ms: 10 }.kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn entitlement_errors_are_actionable() {
        let message = SchedulingError::NoCreditAvailable.user_message();
        assert!(message.contains("purchase"));

        let app: AppError = SchedulingError::EntitlementBlocked.into();
        assert!(matches!(app, AppError::Unprocessable(_)));
    }

    #[test]
    fn integrity_errors_map_to_internal() {
        let app: AppError = SchedulingError::Integrity("cycle overdrawn".into()).into();
        assert!(matches!(app, AppError::Internal(_)));
    }
}
