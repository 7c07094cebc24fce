// libs/video-conferencing-cell/src/error.rs
use thiserror::Error;
use tracing::{debug, error};

use appointment_cell::{ErrorKind, SchedulingError, StoreError};
use shared_models::error::AppError;

#[derive(Debug, Error)]
pub enum TokenIssuerError {
    #[error("Video conferencing not configured")]
    NotConfigured,

    #[error("Not a participant of session: {0}")]
    NotParticipant(String),

    #[error("Administrative access required")]
    AdminOnly,

    #[error("Credential minting failed: {0}")]
    Minting(String),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("Token storage error: {0}")]
    Store(#[from] StoreError),
}

impl TokenIssuerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TokenIssuerError::NotParticipant(_) | TokenIssuerError::AdminOnly => ErrorKind::Unauthorized,
            TokenIssuerError::Scheduling(inner) => inner.kind(),
            TokenIssuerError::Store(inner) => SchedulingError::Store(inner.clone()).kind(),
            TokenIssuerError::NotConfigured | TokenIssuerError::Minting(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<TokenIssuerError> for AppError {
    fn from(err: TokenIssuerError) -> Self {
        match err {
            TokenIssuerError::Scheduling(inner) => inner.into(),
            TokenIssuerError::NotConfigured => {
                error!("Token issuance requested but VIDEO_TOKEN_SECRET is not set");
                AppError::Unavailable("Video conferencing is not available".to_string())
            }
            other => match other.kind() {
                ErrorKind::Unauthorized => {
                    debug!("Token request refused: {}", other);
                    AppError::Forbidden(other.to_string())
                }
                ErrorKind::NotFound => AppError::NotFound(other.to_string()),
                _ => {
                    error!("Token issuance failed: {}", other);
                    AppError::Internal(other.to_string())
                }
            },
        }
    }
}
