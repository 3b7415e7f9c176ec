//! Sync error types

use axum::http::StatusCode;
use thiserror::Error;

use crate::offline::Capability;
use crate::store::{EntityKind, StoreError};

use super::types::BatchStatus;

/// Errors surfaced by the sync core
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Conflict {conflict_id} not found in batch {batch_id}")]
    ConflictNotFound { batch_id: String, conflict_id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Batch {batch_id} is {status}, expected {expected}")]
    InvalidBatchState {
        batch_id: String,
        status: BatchStatus,
        expected: BatchStatus,
    },

    #[error("Retries exhausted for batch {batch_id} ({retry_count}/{max_retries})")]
    RetryExhausted {
        batch_id: String,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("Session {session_id} lacks the {capability} capability")]
    CapabilityDenied {
        session_id: String,
        capability: Capability,
    },

    #[error("Invalid retention window: {0} days")]
    InvalidRetention(i64),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Failed to apply change {change_id}: {reason}")]
    ApplyFailure { change_id: String, reason: String },

    #[error("No repository registered for entity kind {0}")]
    UnregisteredKind(EntityKind),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BatchNotFound(_) | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            // An unknown conflict id is a state error, not a missing resource
            Self::ConflictNotFound { .. } => StatusCode::CONFLICT,
            Self::InvalidState(_) | Self::InvalidBatchState { .. } => StatusCode::CONFLICT,
            Self::RetryExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CapabilityDenied { .. } => StatusCode::FORBIDDEN,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::ApplyFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnregisteredKind(_) | Self::InvalidRetention(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::BatchNotFound(_) => "BATCH_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ConflictNotFound { .. } => "CONFLICT_NOT_FOUND",
            Self::InvalidState(_) | Self::InvalidBatchState { .. } => "INVALID_STATE",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::CapabilityDenied { .. } => "CAPABILITY_DENIED",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::ApplyFailure { .. } => "APPLY_FAILURE",
            Self::UnregisteredKind(_) => "UNREGISTERED_KIND",
            Self::InvalidRetention(_) => "INVALID_RETENTION",
            Self::Store(_) => "STORE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
