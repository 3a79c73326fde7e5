//! Error taxonomy for the sync pipeline.
//!
//! The split that matters operationally is transient vs. everything else:
//! only [`SyncError::TransientExternal`] is retried (within the
//! orchestrator's backoff ceiling), a permanent provider failure deactivates
//! the account, and the rest propagate to the caller which records
//! `last_error` and stops.

use thiserror::Error;
use uuid::Uuid;

use super::{
    aggregator::AggregatorError, vault::EncryptionError, webhook::WebhookVerificationError,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Authentication(#[from] WebhookVerificationError),
    #[error("linked account {0} not found")]
    NotFound(Uuid),
    #[error("linked account {0} is inactive and requires re-authorization")]
    Inactive(Uuid),
    #[error("transient provider failure: {0}")]
    TransientExternal(String),
    #[error("permanent provider failure: {0}")]
    PermanentExternal(String),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error("a sync is already running for account {0}")]
    AlreadySyncing(Uuid),
    #[error("concurrent update lost: {0}")]
    Concurrency(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl SyncError {
    /// Whether the orchestrator may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientExternal(_))
    }
}

impl From<AggregatorError> for SyncError {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::Transient(msg) => SyncError::TransientExternal(msg),
            AggregatorError::Permanent(msg) => SyncError::PermanentExternal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(SyncError::TransientExternal("503".into()).is_retryable());

        let id = Uuid::nil();
        assert!(!SyncError::PermanentExternal("revoked".into()).is_retryable());
        assert!(!SyncError::Validation("bad input".into()).is_retryable());
        assert!(!SyncError::NotFound(id).is_retryable());
        assert!(!SyncError::Inactive(id).is_retryable());
        assert!(!SyncError::AlreadySyncing(id).is_retryable());
        assert!(!SyncError::Concurrency("cursor moved".into()).is_retryable());
    }

    #[test]
    fn aggregator_failures_map_onto_the_retry_split() {
        let transient = SyncError::from(AggregatorError::Transient("timeout".into()));
        assert!(transient.is_retryable());

        let permanent = SyncError::from(AggregatorError::Permanent("invalid token".into()));
        assert!(!permanent.is_retryable());
    }
}
