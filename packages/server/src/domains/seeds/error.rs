use crate::common::{SeedId, TransactionId};

use super::patch::ValidationError;

/// Failures of the caller-facing seed operations.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("seed {0} not found")]
    NotFound(SeedId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("seed content must not be empty")]
    EmptyContent,

    #[error("invalid patch: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SeedError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SeedError::Store(_))
    }
}
