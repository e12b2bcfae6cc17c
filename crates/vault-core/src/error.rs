use thiserror::Error;

/// The error taxonomy shared by every core component.
///
/// Each variant maps to a well-defined caller contract: some are
/// caller mistakes that should never be retried, some are transient
/// store/infra conditions the caller may retry, and `Internal` is a
/// catch-all that must never leak implementation detail.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("store operation timed out")]
    StoreTimeout,

    #[error("store conflict: optimistic lock lost on {0}")]
    StoreConflict(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("protocol disabled: {0}")]
    ProtocolDisabled(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether a caller may usefully retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreTimeout | Self::StoreConflict(_) | Self::DeliveryFailed(_))
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}
