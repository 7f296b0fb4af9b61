use thiserror::Error;

/// Failures that callers need to tell apart. Everything else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no owners assigned to slot {slot}")]
    NoOwnersAssigned { slot: usize },

    #[error("message handler failed: {0}")]
    HandlerFailure(String),
}
