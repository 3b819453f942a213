//! crates/session_ledger_core/src/error.rs
//!
//! Error taxonomy for the query and metrics engine.

use crate::ports::PortError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Transient store failure. Paginator and aggregator state is left untouched.
    #[error("Record store unavailable: {0}")]
    AdapterUnavailable(#[from] PortError),

    /// Caller error, rejected before anything reaches the store.
    #[error("Invalid filter specification: {0}")]
    InvalidFilterSpecification(String),

    /// The push channel closed; the aggregator must resubscribe and recompute.
    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// Programmer error when naming an export column.
    #[error("Unknown export field: {0}")]
    ExportFieldUnknown(String),
}

impl EngineError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AdapterUnavailable(_) | EngineError::SubscriptionDropped(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
