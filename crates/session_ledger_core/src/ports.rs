//! crates/session_ledger_core/src/ports.rs
//!
//! Defines the service contract (trait) for the hosted record store.
//! This trait forms the boundary of the hexagonal architecture, allowing the core
//! to be independent of the store's engine, indexing and transport.

use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{PushdownQuery, QueryCursor, RecordEvent, SortOrder, TimestampedRecord};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Port Payloads
//=========================================================================================

/// One raw page as returned by the store, before any residual filtering.
#[derive(Debug, Clone, Default)]
pub struct StorePage {
    pub records: Vec<TimestampedRecord>,
    pub raw_count: usize,
    /// Opaque continuation the store wants echoed back on the next call.
    pub continuation: Option<String>,
}

/// Identifies a live subscription so it can be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub type RecordEventStream = Pin<Box<dyn Stream<Item = PortResult<RecordEvent>> + Send>>;

/// A live push channel. The stream ends (or yields an error) when the store drops it.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub events: RecordEventStream,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait RecordStoreService: Send + Sync {
    /// Returns up to `page_size` records for `owner_id` matching `query`,
    /// strictly after `cursor` in `order`.
    async fn query(
        &self,
        owner_id: Uuid,
        query: &PushdownQuery,
        cursor: Option<&QueryCursor>,
        page_size: usize,
        order: SortOrder,
    ) -> PortResult<StorePage>;

    /// Opens a push subscription for records appended or updated under `owner_id`
    /// that match `predicate`.
    async fn subscribe(&self, owner_id: Uuid, predicate: PushdownQuery) -> PortResult<Subscription>;

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> PortResult<()>;
}
