//! services/dashboard/src/adapters/memory.rs
//!
//! An in-process implementation of the `RecordStoreService` port. It backs the
//! service when `STORE_BACKEND=memory` and doubles as the store in tests, with
//! hooks to inject query failures and to drop live subscriptions.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use session_ledger_core::ports::{
    PortError, PortResult, RecordStoreService, StorePage, Subscription, SubscriptionHandle,
};
use session_ledger_core::{
    ChangeType, PushdownQuery, QueryCursor, RecordEvent, SortOrder, TimestampedRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

struct Subscriber {
    owner_id: Uuid,
    predicate: PushdownQuery,
    sender: UnboundedSender<PortResult<RecordEvent>>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, TimestampedRecord>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    /// Failures handed out, one per call, before queries succeed again.
    pending_failures: Vec<PortError>,
}

/// A record store that keeps everything in a `HashMap`.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    next_handle: AtomicU64,
    query_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`. No events are emitted.
    pub fn with_records(records: impl IntoIterator<Item = TimestampedRecord>) -> Self {
        let mut store = Self::default();
        {
            let inner = store.inner.get_mut();
            for record in records {
                inner.records.insert(record.id, record);
            }
        }
        store
    }

    /// Inserts or replaces a record and notifies matching subscribers.
    pub async fn upsert(&self, record: TimestampedRecord) -> ChangeType {
        let mut inner = self.inner.lock().await;
        let previous = inner.records.insert(record.id, record.clone());
        let change = if previous.is_some() {
            ChangeType::Updated
        } else {
            ChangeType::Inserted
        };

        // An update that moves a record out of a subscriber's predicate is still
        // delivered, so the subscriber can drop it.
        inner.subscribers.retain(|handle, sub| {
            let was_visible = previous
                .as_ref()
                .map_or(false, |old| sub.predicate.matches(old));
            if sub.owner_id != record.owner_id
                || !(sub.predicate.matches(&record) || was_visible)
            {
                return true;
            }
            let event = RecordEvent {
                record: record.clone(),
                change,
            };
            let delivered = sub.sender.unbounded_send(Ok(event)).is_ok();
            if !delivered {
                debug!(subscription = %handle, "Dropping subscriber with a closed receiver");
            }
            delivered
        });
        change
    }

    /// Makes the next `count` queries fail with `error`.
    pub async fn fail_next_queries(&self, count: usize, error: PortError) {
        let mut inner = self.inner.lock().await;
        inner
            .pending_failures
            .extend(std::iter::repeat(error).take(count));
    }

    /// Ends every live subscription stream with a terminal error.
    pub async fn drop_subscriptions(&self) {
        let mut inner = self.inner.lock().await;
        for (handle, sub) in inner.subscribers.drain() {
            info!(subscription = %handle, "Closing subscription");
            let _ = sub.sender.unbounded_send(Err(PortError::SubscriptionClosed(
                "store restarted".to_string(),
            )));
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subscribers.len()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStoreService for MemoryRecordStore {
    async fn query(
        &self,
        owner_id: Uuid,
        query: &PushdownQuery,
        cursor: Option<&QueryCursor>,
        page_size: usize,
        order: SortOrder,
    ) -> PortResult<StorePage> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if !inner.pending_failures.is_empty() {
            return Err(inner.pending_failures.remove(0));
        }

        let mut matching: Vec<&TimestampedRecord> = inner
            .records
            .values()
            .filter(|r| r.owner_id == owner_id && query.matches(r))
            .filter(|r| cursor.map_or(true, |c| order.is_after(&r.sort_key(), &c.last_key)))
            .collect();
        matching.sort_by_key(|r| r.sort_key());
        if order == SortOrder::Descending {
            matching.reverse();
        }

        let records: Vec<TimestampedRecord> =
            matching.into_iter().take(page_size).cloned().collect();
        Ok(StorePage {
            raw_count: records.len(),
            records,
            continuation: None,
        })
    }

    async fn subscribe(
        &self,
        owner_id: Uuid,
        predicate: PushdownQuery,
    ) -> PortResult<Subscription> {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = unbounded();
        self.inner.lock().await.subscribers.insert(
            handle,
            Subscriber {
                owner_id,
                predicate,
                sender,
            },
        );
        info!(subscription = %handle, %owner_id, "Subscription opened");
        Ok(Subscription {
            handle,
            events: Box::pin(receiver),
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> PortResult<()> {
        if self.inner.lock().await.subscribers.remove(&handle).is_some() {
            info!(subscription = %handle, "Subscription closed");
        }
        Ok(())
    }
}
