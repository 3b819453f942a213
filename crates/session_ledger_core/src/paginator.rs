//! crates/session_ledger_core/src/paginator.rs
//!
//! Drives the record store with the pushdown half of a compiled filter,
//! applies the residual half to every page and accumulates the survivors.
//!
//! The cursor always advances to the last *raw* record the store returned,
//! whether or not it survived the residual filter, so cursoring never skips or
//! repeats raw records. A short filtered page therefore says nothing about
//! end-of-stream; only `has_more` does.

use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::{PushdownQuery, QueryCursor, SortOrder, TimestampedRecord};
use crate::error::{EngineError, EngineResult};
use crate::filter::CompiledFilter;
use crate::ports::{PortResult, RecordStoreService, StorePage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginatorOptions {
    pub page_size: usize,
    pub sort_order: SortOrder,
}

impl Default for PaginatorOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            sort_order: SortOrder::Descending,
        }
    }
}

/// The residual-filtered result of one or more raw round-trips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<TimestampedRecord>,
    /// Number of raw records the store returned before residual filtering.
    pub raw_count: usize,
    pub has_more: bool,
}

/// Tracks a run of round-trips that stops at the first page with visible
/// records, at the end of the stream, or after `max_pages` raw fetches.
#[derive(Debug)]
pub struct VisibleScan {
    remaining: usize,
    combined: Page,
}

impl VisibleScan {
    pub fn new(max_pages: usize, has_more: bool) -> Self {
        Self {
            remaining: max_pages.max(1),
            combined: Page {
                has_more,
                ..Page::default()
            },
        }
    }

    /// Folds in one applied page and returns whether another round-trip is due.
    pub fn absorb(&mut self, page: Page) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.combined.raw_count += page.raw_count;
        self.combined.has_more = page.has_more;
        self.combined.records.extend(page.records);
        self.combined.records.is_empty() && self.combined.has_more && self.remaining > 0
    }

    pub fn finish(self) -> Page {
        self.combined
    }
}

/// A fetch captured at issue time. Completing it against a paginator that has
/// since been reset or advanced is detected and discarded.
#[derive(Debug, Clone)]
pub struct PageRequest {
    generation: u64,
    owner_id: Uuid,
    query: PushdownQuery,
    cursor: Option<QueryCursor>,
    page_size: usize,
    sort_order: SortOrder,
}

impl PageRequest {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query(&self) -> &PushdownQuery {
        &self.query
    }

    /// Performs the store round-trip. Holds no paginator state.
    pub async fn send(&self, store: &dyn RecordStoreService) -> PortResult<StorePage> {
        store
            .query(
                self.owner_id,
                &self.query,
                self.cursor.as_ref(),
                self.page_size,
                self.sort_order,
            )
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Applied(Page),
    /// The request was issued against a superseded query or cursor.
    Stale,
}

pub struct CursorPaginator {
    store: Arc<dyn RecordStoreService>,
    owner_id: Uuid,
    options: PaginatorOptions,
    filter: CompiledFilter,
    cursor: Option<QueryCursor>,
    has_more: bool,
    accumulated: Vec<TimestampedRecord>,
    generation: u64,
}

impl CursorPaginator {
    pub fn new(
        store: Arc<dyn RecordStoreService>,
        owner_id: Uuid,
        filter: CompiledFilter,
        options: PaginatorOptions,
    ) -> Self {
        Self {
            store,
            owner_id,
            options: PaginatorOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            filter,
            cursor: None,
            has_more: true,
            accumulated: Vec::new(),
            generation: 0,
        }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn options(&self) -> PaginatorOptions {
        self.options
    }

    pub fn filter(&self) -> &CompiledFilter {
        &self.filter
    }

    pub fn cursor(&self) -> Option<&QueryCursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn accumulated(&self) -> &[TimestampedRecord] {
        &self.accumulated
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store(&self) -> Arc<dyn RecordStoreService> {
        Arc::clone(&self.store)
    }

    pub fn into_records(self) -> Vec<TimestampedRecord> {
        self.accumulated
    }

    /// Starts over with `filter`: drops the cursor and everything accumulated.
    pub fn reset(&mut self, filter: CompiledFilter) {
        self.filter = filter;
        self.cursor = None;
        self.accumulated.clear();
        self.has_more = true;
        self.generation += 1;
        debug!(
            owner_id = %self.owner_id,
            generation = self.generation,
            "Paginator reset"
        );
    }

    /// Resets only when `filter` differs structurally from the current one.
    pub fn reset_if_changed(&mut self, filter: CompiledFilter) -> bool {
        if filter == self.filter {
            return false;
        }
        self.reset(filter);
        true
    }

    /// Captures the next request, or `None` once the stream is exhausted.
    pub fn begin_fetch(&self) -> Option<PageRequest> {
        if !self.has_more {
            return None;
        }
        Some(PageRequest {
            generation: self.generation,
            owner_id: self.owner_id,
            query: self.filter.pushdown.clone(),
            cursor: self.cursor.clone(),
            page_size: self.options.page_size,
            sort_order: self.options.sort_order,
        })
    }

    /// Applies the store's answer to `request`.
    ///
    /// A failed round-trip leaves the paginator untouched so the caller can retry.
    pub fn complete_fetch(
        &mut self,
        request: PageRequest,
        result: PortResult<StorePage>,
    ) -> EngineResult<PageOutcome> {
        if request.generation != self.generation
            || request.query != self.filter.pushdown
            || request.cursor != self.cursor
        {
            warn!(
                owner_id = %self.owner_id,
                request_generation = request.generation,
                current_generation = self.generation,
                "Discarding page fetched for a superseded query"
            );
            return Ok(PageOutcome::Stale);
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                error!(owner_id = %self.owner_id, "Page fetch failed: {}", e);
                return Err(EngineError::AdapterUnavailable(e));
            }
        };

        let raw_len = raw.records.len();
        if raw.raw_count != raw_len {
            debug!(
                reported = raw.raw_count,
                received = raw_len,
                "Store reported a raw count different from the page length"
            );
        }

        if let Some(last) = raw.records.last() {
            self.cursor = Some(QueryCursor {
                token: raw.continuation.clone(),
                last_key: last.sort_key(),
            });
        }
        self.has_more = raw_len >= request.page_size;

        let residual = &self.filter.residual;
        let visible: Vec<TimestampedRecord> = raw
            .records
            .into_iter()
            .filter(|record| residual.matches(record))
            .collect();
        self.accumulated.extend(visible.iter().cloned());

        debug!(
            owner_id = %self.owner_id,
            raw = raw_len,
            visible = visible.len(),
            has_more = self.has_more,
            "Page applied"
        );

        Ok(PageOutcome::Applied(Page {
            records: visible,
            raw_count: raw_len,
            has_more: self.has_more,
        }))
    }

    /// One raw round-trip. Returns an empty page once exhausted.
    pub async fn fetch_page(&mut self) -> EngineResult<Page> {
        let Some(request) = self.begin_fetch() else {
            return Ok(Page::default());
        };
        let store = Arc::clone(&self.store);
        let result = request.send(store.as_ref()).await;
        match self.complete_fetch(request, result)? {
            PageOutcome::Applied(page) => Ok(page),
            PageOutcome::Stale => Ok(Page {
                has_more: self.has_more,
                ..Page::default()
            }),
        }
    }

    /// Keeps fetching while the residual filter empties whole pages, up to
    /// `max_pages` raw round-trips, so callers see progress without an unbounded scan.
    pub async fn fetch_visible_page(&mut self, max_pages: usize) -> EngineResult<Page> {
        let mut scan = VisibleScan::new(max_pages, self.has_more);
        while self.has_more {
            let page = self.fetch_page().await?;
            if !scan.absorb(page) {
                break;
            }
        }
        Ok(scan.finish())
    }

    /// Drains the stream to its end and returns everything accumulated.
    pub async fn fetch_all(&mut self) -> EngineResult<&[TimestampedRecord]> {
        while self.has_more {
            self.fetch_page().await?;
        }
        Ok(&self.accumulated)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{FilterSpecification, DateRange, RecordStatus, ClassificationTag};
    use crate::filter::compile;
    use crate::filter::tests::{day, record, sample_records};
    use crate::ports::{PortError, Subscription, SubscriptionHandle};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Keyset-paginated in-memory store.
    pub(crate) struct VecStore {
        records: Vec<TimestampedRecord>,
        fail_next: AtomicBool,
        calls: AtomicUsize,
    }

    impl VecStore {
        pub(crate) fn new(records: Vec<TimestampedRecord>) -> Arc<Self> {
            Arc::new(Self {
                records,
                fail_next: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn fail_once(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RecordStoreService for VecStore {
        async fn query(
            &self,
            owner_id: Uuid,
            query: &PushdownQuery,
            cursor: Option<&QueryCursor>,
            page_size: usize,
            order: SortOrder,
        ) -> PortResult<StorePage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PortError::Unavailable("connection reset".into()));
            }
            let mut matching: Vec<TimestampedRecord> = self
                .records
                .iter()
                .filter(|r| r.owner_id == owner_id && query.matches(r))
                .cloned()
                .collect();
            matching.sort_by_key(|r| r.sort_key());
            if order == SortOrder::Descending {
                matching.reverse();
            }
            let records: Vec<TimestampedRecord> = matching
                .into_iter()
                .filter(|r| cursor.map_or(true, |c| order.is_after(&r.sort_key(), &c.last_key)))
                .take(page_size)
                .collect();
            Ok(StorePage {
                raw_count: records.len(),
                records,
                continuation: None,
            })
        }

        async fn subscribe(
            &self,
            _owner_id: Uuid,
            _predicate: PushdownQuery,
        ) -> PortResult<Subscription> {
            Err(PortError::Unexpected("subscriptions are not supported".into()))
        }

        async fn unsubscribe(&self, _handle: SubscriptionHandle) -> PortResult<()> {
            Ok(())
        }
    }

    fn owner() -> Uuid {
        Uuid::from_u128(999)
    }

    fn paginator(
        store: Arc<VecStore>,
        spec: &FilterSpecification,
        page_size: usize,
        sort_order: SortOrder,
    ) -> CursorPaginator {
        CursorPaginator::new(
            store,
            owner(),
            compile(spec).unwrap(),
            PaginatorOptions { page_size, sort_order },
        )
    }

    #[tokio::test]
    async fn test_drained_pages_equal_full_filter() {
        let records = sample_records();
        let store = VecStore::new(records.clone());
        let specs = vec![
            FilterSpecification::default(),
            FilterSpecification {
                statuses: [RecordStatus::Completed].into(),
                ..Default::default()
            },
            FilterSpecification {
                date_range: DateRange { from: Some(day(3)), to: Some(day(7)) },
                statuses: [RecordStatus::Pending, RecordStatus::Cancelled].into(),
                ..Default::default()
            },
            FilterSpecification {
                tags: [ClassificationTag::Sad].into(),
                search: Some("subject".into()),
                ..Default::default()
            },
            FilterSpecification {
                search: Some("no such text".into()),
                ..Default::default()
            },
        ];

        for spec in &specs {
            let filter = compile(spec).unwrap();
            for order in [SortOrder::Ascending, SortOrder::Descending] {
                let mut expected: Vec<TimestampedRecord> =
                    records.iter().filter(|r| filter.matches(r)).cloned().collect();
                expected.sort_by_key(|r| r.sort_key());
                if order == SortOrder::Descending {
                    expected.reverse();
                }

                for page_size in [1, 7, records.len()] {
                    let mut p = paginator(store.clone(), spec, page_size, order);
                    let mut guard = 0;
                    while p.has_more() {
                        p.fetch_page().await.unwrap();
                        guard += 1;
                        assert!(guard <= records.len() + 1, "paginator never finished");
                    }
                    let got = p.accumulated();
                    let unique: HashSet<Uuid> = got.iter().map(|r| r.id).collect();
                    assert_eq!(unique.len(), got.len(), "duplicates for {:?}", spec);
                    assert_eq!(got, expected.as_slice(), "spec {:?} size {}", spec, page_size);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_single_status_scenario_pages() {
        let mut records: Vec<TimestampedRecord> = (1..=3)
            .map(|n| record(n, day(4), RecordStatus::Completed))
            .collect();
        records.extend((4..=5).map(|n| record(n, day(4), RecordStatus::Pending)));
        let store = VecStore::new(records);
        let spec = FilterSpecification {
            statuses: [RecordStatus::Completed].into(),
            ..Default::default()
        };
        let mut p = paginator(store, &spec, 2, SortOrder::Ascending);
        assert_eq!(p.filter().pushdown.status, Some(RecordStatus::Completed));
        assert!(p.filter().residual.is_always_true());

        let first = p.fetch_page().await.unwrap();
        assert_eq!((first.records.len(), first.has_more), (2, true));
        let second = p.fetch_page().await.unwrap();
        assert_eq!((second.records.len(), second.has_more), (1, false));
        assert_eq!(p.accumulated().len(), 3);
    }

    #[tokio::test]
    async fn test_short_filtered_page_keeps_has_more() {
        let records: Vec<TimestampedRecord> = (1..=6)
            .map(|n| {
                let status = if n == 1 { RecordStatus::Completed } else { RecordStatus::Pending };
                record(n, day(n as u32), status)
            })
            .collect();
        let store = VecStore::new(records);
        let spec = FilterSpecification {
            statuses: [RecordStatus::Completed, RecordStatus::Cancelled].into(),
            ..Default::default()
        };
        let mut p = paginator(store, &spec, 3, SortOrder::Ascending);
        let page = p.fetch_page().await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.raw_count, 3);
        assert!(page.has_more);
        assert_eq!(p.cursor().unwrap().last_key.id, Uuid::from_u128(3));
    }

    #[tokio::test]
    async fn test_reset_clears_even_for_narrower_query() {
        let store = VecStore::new(sample_records());
        let mut p = paginator(store, &FilterSpecification::default(), 5, SortOrder::Ascending);
        p.fetch_page().await.unwrap();
        assert!(!p.accumulated().is_empty());
        assert!(p.cursor().is_some());

        let narrower = compile(&FilterSpecification {
            statuses: [RecordStatus::Completed].into(),
            ..Default::default()
        })
        .unwrap();
        assert!(p.reset_if_changed(narrower.clone()));
        assert!(p.accumulated().is_empty());
        assert!(p.cursor().is_none());
        assert!(p.has_more());
        assert!(!p.reset_if_changed(narrower));
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let store = VecStore::new(sample_records());
        let mut p = paginator(
            store.clone(),
            &FilterSpecification::default(),
            4,
            SortOrder::Descending,
        );

        let request = p.begin_fetch().unwrap();
        let result = request.send(store.as_ref()).await;
        p.reset(compile(&FilterSpecification {
            statuses: [RecordStatus::Pending].into(),
            ..Default::default()
        })
        .unwrap());

        assert_eq!(p.complete_fetch(request, result).unwrap(), PageOutcome::Stale);
        assert!(p.accumulated().is_empty());
        assert!(p.cursor().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_completion_for_same_cursor_is_stale() {
        let store = VecStore::new(sample_records());
        let mut p = paginator(
            store.clone(),
            &FilterSpecification::default(),
            4,
            SortOrder::Ascending,
        );

        let first = p.begin_fetch().unwrap();
        let second = p.begin_fetch().unwrap();
        let a = first.send(store.as_ref()).await;
        let b = second.send(store.as_ref()).await;
        assert!(matches!(p.complete_fetch(first, a).unwrap(), PageOutcome::Applied(_)));
        assert_eq!(p.complete_fetch(second, b).unwrap(), PageOutcome::Stale);
        assert_eq!(p.accumulated().len(), 4);
    }

    #[tokio::test]
    async fn test_adapter_failure_leaves_state_unchanged() {
        let store = VecStore::new(sample_records());
        let mut p = paginator(
            store.clone(),
            &FilterSpecification::default(),
            5,
            SortOrder::Ascending,
        );
        p.fetch_page().await.unwrap();
        let cursor = p.cursor().cloned();
        let seen = p.accumulated().to_vec();

        store.fail_once();
        let err = p.fetch_page().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, EngineError::AdapterUnavailable(_)));
        assert_eq!(p.cursor().cloned(), cursor);
        assert_eq!(p.accumulated(), seen.as_slice());
        assert!(p.has_more());

        let retry = p.fetch_page().await.unwrap();
        assert_eq!(retry.records.len(), 5);
        assert_eq!(p.accumulated().len(), 10);
    }

    #[tokio::test]
    async fn test_visible_page_skips_empty_filtered_pages() {
        let records: Vec<TimestampedRecord> = (1..=9)
            .map(|n| {
                let status = if n == 8 { RecordStatus::Cancelled } else { RecordStatus::Pending };
                record(n, day(n as u32), status)
            })
            .collect();
        let store = VecStore::new(records);
        let spec = FilterSpecification {
            statuses: [RecordStatus::Cancelled, RecordStatus::Completed].into(),
            ..Default::default()
        };

        let mut bounded = paginator(store.clone(), &spec, 2, SortOrder::Ascending);
        let page = bounded.fetch_visible_page(2).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.raw_count, 4);
        assert!(page.has_more);

        let mut p = paginator(store.clone(), &spec, 2, SortOrder::Ascending);
        let page = p.fetch_visible_page(10).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.raw_count, 8);
        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_visible_scan_stops_at_visible_page_end_or_cap() {
        let empty = Page {
            records: Vec::new(),
            raw_count: 2,
            has_more: true,
        };
        let visible = Page {
            records: vec![record(1, day(1), RecordStatus::Completed)],
            raw_count: 2,
            has_more: true,
        };

        let mut scan = VisibleScan::new(3, true);
        assert!(scan.absorb(empty.clone()));
        assert!(!scan.absorb(visible));
        let page = scan.finish();
        assert_eq!(page.raw_count, 4);
        assert_eq!(page.records.len(), 1);

        let mut capped = VisibleScan::new(2, true);
        assert!(capped.absorb(empty.clone()));
        assert!(!capped.absorb(empty.clone()));
        assert!(capped.finish().has_more);

        let mut ended = VisibleScan::new(5, true);
        assert!(!ended.absorb(Page {
            has_more: false,
            ..empty
        }));
    }

    #[tokio::test]
    async fn test_exhausted_paginator_does_not_query() {
        let store = VecStore::new(vec![record(1, day(1), RecordStatus::Completed)]);
        let mut p = paginator(
            store.clone(),
            &FilterSpecification::default(),
            10,
            SortOrder::Ascending,
        );
        assert_eq!(p.fetch_all().await.unwrap().len(), 1);
        assert!(p.begin_fetch().is_none());
        let calls = store.calls.load(Ordering::SeqCst);
        let page = p.fetch_page().await.unwrap();
        assert!(page.records.is_empty() && !page.has_more);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls);
    }
}
