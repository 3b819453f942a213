//! Live metrics feed against the in-memory store, on tokio's paused clock.

mod common;

use chrono::Duration as ChronoDuration;
use common::{now, owner, record, today};
use dashboard_lib::adapters::MemoryRecordStore;
use dashboard_lib::views::{FeedSettings, MetricsFeed, MetricsView};
use session_ledger_core::metrics::MetricsConfig;
use session_ledger_core::{
    FilterSpecification, FixedClock, PortError, RecordStatus, TimestampedRecord,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const DEBOUNCE: Duration = Duration::from_millis(1000);
const BACKOFF: Duration = Duration::from_millis(2000);

fn settings() -> FeedSettings {
    FeedSettings {
        metrics: MetricsConfig {
            debounce: DEBOUNCE,
            recent_capacity: 3,
            ..MetricsConfig::default()
        },
        resubscribe_backoff: BACKOFF,
        ..FeedSettings::default()
    }
}

fn seed() -> Vec<TimestampedRecord> {
    let mut records = vec![
        record(1, today(), RecordStatus::Completed),
        record(2, today(), RecordStatus::Pending),
        record(3, today() - ChronoDuration::days(3), RecordStatus::Completed),
    ];
    // Beyond the 60-day lookback; never loaded.
    records.push(record(4, today() - ChronoDuration::days(120), RecordStatus::Completed));
    records
}

fn start(store: &Arc<MemoryRecordStore>, scope: FilterSpecification) -> MetricsFeed {
    MetricsFeed::spawn(
        store.clone(),
        owner(),
        scope,
        settings(),
        Arc::new(FixedClock(now())),
    )
    .unwrap()
}

async fn wait_until(
    rx: &mut watch::Receiver<MetricsView>,
    condition: impl FnMut(&MetricsView) -> bool,
) -> MetricsView {
    timeout(Duration::from_secs(60), rx.wait_for(condition))
        .await
        .expect("view never reached the expected state")
        .expect("feed stopped publishing")
        .clone()
}

fn loaded(view: &MetricsView) -> bool {
    view.snapshot.is_some() && !view.loading
}

fn revision(view: &MetricsView) -> u64 {
    view.snapshot.as_ref().map_or(0, |s| s.revision)
}

#[tokio::test(start_paused = true)]
async fn test_initial_load_covers_lookback_only() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();

    let view = wait_until(&mut rx, loaded).await;
    let snapshot = view.snapshot.unwrap();
    assert_eq!(snapshot.today.current, 2);
    assert_eq!(snapshot.last_7_days.current, 3);
    assert_eq!(snapshot.total_records, 3);
    assert!(view.error.is_none());
    assert_eq!(store.subscriber_count().await, 1);

    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_events_recomputes_once() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    let before = revision(&wait_until(&mut rx, loaded).await);

    for n in 10..15 {
        store.upsert(record(n, today(), RecordStatus::Completed)).await;
    }
    sleep(DEBOUNCE * 5).await;

    let view = feed.current();
    let snapshot = view.snapshot.unwrap();
    assert_eq!(snapshot.revision, before + 1);
    assert_eq!(snapshot.today.current, 7);
    let recent: Vec<u128> = view.recent_events.iter().map(|e| e.record.id.as_u128()).collect();
    assert_eq!(recent, vec![12, 13, 14]);

    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_spaced_events_recompute_separately() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    let before = revision(&wait_until(&mut rx, loaded).await);

    store.upsert(record(20, today(), RecordStatus::Completed)).await;
    sleep(DEBOUNCE * 2).await;
    store.upsert(record(21, today(), RecordStatus::Completed)).await;
    sleep(DEBOUNCE * 2).await;

    assert_eq!(revision(&feed.current()), before + 2);
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_resubscribes_and_reloads() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    wait_until(&mut rx, loaded).await;

    store.drop_subscriptions().await;
    let dropped = wait_until(&mut rx, |v| v.error.is_some()).await;
    assert!(dropped.error.unwrap().contains("Subscription dropped"));
    // The last snapshot stays visible while the feed recovers.
    assert!(dropped.snapshot.is_some());

    // Written while nobody is listening: only a full reload can see it.
    store.upsert(record(30, today(), RecordStatus::Completed)).await;

    let recovered = wait_until(&mut rx, |v| {
        v.error.is_none()
            && !v.loading
            && v.snapshot.as_ref().map_or(false, |s| s.today.current == 3)
    })
    .await;
    assert_eq!(recovered.snapshot.unwrap().total_records, 4);
    assert_eq!(store.subscriber_count().await, 1);

    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_last_snapshot() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    let first = wait_until(&mut rx, loaded).await;

    store
        .fail_next_queries(1, PortError::Unavailable("connection refused".into()))
        .await;
    feed.refresh();
    let failed = wait_until(&mut rx, |v| v.error.is_some() && !v.loading).await;
    assert_eq!(failed.snapshot, first.snapshot);

    feed.clear_error();
    feed.refresh();
    let healed = wait_until(&mut rx, |v| v.error.is_none() && revision(v) > revision(&first)).await;
    assert_eq!(healed.snapshot.unwrap().total_records, 3);

    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scope_change_reloads_with_new_filter() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    wait_until(&mut rx, loaded).await;

    feed.set_scope(FilterSpecification {
        statuses: [RecordStatus::Pending].into(),
        ..Default::default()
    })
    .unwrap();
    let scoped = wait_until(&mut rx, |v| {
        loaded(v) && v.snapshot.as_ref().map_or(false, |s| s.total_records == 1)
    })
    .await;
    assert_eq!(scoped.snapshot.unwrap().success_ratio, 0.0);

    // Events outside the new scope do not reach the list of recent activity.
    store.upsert(record(40, today(), RecordStatus::Completed)).await;
    sleep(DEBOUNCE * 2).await;
    assert!(feed.current().recent_events.is_empty());

    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_unsubscribes_and_goes_silent() {
    let store = Arc::new(MemoryRecordStore::with_records(seed()));
    let feed = start(&store, FilterSpecification::default());
    let mut rx = feed.subscribe();
    let last = revision(&wait_until(&mut rx, loaded).await);

    feed.shutdown().await;
    assert_eq!(store.subscriber_count().await, 0);

    store.upsert(record(50, today(), RecordStatus::Completed)).await;
    sleep(DEBOUNCE * 5).await;
    assert!(rx.changed().await.is_err());
    assert_eq!(revision(&rx.borrow()), last);
}
