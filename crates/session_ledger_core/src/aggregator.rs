//! crates/session_ledger_core/src/aggregator.rs
//!
//! State machine behind the live metrics view. It owns its own copy of the
//! records in scope, a bounded list of recent live events, and the debounce
//! timer that coalesces bursts of events into a single recompute.
//!
//! Counters are never patched in place: every snapshot is recomputed from the
//! raw records, because window boundaries move with the clock.

use chrono::NaiveDateTime;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{RecordEvent, TimestampedRecord};
use crate::error::EngineResult;
use crate::filter::CompiledFilter;
use crate::metrics::{compute_snapshot, lookback_start, MetricsConfig, MetricsSnapshot};

/// Proof that a refresh was requested at a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    generation: u64,
}

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct RollingMetricsAggregator {
    config: MetricsConfig,
    scope: CompiledFilter,
    records: HashMap<Uuid, TimestampedRecord>,
    recent_events: VecDeque<RecordEvent>,
    /// Records touched by live events while a refresh is in flight.
    replay: Vec<TimestampedRecord>,
    refresh_in_flight: bool,
    generation: u64,
    debounce_deadline: Option<Instant>,
    /// When the current burst armed the timer; bounds how far it can slide.
    burst_started: Option<Instant>,
    snapshot: Option<MetricsSnapshot>,
    revision: u64,
}

impl RollingMetricsAggregator {
    pub fn new(config: MetricsConfig, scope: CompiledFilter) -> Self {
        Self {
            recent_events: VecDeque::with_capacity(config.recent_capacity),
            config,
            scope,
            records: HashMap::new(),
            replay: Vec::new(),
            refresh_in_flight: false,
            generation: 0,
            debounce_deadline: None,
            burst_started: None,
            snapshot: None,
            revision: 0,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn scope(&self) -> &CompiledFilter {
        &self.scope
    }

    pub fn snapshot(&self) -> Option<&MetricsSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn recent_events(&self) -> impl Iterator<Item = &RecordEvent> {
        self.recent_events.iter()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of recomputes performed so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The instant `poll` should be called at, if any.
    ///
    /// `None` while a full reload is in flight: its completion recomputes.
    pub fn debounce_deadline(&self) -> Option<Instant> {
        if self.refresh_in_flight {
            return None;
        }
        self.debounce_deadline
    }

    /// Forgets everything and adopts `scope`. In-flight refreshes become stale.
    pub fn reset(&mut self, scope: CompiledFilter) {
        self.scope = scope;
        self.records.clear();
        self.recent_events.clear();
        self.replay.clear();
        self.refresh_in_flight = false;
        self.clear_timer();
        self.snapshot = None;
        self.generation += 1;
        debug!(generation = self.generation, "Metrics aggregator reset");
    }

    /// Full recompute from a complete set of records.
    pub fn load(
        &mut self,
        records: Vec<TimestampedRecord>,
        now: NaiveDateTime,
    ) -> &MetricsSnapshot {
        self.replace_records(records);
        self.recompute(now)
    }

    /// Marks the start of an asynchronous full reload.
    ///
    /// A newer `begin_refresh` or a `reset` supersedes the returned ticket.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        self.refresh_in_flight = true;
        self.replay.clear();
        RefreshTicket {
            generation: self.generation,
        }
    }

    /// Applies the outcome of a reload started with `ticket`.
    ///
    /// Returns `Ok(None)` when the ticket was superseded; its records are dropped.
    /// On failure the previous records and snapshot stay in place.
    pub fn finish_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: EngineResult<Vec<TimestampedRecord>>,
        now: NaiveDateTime,
    ) -> EngineResult<Option<&MetricsSnapshot>> {
        if ticket.generation != self.generation {
            warn!(
                ticket = ticket.generation,
                current = self.generation,
                "Dropping superseded metrics refresh"
            );
            return Ok(None);
        }
        self.refresh_in_flight = false;

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                self.replay.clear();
                // Live events alone are not a snapshot worth publishing.
                if self.snapshot.is_none() {
                    self.clear_timer();
                }
                return Err(e);
            }
        };

        let replay = std::mem::take(&mut self.replay);
        self.replace_records(records);
        for record in replay {
            self.upsert(record);
        }
        Ok(Some(self.recompute(now)))
    }

    /// Folds one live event into the record set and (re)arms the debounce timer.
    pub fn nudge(&mut self, event: RecordEvent, at: Instant) {
        let in_scope = self.scope.matches(&event.record);
        if self.refresh_in_flight {
            self.replay.push(event.record.clone());
        }
        self.upsert(event.record.clone());

        if in_scope {
            self.recent_events.push_back(event);
            while self.recent_events.len() > self.config.recent_capacity {
                self.recent_events.pop_front();
            }
        }

        let started = *self.burst_started.get_or_insert(at);
        let max_wait = self.config.debounce_max_wait.max(self.config.debounce);
        self.debounce_deadline = Some((at + self.config.debounce).min(started + max_wait));
    }

    /// Recomputes once the debounce timer has expired at `at`.
    ///
    /// Does nothing while a full reload is in flight; `finish_refresh` folds
    /// the pending events in and recomputes.
    pub fn poll(&mut self, at: Instant, now: NaiveDateTime) -> Option<&MetricsSnapshot> {
        if self.refresh_in_flight {
            return None;
        }
        match self.debounce_deadline {
            Some(deadline) if at >= deadline => Some(self.recompute(now)),
            _ => None,
        }
    }

    fn clear_timer(&mut self) {
        self.debounce_deadline = None;
        self.burst_started = None;
    }

    fn replace_records(&mut self, records: Vec<TimestampedRecord>) {
        self.records.clear();
        for record in records {
            self.upsert(record);
        }
    }

    /// Last writer by `updated_at` wins, so late deliveries cannot roll a record back.
    fn upsert(&mut self, record: TimestampedRecord) {
        if !self.scope.matches(&record) {
            self.records.remove(&record.id);
            return;
        }
        match self.records.get(&record.id) {
            Some(existing) if existing.updated_at > record.updated_at => {}
            _ => {
                self.records.insert(record.id, record);
            }
        }
    }

    fn recompute(&mut self, now: NaiveDateTime) -> &MetricsSnapshot {
        let horizon = lookback_start(now.date());
        self.records.retain(|_, r| r.occurred_on >= horizon);

        self.revision += 1;
        self.clear_timer();
        let mut snapshot = compute_snapshot(self.records.values(), now, &self.config);
        snapshot.revision = self.revision;
        debug!(
            revision = self.revision,
            records = self.records.len(),
            health = snapshot.health.as_str(),
            "Metrics recomputed"
        );
        self.snapshot.insert(snapshot)
    }
}
