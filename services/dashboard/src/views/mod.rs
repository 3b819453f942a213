//! services/dashboard/src/views/mod.rs
//!
//! View controllers: the session history list and the live metrics overview.

pub mod history;
pub mod metrics_feed;

pub use history::{HistoryState, HistoryView};
pub use metrics_feed::{FeedSettings, MetricsFeed, MetricsView};
