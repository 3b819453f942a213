//! crates/session_ledger_core/src/filter.rs
//!
//! The filter compiler. Splits a `FilterSpecification` into the part the store
//! can evaluate natively (pushdown) and the part evaluated client-side on every
//! fetched page (residual).

use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::debug;

use crate::domain::{
    ClassificationTag, FilterSpecification, PushdownQuery, RecordStatus, TimestampedRecord,
};
use crate::error::{EngineError, EngineResult};

/// Client-side constraints. Every constraint narrows; none can widen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidualPredicate {
    statuses: BTreeSet<RecordStatus>,
    tags: BTreeSet<ClassificationTag>,
    search: Option<String>,
    subject_name: Option<String>,
}

impl ResidualPredicate {
    pub fn always() -> Self {
        Self::default()
    }

    pub fn is_always_true(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &TimestampedRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }

        if !self.tags.is_empty()
            && !record
                .classification_tags
                .iter()
                .any(|tag| self.tags.contains(tag))
        {
            return false;
        }

        if let Some(needle) = &self.subject_name {
            if !contains_folded(&record.subject_name, needle) {
                return false;
            }
        }

        if let Some(needle) = &self.search {
            let hit = contains_folded(&record.subject_name, needle)
                || record
                    .free_text
                    .values()
                    .any(|text| contains_folded(text, needle));
            if !hit {
                return false;
            }
        }

        true
    }
}

/// `needle` is expected to be lowercased already.
fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// A specification split into its store-native and client-side halves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledFilter {
    pub pushdown: PushdownQuery,
    pub residual: ResidualPredicate,
}

impl CompiledFilter {
    /// The filter of an empty specification: everything for the owner.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Full evaluation (pushdown and residual) of a single record.
    pub fn matches(&self, record: &TimestampedRecord) -> bool {
        self.pushdown.matches(record) && self.residual.matches(record)
    }

    /// Narrows the lower date bound to at least `earliest`.
    pub fn with_lookback(mut self, earliest: NaiveDate) -> Self {
        self.pushdown.date_from = Some(match self.pushdown.date_from {
            Some(from) if from > earliest => from,
            _ => earliest,
        });
        self
    }
}

/// Rejects specifications that are malformed before they reach the store.
pub fn validate(spec: &FilterSpecification) -> EngineResult<()> {
    if let (Some(from), Some(to)) = (spec.date_range.from, spec.date_range.to) {
        if to < from {
            return Err(EngineError::InvalidFilterSpecification(format!(
                "date range ends ({to}) before it starts ({from})"
            )));
        }
    }
    Ok(())
}

fn normalized(term: &Option<String>) -> Option<String> {
    term.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Compiles a specification into a pushdown query and a residual predicate.
///
/// The store only supports equality and range predicates, and is assumed unable to
/// combine set membership with the date range, so a status set is pushed down
/// only when it holds exactly one value.
pub fn compile(spec: &FilterSpecification) -> EngineResult<CompiledFilter> {
    validate(spec)?;

    let mut pushdown = PushdownQuery {
        date_from: spec.date_range.from,
        date_to: spec.date_range.to,
        status: None,
    };
    let mut residual = ResidualPredicate {
        tags: spec.tags.clone(),
        search: normalized(&spec.search),
        subject_name: normalized(&spec.subject_name),
        ..ResidualPredicate::default()
    };

    match spec.statuses.len() {
        0 => {}
        1 => pushdown.status = spec.statuses.iter().next().copied(),
        _ => residual.statuses = spec.statuses.clone(),
    }

    debug!(
        ?pushdown,
        residual_always_true = residual.is_always_true(),
        "Compiled filter specification"
    );

    Ok(CompiledFilter { pushdown, residual })
}
