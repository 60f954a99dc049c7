//! Data storage and aggregation module.
//!
//! Counts input events in memory and hands the accumulated deltas to a
//! [`BucketStore`] for persistence.

pub mod aggregator;
pub mod summary;
pub mod types;

pub use aggregator::*;
pub use summary::*;
pub use types::*;

use crate::error::{StoreError, StoreResult};
use chrono::NaiveDateTime;

/// Persistent home of aggregated buckets.
pub trait BucketStore: Send + Sync {
    /// Adds every delta to its bucket in one atomic step.
    ///
    /// Deltas addressed to sealed periods are not applied and are returned
    /// to the caller. On error nothing was applied.
    fn apply_batch(&self, deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>>;

    /// Buckets of `category` with periods in `[start, end]`, oldest first.
    fn read_range(
        &self,
        category: Category,
        start: PeriodKey,
        end: PeriodKey,
    ) -> StoreResult<Vec<AggregateBucket>>;

    /// Seals periods that can no longer receive events.
    fn seal_closed_periods(&self, _now: NaiveDateTime) -> StoreResult<usize> {
        Ok(0)
    }
}

/// Stand-in used when the database could not be opened.
///
/// Every call fails, so the aggregator keeps its counts in memory.
#[derive(Debug, Clone)]
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> StoreError {
        StoreError::StorageUnavailable(self.reason.clone())
    }
}

impl BucketStore for UnavailableStore {
    fn apply_batch(&self, _deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>> {
        Err(self.error())
    }

    fn read_range(
        &self,
        _category: Category,
        _start: PeriodKey,
        _end: PeriodKey,
    ) -> StoreResult<Vec<AggregateBucket>> {
        Err(self.error())
    }
}

