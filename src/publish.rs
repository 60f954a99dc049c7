//! Snapshot publishing.
//!
//! The flush thread periodically builds a [`StatsSnapshot`] and broadcasts
//! it as JSON. Any number of subscribers (a UI, a logger, tests) can listen;
//! with nobody subscribed a publish is a no-op.

use crate::monitor::{SourceHealth, SourceStatus};
use crate::store::{
    Aggregator, BucketStore, Category, CategoryTotals, Delta, Granularity, PeriodKey, ScoreWeights,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;

/// Messages kept for slow subscribers before they start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Broadcasts JSON updates to subscribers.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<String>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Sends `{type, data, timestamp}` to all subscribers.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, update_type: &str, data: &impl Serialize) -> usize {
        if self.tx.receiver_count() == 0 {
            return 0;
        }

        let message = serde_json::json!({
            "type": update_type,
            "data": data,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&message) {
            Ok(json) => self.tx.send(json).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize update");
                0
            }
        }
    }
}

/// Live counts of the current period of one granularity.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub granularity: Granularity,
    pub period: String,
    /// Already in the database.
    pub stored: CategoryTotals,
    /// Counted but not yet flushed.
    pub pending: CategoryTotals,
    /// `stored + pending`.
    pub totals: CategoryTotals,
    pub score: u64,
    pub source: SourceStatus,
    pub storage_ok: bool,
    pub storage_error: Option<String>,
    pub pending_buckets: usize,
}

/// Builds the snapshot for the period of `granularity` containing `now`.
///
/// A failing store does not fail the snapshot: stored totals read as zero
/// and `storage_ok` is false.
pub fn build_snapshot<S: BucketStore + ?Sized>(
    granularity: Granularity,
    now: NaiveDateTime,
    aggregator: &Aggregator,
    store: &S,
    health: &SourceHealth,
    weights: ScoreWeights,
    last_flush_error: Option<&str>,
) -> StatsSnapshot {
    let period = PeriodKey::containing_naive(granularity, now);
    let mut stored = CategoryTotals::default();
    let mut read_error = None;

    for category in Category::ALL {
        match store.read_range(category, period, period) {
            Ok(rows) => {
                for row in rows {
                    stored.add(category, Delta::new(row.count, row.total_magnitude));
                }
            }
            Err(e) => {
                read_error = Some(e.to_string());
                break;
            }
        }
    }

    let mut pending = CategoryTotals::default();
    let mut pending_buckets = 0;
    for delta in aggregator.pending() {
        if delta.period.granularity != granularity {
            continue;
        }
        pending_buckets += 1;
        if delta.period == period {
            pending.add(delta.category, delta.delta);
        }
    }

    let mut totals = stored;
    totals.merge(&pending);

    let storage_error = read_error.or_else(|| last_flush_error.map(str::to_string));

    StatsSnapshot {
        granularity,
        period: period.label(),
        stored,
        pending,
        score: totals.score(weights),
        totals,
        source: health.status(),
        storage_ok: storage_error.is_none(),
        storage_error,
        pending_buckets,
    }
}
