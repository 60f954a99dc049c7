//! In-memory counter aggregation.
//!
//! Event sources call [`Aggregator::record`] from OS hook threads. Each call
//! takes a short lock and adds to a fixed slot for the current period, so the
//! steady state never allocates. The flush thread periodically moves every
//! pending delta into a [`BucketStore`] in one batch.

use super::types::{BucketDelta, Category, Delta, EventRecord, Granularity, InputEvent, PeriodKey};
use super::BucketStore;
use crate::config::{AppConfig, MoveMagnitude};
use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Initial room for periods that are not the current one of their lane.
const SPILL_CAPACITY: usize = 64;

/// Current-period slot of one granularity.
#[derive(Debug, Clone, Copy, Default)]
struct Lane {
    period: Option<PeriodKey>,
    deltas: [Delta; 3],
}

#[derive(Debug)]
struct Pending {
    lanes: Vec<Lane>,
    spilled: HashMap<(PeriodKey, Category), Delta>,
}

impl Pending {
    fn add(&mut self, lane_idx: usize, period: PeriodKey, category: Category, delta: Delta) {
        let lane = &mut self.lanes[lane_idx];
        match lane.period {
            Some(current) if current == period => {}
            None => lane.period = Some(period),
            Some(current) if current < period => {
                // Rollover: the old period moves out of the way
                for cat in Category::ALL {
                    let old = lane.deltas[cat.index()];
                    if !old.is_zero() {
                        self.spilled.entry((current, cat)).or_default().add(old);
                    }
                }
                lane.deltas = [Delta::default(); 3];
                lane.period = Some(period);
            }
            Some(_) => {
                // Late event for an earlier period
                self.spilled.entry((period, category)).or_default().add(delta);
                return;
            }
        }
        lane.deltas[category.index()].add(delta);
    }

    fn take_all(&mut self) -> Vec<BucketDelta> {
        let mut out: Vec<BucketDelta> = self
            .spilled
            .drain()
            .map(|((period, category), delta)| BucketDelta {
                period,
                category,
                delta,
            })
            .collect();

        for lane in &mut self.lanes {
            let Some(period) = lane.period else {
                continue;
            };
            for category in Category::ALL {
                let delta = std::mem::take(&mut lane.deltas[category.index()]);
                if !delta.is_zero() {
                    out.push(BucketDelta {
                        period,
                        category,
                        delta,
                    });
                }
            }
        }

        out
    }

    fn restore(&mut self, deltas: Vec<BucketDelta>) {
        for d in deltas {
            self.spilled
                .entry((d.period, d.category))
                .or_default()
                .add(d.delta);
        }
    }

    fn collect(&self) -> Vec<BucketDelta> {
        let mut merged: HashMap<(PeriodKey, Category), Delta> = self.spilled.clone();
        for lane in &self.lanes {
            let Some(period) = lane.period else {
                continue;
            };
            for category in Category::ALL {
                let delta = lane.deltas[category.index()];
                if !delta.is_zero() {
                    merged.entry((period, category)).or_default().add(delta);
                }
            }
        }

        let mut out: Vec<BucketDelta> = merged
            .into_iter()
            .map(|((period, category), delta)| BucketDelta {
                period,
                category,
                delta,
            })
            .collect();
        out.sort_by(|a, b| a.period.cmp(&b.period).then(a.category.cmp(&b.category)));
        out
    }
}

/// Outcome of one successful flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Buckets written to the store.
    pub applied: usize,
    /// Deltas dropped because their period was already sealed.
    pub dropped: Vec<BucketDelta>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.dropped.is_empty()
    }
}

/// Thread-safe counter aggregator.
#[derive(Debug)]
pub struct Aggregator {
    granularities: Vec<Granularity>,
    move_magnitude: MoveMagnitude,
    pending: Mutex<Pending>,
    flush_lock: Mutex<()>,
}

impl Aggregator {
    /// Creates an aggregator counting under each of `granularities`.
    ///
    /// Duplicate granularities are counted once.
    pub fn new(granularities: &[Granularity], move_magnitude: MoveMagnitude) -> Self {
        let mut unique: Vec<Granularity> = Vec::with_capacity(granularities.len());
        for g in granularities {
            if !unique.contains(g) {
                unique.push(*g);
            }
        }

        let pending = Pending {
            lanes: vec![Lane::default(); unique.len()],
            spilled: HashMap::with_capacity(SPILL_CAPACITY),
        };

        Self {
            granularities: unique,
            move_magnitude,
            pending: Mutex::new(pending),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.granularities, config.move_magnitude)
    }

    pub fn granularities(&self) -> &[Granularity] {
        &self.granularities
    }

    /// Counts one event under every configured granularity.
    #[inline]
    pub fn record(&self, record: EventRecord) {
        let category = record.event.category();
        let magnitude = match record.event {
            InputEvent::MouseMove { distance_px } => match self.move_magnitude {
                MoveMagnitude::Distance if distance_px.is_finite() => distance_px.max(0.0),
                MoveMagnitude::Distance => 0.0,
                MoveMagnitude::Count => 1.0,
            },
            InputEvent::KeyPress | InputEvent::MouseClick => 0.0,
        };
        let delta = Delta::new(1, magnitude);
        let at = record.at.naive_local();

        let mut pending = self.pending.lock();
        for (idx, granularity) in self.granularities.iter().enumerate() {
            let period = PeriodKey::containing_naive(*granularity, at);
            pending.add(idx, period, category, delta);
        }
    }

    /// Moves every pending delta into `store` in one batch.
    ///
    /// On failure the deltas are merged back into pending, so events recorded
    /// during the failed attempt are kept as well. Deltas addressed to sealed
    /// periods are dropped and reported.
    pub fn flush<S: BucketStore + ?Sized>(&self, store: &S) -> Result<FlushReport, StoreError> {
        let _serial = self.flush_lock.lock();

        let batch = self.pending.lock().take_all();
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        match store.apply_batch(&batch) {
            Ok(dropped) => {
                for d in &dropped {
                    tracing::warn!(
                        period = %d.period,
                        granularity = %d.period.granularity,
                        category = %d.category,
                        count = d.delta.count,
                        "Dropping late events for sealed period"
                    );
                }
                Ok(FlushReport {
                    applied: batch.len() - dropped.len(),
                    dropped,
                })
            }
            Err(e) => {
                tracing::debug!(buckets = batch.len(), "Flush failed, keeping deltas");
                self.pending.lock().restore(batch);
                Err(e)
            }
        }
    }

    /// Snapshot of unflushed deltas, ordered by period then category.
    pub fn pending(&self) -> Vec<BucketDelta> {
        self.pending.lock().collect()
    }

    /// Unflushed total of one category, summed over all periods of `granularity`.
    pub fn pending_total(&self, granularity: Granularity, category: Category) -> Delta {
        let pending = self.pending.lock();
        let mut total = Delta::default();

        for (idx, g) in self.granularities.iter().enumerate() {
            if *g == granularity && pending.lanes[idx].period.is_some() {
                total.add(pending.lanes[idx].deltas[category.index()]);
            }
        }
        for ((period, cat), delta) in &pending.spilled {
            if period.granularity == granularity && *cat == category {
                total.add(*delta);
            }
        }

        total
    }

    /// Returns true if nothing is waiting to be flushed.
    pub fn is_empty(&self) -> bool {
        let pending = self.pending.lock();
        pending.spilled.is_empty()
            && pending
                .lanes
                .iter()
                .all(|lane| lane.deltas.iter().all(Delta::is_zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::StoreResult;
    use crate::store::AggregateBucket;
    use chrono::{Local, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> chrono::DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, s)
                    .unwrap(),
            )
            .earliest()
            .unwrap()
    }

    fn day(d: u32) -> PeriodKey {
        PeriodKey::for_date(Granularity::Day, NaiveDate::from_ymd_opt(2024, 5, d).unwrap())
    }

    /// Store that fails a set number of times before delegating.
    struct FlakyStore {
        inner: Database,
        failures_left: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: Database::open_in_memory().unwrap(),
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BucketStore for FlakyStore {
        fn apply_batch(&self, deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::StorageUnavailable("disk busy".into()));
            }
            self.inner.apply_batch(deltas)
        }

        fn read_range(
            &self,
            category: Category,
            start: PeriodKey,
            end: PeriodKey,
        ) -> StoreResult<Vec<AggregateBucket>> {
            self.inner.read_range(category, start, end)
        }
    }

    #[test]
    fn test_record_then_flush_adds_to_store() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(1), Category::KeyPress, 5, 0.0).unwrap();

        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        for _ in 0..3 {
            agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 0, 0)));
        }

        let report = agg.flush(&db).unwrap();
        assert_eq!(report.applied, 1);

        let rows = db.read_range(Category::KeyPress, day(1), day(1)).unwrap();
        assert_eq!(rows[0].count, 8);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_empty_flush_touches_nothing() {
        let store = FlakyStore::new(0);
        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);

        let report = agg.flush(&store).unwrap();
        assert!(report.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_flush_is_noop() {
        let db = Database::open_in_memory().unwrap();
        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        agg.record(EventRecord::new(InputEvent::MouseClick, at(2024, 5, 1, 9, 0, 0)));

        agg.flush(&db).unwrap();
        agg.flush(&db).unwrap();

        let rows = db.read_range(Category::MouseClick, day(1), day(1)).unwrap();
        assert_eq!(rows[0].count, 1);
    }

    #[test]
    fn test_failed_flush_keeps_deltas() {
        let store = FlakyStore::new(1);
        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        for _ in 0..4 {
            agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 0, 0)));
        }

        let err = agg.flush(&store).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert_eq!(agg.pending_total(Granularity::Day, Category::KeyPress).count, 4);

        // Events keep arriving between attempts
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 0, 1)));
        agg.flush(&store).unwrap();

        let rows = store
            .read_range(Category::KeyPress, day(1), day(1))
            .unwrap();
        assert_eq!(rows[0].count, 5);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_midnight_belongs_to_new_day() {
        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 23, 59, 59)));
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 2, 0, 0, 0)));

        let pending = agg.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].period, day(1));
        assert_eq!(pending[0].delta.count, 1);
        assert_eq!(pending[1].period, day(2));
        assert_eq!(pending[1].delta.count, 1);
    }

    #[test]
    fn test_late_event_after_rollover() {
        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 12, 0, 0)));
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 2, 12, 0, 0)));
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 23, 0, 0)));

        let pending = agg.pending();
        assert_eq!(pending[0].period, day(1));
        assert_eq!(pending[0].delta.count, 2);
        assert_eq!(pending[1].delta.count, 1);
    }

    #[test]
    fn test_every_granularity_counted() {
        let agg = Aggregator::new(
            &[Granularity::Day, Granularity::FifteenMinutes, Granularity::Day],
            MoveMagnitude::Distance,
        );
        assert_eq!(agg.granularities().len(), 2);

        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 7, 0)));
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 20, 0)));

        assert_eq!(agg.pending_total(Granularity::Day, Category::KeyPress).count, 2);
        assert_eq!(
            agg.pending_total(Granularity::FifteenMinutes, Category::KeyPress)
                .count,
            2
        );
        let quarters: Vec<String> = agg
            .pending()
            .iter()
            .filter(|d| d.period.granularity == Granularity::FifteenMinutes)
            .map(|d| d.period.label())
            .collect();
        assert_eq!(quarters, vec!["2024-05-01 10:00", "2024-05-01 10:15"]);
    }

    #[test]
    fn test_move_magnitude_modes() {
        let moved = |agg: &Aggregator| {
            agg.record(EventRecord::new(
                InputEvent::MouseMove { distance_px: 12.5 },
                at(2024, 5, 1, 8, 0, 0),
            ));
            agg.record(EventRecord::new(
                InputEvent::MouseMove { distance_px: 7.5 },
                at(2024, 5, 1, 8, 0, 1),
            ));
            agg.pending_total(Granularity::Day, Category::MouseMove)
        };

        let distance = moved(&Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance));
        assert_eq!(distance, Delta::new(2, 20.0));

        let count = moved(&Aggregator::new(&[Granularity::Day], MoveMagnitude::Count));
        assert_eq!(count, Delta::new(2, 2.0));
    }

    #[test]
    fn test_sealed_period_deltas_dropped() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(1), Category::KeyPress, 1, 0.0).unwrap();
        db.seal_closed_periods(day(10).start).unwrap();

        let agg = Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance);
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 1, 10, 0, 0)));
        agg.record(EventRecord::new(InputEvent::KeyPress, at(2024, 5, 10, 10, 0, 0)));

        let report = agg.flush(&db).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.dropped.len(), 1);
        assert!(agg.is_empty());
        assert_eq!(db.read_period(day(1)).unwrap()[0].count, 1);
    }
}
