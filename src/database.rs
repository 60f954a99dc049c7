//! SQLite database for persistent input statistics.
//!
//! Holds one row per (granularity, period, category) bucket. Every write
//! runs inside a transaction, so a reader never sees half of a flush and a
//! crash mid-flush leaves the previous totals intact.

use crate::error::{StoreError, StoreResult};
use crate::integrity::{build_merkle_root, row_leaf, SealMismatch};
use crate::store::{
    summarize, AggregateBucket, BucketDelta, BucketStore, Category, CategoryTotals, Delta,
    Granularity, PeriodKey, PeriodSummary, ScoreWeights,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const UPSERT_SQL: &str = "INSERT INTO buckets (granularity, period_key, category, count, total_magnitude)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(granularity, period_key, category) DO UPDATE SET
         count = count + excluded.count,
         total_magnitude = total_magnitude + excluded.total_magnitude";

// A period at or before the latest seal of its granularity is closed
const SEALED_SQL: &str =
    "SELECT 1 FROM period_seals WHERE granularity = ?1 AND period_key >= ?2 LIMIT 1";

const BUCKET_COLUMNS: [&str; 5] = [
    "granularity",
    "period_key",
    "category",
    "count",
    "total_magnitude",
];

/// Database wrapper with a lock-guarded connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens or creates the database file at `path`.
    ///
    /// An existing file is checked before anything is written to it. A file
    /// that is not a database, or whose bucket table has an unexpected
    /// layout, is reported as [`StoreError::Corrupt`] and left untouched.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = ?path, "Opening database");

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;

        check_integrity(&conn, path)?;

        // WAL keeps readers on a consistent snapshot while a flush commits
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Opens an in-memory database (for tests and previews).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initializes the database schema.
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Aggregated counters, one row per bucket
            CREATE TABLE IF NOT EXISTS buckets (
                granularity TEXT NOT NULL,
                period_key TEXT NOT NULL,
                category TEXT NOT NULL
                    CHECK(category IN ('key_press', 'mouse_click', 'mouse_move')),
                count INTEGER NOT NULL DEFAULT 0 CHECK(count >= 0),
                total_magnitude REAL NOT NULL DEFAULT 0 CHECK(total_magnitude >= 0),
                PRIMARY KEY (granularity, period_key, category)
            );

            -- Digests of closed periods
            CREATE TABLE IF NOT EXISTS period_seals (
                granularity TEXT NOT NULL,
                period_key TEXT NOT NULL,
                digest TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                sealed_at TEXT NOT NULL,
                PRIMARY KEY (granularity, period_key)
            );

            -- Countdown presets
            CREATE TABLE IF NOT EXISTS timers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                minutes INTEGER NOT NULL CHECK(minutes > 0),
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!("Database schema initialized");
        Ok(())
    }

    // === Buckets ===

    /// Atomically adds deltas to one bucket, creating it if absent.
    pub fn upsert_add(
        &self,
        period: PeriodKey,
        category: Category,
        count_delta: u64,
        magnitude_delta: f64,
    ) -> StoreResult<()> {
        let delta = BucketDelta {
            period,
            category,
            delta: Delta::new(count_delta, magnitude_delta),
        };
        let (count, magnitude) = checked_values(&delta)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if is_sealed_tx(&tx, &period)? {
            return Err(StoreError::PeriodSealed {
                period: format!("{} {}", period.granularity, period.label()),
            });
        }
        tx.execute(
            UPSERT_SQL,
            params![
                period.granularity.as_str(),
                period.label(),
                category.as_str(),
                count,
                magnitude
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Applies many deltas in one transaction: all of them or none.
    ///
    /// Deltas addressed to sealed periods are skipped and returned.
    pub fn apply_batch(&self, deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>> {
        let mut rejected = Vec::new();
        if deltas.is_empty() {
            return Ok(rejected);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare_cached(UPSERT_SQL)?;
            for delta in deltas {
                let (count, magnitude) = checked_values(delta)?;
                if is_sealed_tx(&tx, &delta.period)? {
                    rejected.push(*delta);
                    continue;
                }
                upsert.execute(params![
                    delta.period.granularity.as_str(),
                    delta.period.label(),
                    delta.category.as_str(),
                    count,
                    magnitude
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            applied = deltas.len() - rejected.len(),
            rejected = rejected.len(),
            "Applied bucket batch"
        );
        Ok(rejected)
    }

    /// Buckets of `category` whose period lies in `[start, end]`, oldest first.
    pub fn read_range(
        &self,
        category: Category,
        start: PeriodKey,
        end: PeriodKey,
    ) -> StoreResult<Vec<AggregateBucket>> {
        if start.granularity != end.granularity {
            return Err(StoreError::InvalidRange(format!(
                "range mixes {} and {} periods",
                start.granularity, end.granularity
            )));
        }
        if start > end {
            return Err(StoreError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        let granularity = start.granularity;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT period_key, category, count, total_magnitude FROM buckets
             WHERE granularity = ?1 AND category = ?2 AND period_key >= ?3 AND period_key <= ?4
             ORDER BY period_key",
        )?;

        let rows = stmt.query_map(
            params![
                granularity.as_str(),
                category.as_str(),
                start.label(),
                end.label()
            ],
            |row| bucket_from_row(granularity, row),
        )?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All buckets of one period, in category order.
    pub fn read_period(&self, period: PeriodKey) -> StoreResult<Vec<AggregateBucket>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT period_key, category, count, total_magnitude FROM buckets
             WHERE granularity = ?1 AND period_key = ?2
             ORDER BY category",
        )?;

        let rows = stmt.query_map(
            params![period.granularity.as_str(), period.label()],
            |row| bucket_from_row(period.granularity, row),
        )?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Totals over all stored periods of `granularity`.
    pub fn totals(&self, granularity: Granularity) -> StoreResult<CategoryTotals> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT category, COALESCE(SUM(count), 0), COALESCE(SUM(total_magnitude), 0)
             FROM buckets WHERE granularity = ?1 GROUP BY category",
        )?;

        let mut totals = CategoryTotals::default();
        let mut rows = stmt.query(params![granularity.as_str()])?;
        while let Some(row) = rows.next()? {
            let category = category_from_row(row, 0)?;
            let count: i64 = row.get(1)?;
            let magnitude: f64 = row.get(2)?;
            totals.add(category, Delta::new(count.max(0) as u64, magnitude));
        }

        Ok(totals)
    }

    /// Latest `limit` periods of `granularity`, newest first.
    pub fn recent_summaries(
        &self,
        granularity: Granularity,
        limit: usize,
        weights: ScoreWeights,
    ) -> StoreResult<Vec<PeriodSummary>> {
        let buckets = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT period_key, category, count, total_magnitude FROM buckets
                 WHERE granularity = ?1 AND period_key IN (
                     SELECT DISTINCT period_key FROM buckets
                     WHERE granularity = ?1
                     ORDER BY period_key DESC
                     LIMIT ?2
                 )",
            )?;
            let rows = stmt.query_map(params![granularity.as_str(), limit as i64], |row| {
                bucket_from_row(granularity, row)
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut summaries = summarize(&buckets, weights);
        summaries.reverse();
        Ok(summaries)
    }

    /// Periods of `granularity` falling on `date`, oldest first.
    ///
    /// Only day and sub-day granularities can be split by date.
    pub fn summaries_for_day(
        &self,
        granularity: Granularity,
        date: NaiveDate,
        weights: ScoreWeights,
    ) -> StoreResult<Vec<PeriodSummary>> {
        if !(granularity.is_sub_day() || granularity == Granularity::Day) {
            return Err(StoreError::InvalidRange(format!(
                "{} periods do not fit inside one day",
                granularity
            )));
        }

        let day = PeriodKey::for_date(Granularity::Day, date);
        let buckets = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT period_key, category, count, total_magnitude FROM buckets
                 WHERE granularity = ?1 AND period_key >= ?2 AND period_key < ?3",
            )?;
            let rows = stmt.query_map(
                params![granularity.as_str(), day.label(), day.next().label()],
                |row| bucket_from_row(granularity, row),
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(summarize(&buckets, weights))
    }

    // === Seals ===

    /// Returns true if `period` is sealed or older than a sealed period.
    pub fn is_sealed(&self, period: &PeriodKey) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let sealed = is_sealed_tx(&tx, period)?;
        tx.commit()?;
        Ok(sealed)
    }

    /// Seals every stored period whose grace window has passed at `now`
    /// (see [`PeriodKey::sealable_from`]). Returns the number of new seals.
    ///
    /// Only periods after the latest seal of each granularity are scanned.
    pub fn seal_closed_periods(&self, now: NaiveDateTime) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let sealed_at = Utc::now().to_rfc3339();
        let mut sealed = 0usize;

        for granularity in Granularity::ALL {
            let candidates: Vec<String> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT DISTINCT period_key FROM buckets
                     WHERE granularity = ?1 AND period_key > COALESCE(
                         (SELECT MAX(period_key) FROM period_seals WHERE granularity = ?1), '')
                     ORDER BY period_key",
                )?;
                let rows = stmt.query_map(params![granularity.as_str()], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            for label in candidates {
                let period = match PeriodKey::parse(granularity, &label) {
                    Ok(period) => period,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unparseable period");
                        continue;
                    }
                };

                // Candidates are in chronological order
                if now < period.sealable_from() {
                    break;
                }

                let (digest, row_count) = period_digest(&tx, granularity.as_str(), &label)?;
                let Some(digest) = digest else {
                    continue;
                };

                tx.execute(
                    "INSERT INTO period_seals (granularity, period_key, digest, row_count, sealed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![granularity.as_str(), label, digest, row_count, sealed_at],
                )?;
                sealed += 1;
            }
        }

        tx.commit()?;

        if sealed > 0 {
            tracing::info!(sealed, "Sealed closed periods");
        }
        Ok(sealed)
    }

    /// Recomputes every seal and returns the periods that no longer match.
    pub fn verify_seals(&self) -> StoreResult<Vec<SealMismatch>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let seals: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT granularity, period_key, digest FROM period_seals
                 ORDER BY granularity, period_key",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut mismatches = Vec::new();
        for (granularity, period_key, expected) in seals {
            let (actual, _) = period_digest(&tx, &granularity, &period_key)?;
            if actual.as_deref() != Some(expected.as_str()) {
                mismatches.push(SealMismatch {
                    granularity,
                    period_key,
                    expected,
                    actual,
                });
            }
        }

        tx.commit()?;
        Ok(mismatches)
    }

    /// Logs every sealed period that fails verification. Returns how many did.
    pub fn log_seal_mismatches(&self) -> usize {
        match self.verify_seals() {
            Ok(mismatches) => {
                for m in &mismatches {
                    tracing::error!(
                        granularity = %m.granularity,
                        period = %m.period_key,
                        expected = %m.expected,
                        actual = ?m.actual,
                        "Sealed period was modified"
                    );
                }
                mismatches.len()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to verify seals");
                0
            }
        }
    }

    // === Timer presets ===

    /// Adds a countdown preset of `minutes`.
    pub fn add_timer(&self, minutes: u32) -> StoreResult<i64> {
        if minutes == 0 {
            return Err(StoreError::InvalidInput(
                "timer must last at least one minute".into(),
            ));
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO timers (minutes, created_at) VALUES (?1, ?2)",
            params![minutes, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All presets, newest first.
    pub fn list_timers(&self) -> StoreResult<Vec<TimerPreset>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, minutes, created_at FROM timers ORDER BY id DESC")?;

        let rows = stmt.query_map([], |row| {
            Ok(TimerPreset {
                id: row.get(0)?,
                minutes: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Removes a preset. Returns false if it did not exist.
    pub fn remove_timer(&self, id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM timers WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

impl BucketStore for Database {
    fn apply_batch(&self, deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>> {
        Database::apply_batch(self, deltas)
    }

    fn read_range(
        &self,
        category: Category,
        start: PeriodKey,
        end: PeriodKey,
    ) -> StoreResult<Vec<AggregateBucket>> {
        Database::read_range(self, category, start, end)
    }

    fn seal_closed_periods(&self, now: NaiveDateTime) -> StoreResult<usize> {
        Database::seal_closed_periods(self, now)
    }
}

/// A database opened on first use and retried on every call until it opens.
///
/// Used when the file could not be opened at startup for a reason that may
/// pass. A file found corrupt is never retried.
pub struct ReopeningDatabase {
    path: PathBuf,
    state: Mutex<OpenState>,
}

enum OpenState {
    Closed,
    Open(Arc<Database>),
    Corrupt(String),
}

impl ReopeningDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(OpenState::Closed),
        }
    }

    /// The open database, opening it first if needed.
    pub fn database(&self) -> StoreResult<Arc<Database>> {
        let mut state = self.state.lock();
        match &*state {
            OpenState::Open(db) => return Ok(Arc::clone(db)),
            OpenState::Corrupt(reason) => {
                return Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: reason.clone(),
                })
            }
            OpenState::Closed => {}
        }

        match Database::open(&self.path) {
            Ok(db) => {
                tracing::info!(path = ?self.path, "Database opened after earlier failure");
                db.log_seal_mismatches();
                let db = Arc::new(db);
                *state = OpenState::Open(Arc::clone(&db));
                Ok(db)
            }
            Err(StoreError::Corrupt { path, reason }) => {
                tracing::error!(
                    path = ?path,
                    reason = %reason,
                    "Database is corrupt, leaving it untouched"
                );
                *state = OpenState::Corrupt(reason.clone());
                Err(StoreError::Corrupt { path, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// The database if it has been opened.
    pub fn current(&self) -> Option<Arc<Database>> {
        match &*self.state.lock() {
            OpenState::Open(db) => Some(Arc::clone(db)),
            _ => None,
        }
    }
}

impl BucketStore for ReopeningDatabase {
    fn apply_batch(&self, deltas: &[BucketDelta]) -> StoreResult<Vec<BucketDelta>> {
        self.database()?.apply_batch(deltas)
    }

    fn read_range(
        &self,
        category: Category,
        start: PeriodKey,
        end: PeriodKey,
    ) -> StoreResult<Vec<AggregateBucket>> {
        self.database()?.read_range(category, start, end)
    }

    fn seal_closed_periods(&self, now: NaiveDateTime) -> StoreResult<usize> {
        self.database()?.seal_closed_periods(now)
    }
}

/// Verifies an opened file before any write touches it.
fn check_integrity(conn: &Connection, path: &Path) -> StoreResult<()> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    match conn.query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0)) {
        Ok(result) if result == "ok" => {}
        Ok(result) => return Err(corrupt(result)),
        Err(e) => {
            return match e.sqlite_error_code() {
                Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                    Err(corrupt(e.to_string()))
                }
                _ => Err(e.into()),
            };
        }
    }

    let columns: Vec<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(buckets)")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    if !columns.is_empty() {
        if let Some(missing) = BUCKET_COLUMNS
            .iter()
            .find(|name| !columns.iter().any(|c| c == *name))
        {
            return Err(corrupt(format!("buckets table has no '{}' column", missing)));
        }
    }

    Ok(())
}

fn checked_values(delta: &BucketDelta) -> StoreResult<(i64, f64)> {
    let count = i64::try_from(delta.delta.count)
        .map_err(|_| StoreError::InvalidInput(format!("count {} too large", delta.delta.count)))?;
    let magnitude = delta.delta.magnitude;
    if !(magnitude.is_finite() && magnitude >= 0.0) {
        return Err(StoreError::InvalidInput(format!(
            "magnitude {} must be a non-negative number",
            magnitude
        )));
    }
    Ok((count, magnitude))
}

fn is_sealed_tx(tx: &Transaction<'_>, period: &PeriodKey) -> StoreResult<bool> {
    let mut stmt = tx.prepare_cached(SEALED_SQL)?;
    Ok(stmt.exists(params![period.granularity.as_str(), period.label()])?)
}

/// Merkle root over the rows of one stored period, and the row count.
fn period_digest(
    tx: &Transaction<'_>,
    granularity: &str,
    period_key: &str,
) -> StoreResult<(Option<String>, i64)> {
    let mut stmt = tx.prepare_cached(
        "SELECT category, count, total_magnitude FROM buckets
         WHERE granularity = ?1 AND period_key = ?2
         ORDER BY category",
    )?;
    let leaves = stmt
        .query_map(params![granularity, period_key], |row| {
            let category: String = row.get(0)?;
            Ok(row_leaf(
                granularity,
                period_key,
                &category,
                row.get(1)?,
                row.get(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((build_merkle_root(&leaves), leaves.len() as i64))
}

fn category_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Category> {
    let text: String = row.get(idx)?;
    text.parse::<Category>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn bucket_from_row(granularity: Granularity, row: &Row<'_>) -> rusqlite::Result<AggregateBucket> {
    let label: String = row.get(0)?;
    let period = PeriodKey::parse(granularity, &label)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into()))?;
    let count: i64 = row.get(2)?;

    Ok(AggregateBucket {
        period,
        category: category_from_row(row, 1)?,
        count: count.max(0) as u64,
        total_magnitude: row.get(3)?,
    })
}

/// A countdown preset.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimerPreset {
    pub id: i64,
    pub minutes: u32,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> PeriodKey {
        PeriodKey::for_date(Granularity::Day, NaiveDate::from_ymd_opt(2024, 5, d).unwrap())
    }

    fn delta(period: PeriodKey, category: Category, count: u64, magnitude: f64) -> BucketDelta {
        BucketDelta {
            period,
            category,
            delta: Delta::new(count, magnitude),
        }
    }

    #[test]
    fn test_create_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.totals(Granularity::Day).is_ok());
    }

    #[test]
    fn test_upsert_add_creates_then_adds() {
        let db = Database::open_in_memory().unwrap();

        db.upsert_add(day(1), Category::MouseMove, 3, 120.5).unwrap();
        db.upsert_add(day(1), Category::MouseMove, 2, 10.0).unwrap();

        let rows = db.read_period(day(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 5);
        assert_eq!(rows[0].total_magnitude, 130.5);
    }

    #[test]
    fn test_upsert_rejects_bad_magnitude() {
        let db = Database::open_in_memory().unwrap();

        let err = db
            .upsert_add(day(1), Category::MouseMove, 1, f64::NAN)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(db.read_period(day(1)).unwrap().is_empty());
    }

    #[test]
    fn test_read_range_is_inclusive_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        db.apply_batch(&[
            delta(day(3), Category::KeyPress, 30, 0.0),
            delta(day(1), Category::KeyPress, 10, 0.0),
            delta(day(2), Category::KeyPress, 20, 0.0),
            delta(day(2), Category::MouseClick, 99, 0.0),
            delta(day(4), Category::KeyPress, 40, 0.0),
        ])
        .unwrap();

        let rows = db.read_range(Category::KeyPress, day(1), day(3)).unwrap();
        let counts: Vec<u64> = rows.iter().map(|r| r.count).collect();

        assert_eq!(counts, vec![10, 20, 30]);
        assert_eq!(rows[0].period, day(1));
    }

    #[test]
    fn test_read_range_validates_bounds() {
        let db = Database::open_in_memory().unwrap();
        let hour = PeriodKey::for_date(
            Granularity::Hour,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        );

        assert!(matches!(
            db.read_range(Category::KeyPress, day(2), day(1)),
            Err(StoreError::InvalidRange(_))
        ));
        assert!(matches!(
            db.read_range(Category::KeyPress, hour, day(1)),
            Err(StoreError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_granularities_are_kept_apart() {
        let db = Database::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let month = PeriodKey::for_date(Granularity::Month, date);

        db.upsert_add(day(1), Category::KeyPress, 4, 0.0).unwrap();
        db.upsert_add(month, Category::KeyPress, 4, 0.0).unwrap();
        db.upsert_add(month, Category::KeyPress, 6, 0.0).unwrap();

        assert_eq!(db.totals(Granularity::Day).unwrap().key_presses, 4);
        assert_eq!(db.totals(Granularity::Month).unwrap().key_presses, 10);
    }

    #[test]
    fn test_recent_summaries_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for d in 1..=5 {
            db.upsert_add(day(d), Category::KeyPress, d as u64, 0.0).unwrap();
            db.upsert_add(day(d), Category::MouseClick, 1, 0.0).unwrap();
        }

        let summaries = db
            .recent_summaries(Granularity::Day, 3, ScoreWeights::default())
            .unwrap();

        let periods: Vec<&str> = summaries.iter().map(|s| s.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-05-05", "2024-05-04", "2024-05-03"]);
        assert_eq!(summaries[0].score, 5 + 5);
    }

    #[test]
    fn test_summaries_for_day_only_that_day() {
        let db = Database::open_in_memory().unwrap();
        let at = |s: &str| {
            PeriodKey::containing_naive(
                Granularity::FifteenMinutes,
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap(),
            )
        };

        db.upsert_add(at("2024-05-01 09:05"), Category::KeyPress, 1, 0.0).unwrap();
        db.upsert_add(at("2024-05-01 23:59"), Category::KeyPress, 2, 0.0).unwrap();
        db.upsert_add(at("2024-05-02 00:00"), Category::KeyPress, 3, 0.0).unwrap();

        let summaries = db
            .summaries_for_day(
                Granularity::FifteenMinutes,
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                ScoreWeights::default(),
            )
            .unwrap();

        let periods: Vec<&str> = summaries.iter().map(|s| s.period.as_str()).collect();
        assert_eq!(periods, vec!["2024-05-01 09:00", "2024-05-01 23:45"]);

        assert!(db
            .summaries_for_day(
                Granularity::Week,
                NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                ScoreWeights::default()
            )
            .is_err());
    }

    #[test]
    fn test_seal_closed_periods_keeps_recent_open() {
        let db = Database::open_in_memory().unwrap();
        for d in 1..=3 {
            db.upsert_add(day(d), Category::KeyPress, 1, 0.0).unwrap();
        }
        let now = NaiveDate::from_ymd_opt(2024, 5, 3)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();

        // Only 2024-05-01 ended a full day before today began
        assert_eq!(db.seal_closed_periods(now).unwrap(), 1);
        assert!(db.is_sealed(&day(1)).unwrap());
        assert!(!db.is_sealed(&day(2)).unwrap());

        // Sealing twice adds nothing
        assert_eq!(db.seal_closed_periods(now).unwrap(), 0);
    }

    #[test]
    fn test_sealed_period_rejects_writes() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(1), Category::KeyPress, 5, 0.0).unwrap();
        let now = day(10).start;
        db.seal_closed_periods(now).unwrap();

        let err = db.upsert_add(day(1), Category::KeyPress, 1, 0.0).unwrap_err();
        assert!(matches!(err, StoreError::PeriodSealed { .. }));

        let rejected = db
            .apply_batch(&[
                delta(day(1), Category::KeyPress, 1, 0.0),
                delta(day(10), Category::KeyPress, 2, 0.0),
            ])
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].period, day(1));
        assert_eq!(db.read_period(day(1)).unwrap()[0].count, 5);
        assert_eq!(db.read_period(day(10)).unwrap()[0].count, 2);
    }

    #[test]
    fn test_sub_day_periods_stay_open_for_a_day() {
        let db = Database::open_in_memory().unwrap();
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap();
        let quarter =
            PeriodKey::containing_naive(Granularity::FifteenMinutes, at("2024-05-01 01:05"));
        db.upsert_add(quarter, Category::KeyPress, 1, 0.0).unwrap();

        assert_eq!(db.seal_closed_periods(at("2024-05-01 01:45")).unwrap(), 0);
        assert_eq!(db.seal_closed_periods(at("2024-05-02 01:14")).unwrap(), 0);

        // Clock stepped back: the quarter hour still takes writes
        db.upsert_add(quarter, Category::KeyPress, 1, 0.0).unwrap();

        assert_eq!(db.seal_closed_periods(at("2024-05-02 01:15")).unwrap(), 1);
        assert!(db.is_sealed(&quarter).unwrap());
        assert_eq!(db.read_period(quarter).unwrap()[0].count, 2);
    }

    #[test]
    fn test_sealing_resumes_after_latest_seal() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(1), Category::KeyPress, 1, 0.0).unwrap();
        db.upsert_add(day(2), Category::KeyPress, 1, 0.0).unwrap();
        assert_eq!(db.seal_closed_periods(day(3).start).unwrap(), 1);

        db.upsert_add(day(5), Category::KeyPress, 1, 0.0).unwrap();
        assert_eq!(db.seal_closed_periods(day(10).start).unwrap(), 2);
        assert!(db.is_sealed(&day(2)).unwrap());
        assert!(db.is_sealed(&day(5)).unwrap());
        assert_eq!(db.seal_closed_periods(day(10).start).unwrap(), 0);
    }

    #[test]
    fn test_periods_before_latest_seal_are_closed() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(4), Category::KeyPress, 1, 0.0).unwrap();
        db.seal_closed_periods(day(10).start).unwrap();

        // day 2 was never stored, but it is older than the sealed day 4
        assert!(db.is_sealed(&day(2)).unwrap());
        let rejected = db.apply_batch(&[delta(day(2), Category::KeyPress, 1, 0.0)]).unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(db.read_period(day(2)).unwrap().is_empty());
    }

    #[test]
    fn test_verify_seals_detects_rewrite() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_add(day(1), Category::KeyPress, 5, 0.0).unwrap();
        db.seal_closed_periods(day(10).start).unwrap();
        assert!(db.verify_seals().unwrap().is_empty());

        db.conn
            .lock()
            .execute(
                "UPDATE buckets SET count = 500 WHERE period_key = '2024-05-01'",
                [],
            )
            .unwrap();

        let mismatches = db.verify_seals().unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].period_key, "2024-05-01");
    }

    #[test]
    fn test_timer_presets() {
        let db = Database::open_in_memory().unwrap();

        let first = db.add_timer(25).unwrap();
        let second = db.add_timer(5).unwrap();
        assert!(db.add_timer(0).is_err());

        let timers = db.list_timers().unwrap();
        assert_eq!(timers.len(), 2);
        assert_eq!(timers[0].id, second);
        assert_eq!(timers[1].minutes, 25);

        assert!(db.remove_timer(first).unwrap());
        assert!(!db.remove_timer(first).unwrap());
        assert_eq!(db.list_timers().unwrap().len(), 1);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("usage_stats.db");

        {
            let db = Database::open(&path).unwrap();
            db.upsert_add(day(1), Category::MouseClick, 7, 0.0).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.totals(Granularity::Day).unwrap().mouse_clicks, 7);
    }

    #[test]
    fn test_garbage_file_is_corrupt_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage_stats.db");
        let garbage: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        std::fs::write(&path, &garbage).unwrap();

        let err = Database::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), garbage);
    }

    #[test]
    fn test_foreign_bucket_table_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage_stats.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE buckets (id INTEGER PRIMARY KEY, blob BLOB);")
                .unwrap();
        }

        assert!(matches!(
            Database::open(&path),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_reopening_database_opens_once_path_is_usable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = ReopeningDatabase::new(blocker.join("usage_stats.db"));
        let batch = [delta(day(1), Category::KeyPress, 3, 0.0)];

        assert!(matches!(
            store.apply_batch(&batch),
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(store.current().is_none());

        std::fs::remove_file(&blocker).unwrap();
        assert!(store.apply_batch(&batch).unwrap().is_empty());
        let db = store.current().unwrap();
        assert_eq!(db.totals(Granularity::Day).unwrap().key_presses, 3);
    }

    #[test]
    fn test_reopening_database_gives_up_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage_stats.db");
        std::fs::write(&path, b"definitely not sqlite".repeat(256)).unwrap();

        let store = ReopeningDatabase::new(&path);
        assert!(matches!(store.database(), Err(StoreError::Corrupt { .. })));

        // Not retried even once the file is gone
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(store.database(), Err(StoreError::Corrupt { .. })));
        assert!(!path.exists());
    }
}
