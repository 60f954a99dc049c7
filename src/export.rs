//! CSV export of period summaries.

use crate::database::Database;
use crate::error::ExportError;
use crate::store::{Granularity, PeriodSummary, ScoreWeights};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Serialize)]
struct CsvRow<'a> {
    period: &'a str,
    key_presses: u64,
    mouse_clicks: u64,
    move_distance: f64,
    score: u64,
}

/// Writes `summaries` as CSV with the header
/// `period,key_presses,mouse_clicks,move_distance,score`.
pub fn write_csv<W: Write>(writer: W, summaries: &[PeriodSummary]) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);

    if summaries.is_empty() {
        csv.write_record(["period", "key_presses", "mouse_clicks", "move_distance", "score"])?;
    }
    for summary in summaries {
        csv.serialize(CsvRow {
            period: &summary.period,
            key_presses: summary.totals.key_presses,
            mouse_clicks: summary.totals.mouse_clicks,
            move_distance: summary.totals.move_magnitude,
            score: summary.score,
        })?;
    }

    csv.flush()?;
    Ok(())
}

/// Exports the summaries of one day to `path`. Returns the number of rows.
pub fn export_day(
    db: &Database,
    granularity: Granularity,
    date: NaiveDate,
    weights: ScoreWeights,
    path: &Path,
) -> Result<usize, ExportError> {
    let summaries = db.summaries_for_day(granularity, date, weights)?;
    let file = File::create(path)?;
    write_csv(file, &summaries)?;

    tracing::info!(
        path = ?path,
        rows = summaries.len(),
        %date,
        "Exported summaries"
    );
    Ok(summaries.len())
}
