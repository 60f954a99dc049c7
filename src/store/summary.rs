//! Per-period summaries for display.
//!
//! Rolls stored bucket rows up into one line per period, with the
//! weighted activity score.

use super::types::{AggregateBucket, Category, Delta, Granularity, PeriodKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weights of the activity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub keyboard: u64,
    pub mouse: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            keyboard: 1,
            mouse: 5,
        }
    }
}

impl ScoreWeights {
    /// `key_presses * keyboard + mouse_clicks * mouse`.
    pub fn score(&self, key_presses: u64, mouse_clicks: u64) -> u64 {
        key_presses
            .saturating_mul(self.keyboard)
            .saturating_add(mouse_clicks.saturating_mul(self.mouse))
    }
}

/// Totals per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub key_presses: u64,
    pub mouse_clicks: u64,
    pub mouse_moves: u64,
    /// Summed magnitude of mouse moves (pixels, or move count).
    pub move_magnitude: f64,
}

impl CategoryTotals {
    pub fn add(&mut self, category: Category, delta: Delta) {
        match category {
            Category::KeyPress => self.key_presses = self.key_presses.saturating_add(delta.count),
            Category::MouseClick => {
                self.mouse_clicks = self.mouse_clicks.saturating_add(delta.count)
            }
            Category::MouseMove => {
                self.mouse_moves = self.mouse_moves.saturating_add(delta.count);
                self.move_magnitude += delta.magnitude;
            }
        }
    }

    pub fn merge(&mut self, other: &CategoryTotals) {
        self.key_presses = self.key_presses.saturating_add(other.key_presses);
        self.mouse_clicks = self.mouse_clicks.saturating_add(other.mouse_clicks);
        self.mouse_moves = self.mouse_moves.saturating_add(other.mouse_moves);
        self.move_magnitude += other.move_magnitude;
    }

    pub fn score(&self, weights: ScoreWeights) -> u64 {
        weights.score(self.key_presses, self.mouse_clicks)
    }
}

/// One display row: everything counted in a single period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub granularity: Granularity,
    /// Period label, e.g. `2024-05-01` or `2024-05-01 14:15`.
    pub period: String,
    #[serde(flatten)]
    pub totals: CategoryTotals,
    pub score: u64,
}

/// Groups bucket rows by period, oldest first.
pub fn summarize(buckets: &[AggregateBucket], weights: ScoreWeights) -> Vec<PeriodSummary> {
    let mut grouped: BTreeMap<PeriodKey, CategoryTotals> = BTreeMap::new();

    for bucket in buckets {
        grouped.entry(bucket.period).or_default().add(
            bucket.category,
            Delta::new(bucket.count, bucket.total_magnitude),
        );
    }

    grouped
        .into_iter()
        .map(|(period, totals)| PeriodSummary {
            granularity: period.granularity,
            period: period.label(),
            score: totals.score(weights),
            totals,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bucket(day: u32, category: Category, count: u64, magnitude: f64) -> AggregateBucket {
        AggregateBucket {
            period: PeriodKey::for_date(
                Granularity::Day,
                NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            ),
            category,
            count,
            total_magnitude: magnitude,
        }
    }

    #[test]
    fn test_default_score_weights() {
        let weights = ScoreWeights::default();
        assert_eq!(weights.score(10, 2), 20);
    }

    #[test]
    fn test_summarize_groups_by_period() {
        let rows = vec![
            bucket(2, Category::KeyPress, 7, 0.0),
            bucket(1, Category::KeyPress, 100, 0.0),
            bucket(1, Category::MouseClick, 10, 0.0),
            bucket(1, Category::MouseMove, 40, 1234.5),
        ];

        let summaries = summarize(&rows, ScoreWeights::default());

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].period, "2024-05-01");
        assert_eq!(summaries[0].totals.key_presses, 100);
        assert_eq!(summaries[0].totals.mouse_clicks, 10);
        assert_eq!(summaries[0].totals.move_magnitude, 1234.5);
        assert_eq!(summaries[0].score, 150);
        assert_eq!(summaries[1].period, "2024-05-02");
        assert_eq!(summaries[1].score, 7);
    }

    #[test]
    fn test_summary_serializes_flat() {
        let summaries = summarize(
            &[bucket(1, Category::MouseClick, 3, 0.0)],
            ScoreWeights::default(),
        );
        let json = serde_json::to_string(&summaries[0]).unwrap();

        assert!(json.contains("\"mouse_clicks\":3"));
        assert!(json.contains("\"score\":15"));
        assert!(json.contains("\"granularity\":\"day\""));
    }
}
