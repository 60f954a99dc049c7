//! Data types for input counting.
//!
//! Defines the events produced by input sources, the time periods events
//! are bucketed into, and the aggregate rows owned by the database.

use chrono::{
    DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single input occurrence reported by an event source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// A key went down (auto-repeat included, key-up ignored).
    KeyPress,

    /// Any mouse button went down.
    MouseClick,

    /// The cursor moved. `distance_px` is the distance from the previous position.
    MouseMove { distance_px: f64 },
}

impl InputEvent {
    /// Returns the storage category of this event.
    pub fn category(&self) -> Category {
        match self {
            InputEvent::KeyPress => Category::KeyPress,
            InputEvent::MouseClick => Category::MouseClick,
            InputEvent::MouseMove { .. } => Category::MouseMove,
        }
    }
}

/// An input event stamped with the local time it happened.
///
/// Produced by the event source, consumed once by the aggregator and
/// never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRecord {
    pub event: InputEvent,
    pub at: DateTime<Local>,
}

impl EventRecord {
    pub fn new(event: InputEvent, at: DateTime<Local>) -> Self {
        Self { event, at }
    }

    /// Stamps an event with the current local time.
    pub fn now(event: InputEvent) -> Self {
        Self::new(event, Local::now())
    }
}

/// Category column of the bucket table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    KeyPress,
    MouseClick,
    MouseMove,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::KeyPress, Category::MouseClick, Category::MouseMove];

    /// Position of this category in fixed-size per-category arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::KeyPress => "key_press",
            Category::MouseClick => "mouse_click",
            Category::MouseMove => "mouse_move",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key_press" => Ok(Category::KeyPress),
            "mouse_click" => Ok(Category::MouseClick),
            "mouse_move" => Ok(Category::MouseMove),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Width of the time buckets counts are grouped into.
///
/// Periods are half-open local-time intervals `[start, next_start)`.
/// Weeks start on Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    FifteenMinutes,
    ThirtyMinutes,
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 7] = [
        Granularity::Minute,
        Granularity::FifteenMinutes,
        Granularity::ThirtyMinutes,
        Granularity::Hour,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::FifteenMinutes => "fifteen_minutes",
            Granularity::ThirtyMinutes => "thirty_minutes",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// True for granularities shorter than a day.
    pub fn is_sub_day(self) -> bool {
        matches!(
            self,
            Granularity::Minute
                | Granularity::FifteenMinutes
                | Granularity::ThirtyMinutes
                | Granularity::Hour
        )
    }

    /// Returns the start of the period containing `at`.
    pub fn truncate(self, at: NaiveDateTime) -> NaiveDateTime {
        let date = at.date();
        match self {
            Granularity::Minute => floor_minutes(at, 1),
            Granularity::FifteenMinutes => floor_minutes(at, 15),
            Granularity::ThirtyMinutes => floor_minutes(at, 30),
            Granularity::Hour => floor_minutes(at, 60),
            Granularity::Day => date.and_time(NaiveTime::MIN),
            Granularity::Week => {
                let back = date.weekday().num_days_from_monday() as i64;
                (date - Duration::days(back)).and_time(NaiveTime::MIN)
            }
            Granularity::Month => date
                .with_day(1)
                .unwrap_or(date)
                .and_time(NaiveTime::MIN),
        }
    }

    /// Returns the start of the period following the one starting at `start`.
    pub fn next_start(self, start: NaiveDateTime) -> NaiveDateTime {
        match self {
            Granularity::Minute => start + Duration::minutes(1),
            Granularity::FifteenMinutes => start + Duration::minutes(15),
            Granularity::ThirtyMinutes => start + Duration::minutes(30),
            Granularity::Hour => start + Duration::hours(1),
            Granularity::Day => start + Duration::days(1),
            Granularity::Week => start + Duration::days(7),
            Granularity::Month => start
                .checked_add_months(Months::new(1))
                .unwrap_or(NaiveDateTime::MAX),
        }
    }

    fn label_format(self) -> &'static str {
        match self {
            Granularity::Month => "%Y-%m",
            Granularity::Day | Granularity::Week => "%Y-%m-%d",
            _ => "%Y-%m-%d %H:%M",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Granularity::Minute),
            "fifteen_minutes" => Ok(Granularity::FifteenMinutes),
            "thirty_minutes" => Ok(Granularity::ThirtyMinutes),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

fn floor_minutes(at: NaiveDateTime, step: u32) -> NaiveDateTime {
    let minute = at.minute() - at.minute() % step;
    let time = NaiveTime::from_hms_opt(at.hour(), minute, 0).unwrap_or(NaiveTime::MIN);
    at.date().and_time(time)
}

/// Identifies one time bucket: a granularity plus the local start of the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub granularity: Granularity,
    pub start: NaiveDateTime,
}

impl PeriodKey {
    /// The period of `granularity` containing the local time `at`.
    ///
    /// An instant exactly on a period boundary belongs to the period it starts.
    pub fn containing_naive(granularity: Granularity, at: NaiveDateTime) -> Self {
        Self {
            granularity,
            start: granularity.truncate(at),
        }
    }

    /// The period of `granularity` containing midnight of `date`.
    pub fn for_date(granularity: Granularity, date: NaiveDate) -> Self {
        Self::containing_naive(granularity, date.and_time(NaiveTime::MIN))
    }

    /// Exclusive end of this period.
    pub fn end(&self) -> NaiveDateTime {
        self.granularity.next_start(self.start)
    }

    /// Earliest local time at which this period may be sealed.
    ///
    /// A finished period stays writable for one more full period, and for
    /// at least a day.
    pub fn sealable_from(&self) -> NaiveDateTime {
        self.next().end().max(self.end() + Duration::days(1))
    }

    pub fn next(&self) -> Self {
        Self {
            granularity: self.granularity,
            start: self.end(),
        }
    }

    /// Text stored in the `period_key` column. Sorts chronologically.
    pub fn label(&self) -> String {
        self.start
            .format(self.granularity.label_format())
            .to_string()
    }

    /// Parses a label produced by [`PeriodKey::label`].
    pub fn parse(granularity: Granularity, label: &str) -> Result<Self, String> {
        let start = match granularity {
            Granularity::Month => {
                NaiveDate::parse_from_str(&format!("{}-01", label), "%Y-%m-%d")
                    .map(|d| d.and_time(NaiveTime::MIN))
            }
            Granularity::Day | Granularity::Week => {
                NaiveDate::parse_from_str(label, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
            }
            _ => NaiveDateTime::parse_from_str(label, "%Y-%m-%d %H:%M"),
        }
        .map_err(|e| format!("invalid {} period '{}': {}", granularity, label, e))?;

        if granularity.truncate(start) != start {
            return Err(format!(
                "'{}' is not the start of a {} period",
                label, granularity
            ));
        }

        Ok(Self { granularity, start })
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Counts accumulated for one bucket but not yet stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub count: u64,
    pub magnitude: f64,
}

impl Delta {
    pub fn new(count: u64, magnitude: f64) -> Self {
        Self { count, magnitude }
    }

    #[inline]
    pub fn add(&mut self, other: Delta) {
        self.count = self.count.saturating_add(other.count);
        self.magnitude += other.magnitude;
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.count == 0 && self.magnitude == 0.0
    }
}

/// A pending delta addressed to one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketDelta {
    pub period: PeriodKey,
    pub category: Category,
    pub delta: Delta,
}

/// A stored aggregate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub period: PeriodKey,
    pub category: Category,
    pub count: u64,
    pub total_magnitude: f64,
}
