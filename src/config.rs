//! Application configuration.
//!
//! Settings live in `<config_dir>/tallymon/config.json`. Every field has a
//! default, so a missing file or a file naming only a few keys is fine.

use crate::error::ConfigError;
use crate::store::{Granularity, ScoreWeights};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How mouse movement contributes to the `total_magnitude` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveMagnitude {
    /// Pixels travelled.
    #[default]
    Distance,
    /// One per move event.
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database file. `None` means `<data_dir>/tallymon/usage_stats.db`.
    pub database_path: Option<PathBuf>,

    /// Seconds between flushes of in-memory totals to the database.
    pub flush_interval_secs: u64,

    /// Seconds between snapshots published to subscribers.
    pub publish_interval_secs: u64,

    /// Granularities every event is counted under.
    pub granularities: Vec<Granularity>,

    pub move_magnitude: MoveMagnitude,

    /// Minimum gap between two counted key presses (and between two counted
    /// clicks). 0 counts every event.
    pub debounce_ms: u64,

    /// Cursor jumps longer than this are treated as teleports and not counted
    /// as distance.
    pub max_move_jump_px: f64,

    pub keyboard_weight: u64,
    pub mouse_weight: u64,

    /// Seconds to wait before reconnecting a disconnected event source.
    pub reconnect_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            flush_interval_secs: 5,
            publish_interval_secs: 1,
            granularities: vec![Granularity::Day],
            move_magnitude: MoveMagnitude::Distance,
            debounce_ms: 0,
            max_move_jump_px: 2400.0,
            keyboard_weight: 1,
            mouse_weight: 5,
            reconnect_interval_secs: 5,
        }
    }
}

impl AppConfig {
    /// Returns the default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tallymon")
            .join("config.json")
    }

    /// Loads the config from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Loads and validates the config at `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = ?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_secs must be at least 1".into(),
            ));
        }
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "publish_interval_secs must be at least 1".into(),
            ));
        }
        if self.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_interval_secs must be at least 1".into(),
            ));
        }
        if self.granularities.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one granularity is required".into(),
            ));
        }
        if !(self.max_move_jump_px.is_finite() && self.max_move_jump_px > 0.0) {
            return Err(ConfigError::Invalid(
                "max_move_jump_px must be a positive number".into(),
            ));
        }
        Ok(())
    }

    /// Resolved database file path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tallymon")
                .join("usage_stats.db")
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn score_weights(&self) -> ScoreWeights {
        ScoreWeights {
            keyboard: self.keyboard_weight,
            mouse: self.mouse_weight,
        }
    }
}
