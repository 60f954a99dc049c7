//! Tallymon: counts keyboard and mouse activity into time buckets and keeps
//! the totals in a local SQLite database.

pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod integrity;
pub mod monitor;
pub mod publish;
pub mod store;

#[cfg(windows)]
pub mod winapi_utils;

pub use config::AppConfig;
pub use database::Database;
pub use error::{StoreError, StoreResult};
