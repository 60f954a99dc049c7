//! Event source health.

use parking_lot::RwLock;
use serde::Serialize;

/// Connection state of the active input source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    Starting,
    Connected { backend: String },
    Disconnected { reason: String },
}

/// Shared health flag written by the event source and read by the publisher.
#[derive(Debug)]
pub struct SourceHealth {
    status: RwLock<SourceStatus>,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceHealth {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(SourceStatus::Starting),
        }
    }

    pub fn status(&self) -> SourceStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.status.read(), SourceStatus::Connected { .. })
    }

    pub fn set_connected(&self, backend: &str) {
        let mut status = self.status.write();
        if !matches!(&*status, SourceStatus::Connected { backend: b } if b == backend) {
            tracing::info!(backend, "Event source connected");
        }
        *status = SourceStatus::Connected {
            backend: backend.to_string(),
        };
    }

    pub fn set_disconnected(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Event source disconnected");
        *self.status.write() = SourceStatus::Disconnected { reason };
    }
}
