//! Input capture and the background flush loop.
//!
//! Event sources (Windows hooks, or `rdev` elsewhere) translate OS input
//! into calls on an [`EventSink`], which filters and stamps them before
//! handing them to the [`Aggregator`].

pub mod flusher;
pub mod health;
#[cfg(windows)]
pub mod input_hooks;
pub mod motion;
#[cfg(feature = "rdev")]
pub mod rdev_source;
pub mod throttle;

pub use flusher::*;
pub use health::*;
#[cfg(windows)]
pub use input_hooks::*;
pub use motion::*;
#[cfg(feature = "rdev")]
pub use rdev_source::*;
pub use throttle::*;

use crate::config::AppConfig;
use crate::store::{Aggregator, EventRecord, InputEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entry point for raw input from any backend.
#[derive(Debug)]
pub struct EventSink {
    aggregator: Arc<Aggregator>,
    keys: Debounce,
    clicks: Debounce,
    motion: MotionTracker,
    stopped: AtomicBool,
}

impl EventSink {
    pub fn new(aggregator: Arc<Aggregator>, config: &AppConfig) -> Self {
        let gap = Duration::from_millis(config.debounce_ms);
        Self {
            aggregator,
            keys: Debounce::new(gap),
            clicks: Debounce::new(gap),
            motion: MotionTracker::new(config.max_move_jump_px),
            stopped: AtomicBool::new(false),
        }
    }

    /// Ignores all further input. Called before the final flush so nothing
    /// is counted after it.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    #[inline]
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn key_press(&self) {
        if !self.is_stopped() && self.keys.allow() {
            self.aggregator.record(EventRecord::now(InputEvent::KeyPress));
        }
    }

    #[inline]
    pub fn mouse_click(&self) {
        if !self.is_stopped() && self.clicks.allow() {
            self.aggregator.record(EventRecord::now(InputEvent::MouseClick));
        }
    }

    /// Reports the cursor's absolute position.
    #[inline]
    pub fn mouse_moved_to(&self, x: f64, y: f64) {
        if self.is_stopped() {
            return;
        }
        if let Some(distance_px) = self.motion.step(x, y) {
            self.aggregator
                .record(EventRecord::now(InputEvent::MouseMove { distance_px }));
        }
    }

    /// Drops cursor history, e.g. after the source reconnects.
    pub fn reset_motion(&self) {
        self.motion.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MoveMagnitude;
    use crate::store::{Category, Granularity};

    #[test]
    fn test_sink_feeds_aggregator() {
        let config = AppConfig::default();
        let aggregator = Arc::new(Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance));
        let sink = EventSink::new(Arc::clone(&aggregator), &config);

        sink.key_press();
        sink.key_press();
        sink.mouse_click();
        sink.mouse_moved_to(0.0, 0.0);
        sink.mouse_moved_to(30.0, 40.0);

        let keys = aggregator.pending_total(Granularity::Day, Category::KeyPress);
        let moves = aggregator.pending_total(Granularity::Day, Category::MouseMove);
        assert_eq!(keys.count, 2);
        assert_eq!(
            aggregator
                .pending_total(Granularity::Day, Category::MouseClick)
                .count,
            1
        );
        assert_eq!(moves.count, 1);
        assert_eq!(moves.magnitude, 50.0);
    }

    #[test]
    fn test_sink_debounces_keys() {
        let config = AppConfig {
            debounce_ms: 60_000,
            ..Default::default()
        };
        let aggregator = Arc::new(Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance));
        let sink = EventSink::new(Arc::clone(&aggregator), &config);

        for _ in 0..10 {
            sink.key_press();
        }

        assert_eq!(
            aggregator
                .pending_total(Granularity::Day, Category::KeyPress)
                .count,
            1
        );
    }

    #[test]
    fn test_stopped_sink_counts_nothing() {
        let config = AppConfig::default();
        let aggregator = Arc::new(Aggregator::new(&[Granularity::Day], MoveMagnitude::Distance));
        let sink = EventSink::new(Arc::clone(&aggregator), &config);

        sink.key_press();
        sink.stop();
        sink.key_press();
        sink.mouse_click();
        sink.mouse_moved_to(0.0, 0.0);
        sink.mouse_moved_to(300.0, 400.0);

        let pending = aggregator.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].category, Category::KeyPress);
        assert_eq!(pending[0].delta.count, 1);
    }
}
