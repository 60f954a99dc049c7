//! Cross-platform event source built on `rdev`.
//!
//! `rdev::listen` blocks its thread for as long as the OS delivers events.
//! When it returns an error (no permission, display server gone) the source
//! is marked disconnected and listening is retried after the reconnect
//! interval.

use super::{EventSink, SourceHealth};
use crate::error::SourceError;
use rdev::{listen, Event, EventType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BACKEND: &str = "rdev";

fn handle_event(sink: &EventSink, event: &Event) {
    match event.event_type {
        EventType::KeyPress(_) => sink.key_press(),
        EventType::ButtonPress(_) => sink.mouse_click(),
        EventType::MouseMove { x, y } => sink.mouse_moved_to(x, y),
        _ => {}
    }
}

fn listen_once(sink: Arc<EventSink>, health: &SourceHealth) -> Result<(), SourceError> {
    health.set_connected(BACKEND);
    listen(move |event: Event| handle_event(&sink, &event))
        .map_err(|e| SourceError::Disconnected(format!("{:?}", e)))
}

/// Spawns the listener thread.
///
/// The thread cannot be stopped while `rdev` is listening; it is detached
/// and ends with the process. After a failure it gives up once `shutdown`
/// is set.
pub fn spawn_rdev_source(
    sink: Arc<EventSink>,
    health: Arc<SourceHealth>,
    shutdown: Arc<AtomicBool>,
    reconnect_interval: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            sink.reset_motion();
            match listen_once(Arc::clone(&sink), &health) {
                Ok(()) => health.set_disconnected("listener stopped"),
                Err(e) => health.set_disconnected(e.to_string()),
            }

            tracing::info!(
                retry_secs = reconnect_interval.as_secs(),
                "Retrying event source"
            );
            // Sleep in short steps so shutdown is noticed quickly
            let step = Duration::from_millis(100);
            let mut waited = Duration::ZERO;
            while waited < reconnect_interval && !shutdown.load(Ordering::SeqCst) {
                thread::sleep(step);
                waited += step;
            }
        }
    })
}
