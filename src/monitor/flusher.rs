//! Background flush loop.
//!
//! Moves pending counts into the store on a fixed interval, seals periods
//! that can no longer change, and publishes live snapshots in between.

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::monitor::SourceHealth;
use crate::publish::{build_snapshot, Publisher, StatsSnapshot};
use crate::store::{Aggregator, BucketStore, FlushReport, Granularity, ScoreWeights};
use chrono::{Local, NaiveDateTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Timing of the flush thread.
#[derive(Debug, Clone)]
pub struct FlusherConfig {
    pub flush_interval: Duration,
    pub publish_interval: Duration,
    /// How often the shutdown flag is checked.
    pub tick: Duration,
    pub weights: ScoreWeights,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FlusherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            publish_interval: config.publish_interval().min(config.flush_interval()),
            tick: Duration::from_millis(100),
            weights: config.score_weights(),
        }
    }
}

/// Everything the flush thread works on.
#[derive(Clone)]
pub struct FlushContext {
    pub aggregator: Arc<Aggregator>,
    pub store: Arc<dyn BucketStore>,
    pub publisher: Publisher,
    pub health: Arc<SourceHealth>,
}

/// Flushes pending counts, then seals periods closed as of `now`.
pub fn flush_cycle(
    aggregator: &Aggregator,
    store: &dyn BucketStore,
    now: NaiveDateTime,
) -> Result<FlushReport, StoreError> {
    let report = aggregator.flush(store)?;
    if let Err(e) = store.seal_closed_periods(now) {
        tracing::warn!(error = %e, "Failed to seal closed periods");
    }
    Ok(report)
}

/// Builds one snapshot per configured granularity.
pub fn snapshots(
    ctx: &FlushContext,
    weights: ScoreWeights,
    now: NaiveDateTime,
    last_error: Option<&str>,
) -> Vec<StatsSnapshot> {
    ctx.aggregator
        .granularities()
        .iter()
        .map(|g: &Granularity| {
            build_snapshot(
                *g,
                now,
                &ctx.aggregator,
                ctx.store.as_ref(),
                &ctx.health,
                weights,
                last_error,
            )
        })
        .collect()
}

/// Spawns the flush thread.
///
/// The thread flushes every `flush_interval`, publishes a `stats` update
/// every `publish_interval`, and performs a final flush once `shutdown` is
/// set.
///
/// # Example
/// ```ignore
/// let shutdown = Arc::new(AtomicBool::new(false));
/// let handle = spawn_flush_thread(Arc::clone(&shutdown), ctx, FlusherConfig::default());
///
/// // ... run message loop ...
///
/// shutdown.store(true, Ordering::SeqCst);
/// handle.join().unwrap();
/// ```
pub fn spawn_flush_thread(
    shutdown: Arc<AtomicBool>,
    ctx: FlushContext,
    config: FlusherConfig,
) -> JoinHandle<()> {
    thread::spawn(move || {
        tracing::info!(
            flush_ms = config.flush_interval.as_millis() as u64,
            publish_ms = config.publish_interval.as_millis() as u64,
            "Flush thread started"
        );

        let mut last_error: Option<String> = None;
        let mut last_flush = Instant::now();
        let mut last_publish = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(config.tick);

            if last_flush.elapsed() >= config.flush_interval {
                last_flush = Instant::now();
                run_flush(&ctx, &mut last_error);
            }

            if last_publish.elapsed() >= config.publish_interval {
                last_publish = Instant::now();
                let now = Local::now().naive_local();
                let snaps = snapshots(&ctx, config.weights, now, last_error.as_deref());
                ctx.publisher.publish("stats", &snaps);
            }
        }

        tracing::info!("Flush thread shutting down");

        // Final flush before exit
        run_flush(&ctx, &mut last_error);
        if let Some(e) = &last_error {
            tracing::error!(
                error = %e,
                pending = ctx.aggregator.pending().len(),
                "Final flush failed, unsaved counts are lost"
            );
        }
    })
}

fn run_flush(ctx: &FlushContext, last_error: &mut Option<String>) {
    let now = Local::now().naive_local();
    match flush_cycle(&ctx.aggregator, ctx.store.as_ref(), now) {
        Ok(report) => {
            if last_error.take().is_some() {
                tracing::info!("Storage available again");
            }
            if !report.is_empty() {
                tracing::debug!(
                    applied = report.applied,
                    dropped = report.dropped.len(),
                    "Flushed counts"
                );
            }
        }
        Err(e) => {
            let message = e.to_string();
            // Warn on each new failure, not on every retry
            if last_error.as_deref() != Some(message.as_str()) {
                tracing::warn!(error = %message, "Flush failed, will retry");
            }
            *last_error = Some(message);
        }
    }
}
