//! Tallymon - keyboard and mouse activity counter
//!
//! Runs in the foreground, counting input into time buckets until Ctrl+C.
//!
//! ```text
//! tallymon                               run the monitor
//! tallymon export <YYYY-MM-DD> [file] [granularity]
//! tallymon timers [add <minutes> | remove <id>]
//! ```

use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tallymon::monitor::{spawn_flush_thread, EventSink, FlushContext, FlusherConfig, SourceHealth};
use tallymon::publish::Publisher;
use tallymon::store::{Aggregator, BucketStore, Category, Granularity, UnavailableStore};
use tallymon::database::ReopeningDatabase;
use tallymon::{AppConfig, Database, StoreError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tallymon=info")),
        )
        .init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid config, using defaults");
            AppConfig::default()
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => run_monitor(config),
        Some("export") => run_export(&config, &args[1..]),
        Some("timers") => run_timers(&config, &args[1..]),
        Some(other) => Err(format!("unknown command '{other}'").into()),
    }
}

fn run_monitor(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              Tallymon - Input Activity Counter             ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    // Database
    println!("🔧 Opening database...");
    let db_path = config.database_path();
    let mut database: Option<Arc<Database>> = None;
    let mut reopening: Option<Arc<ReopeningDatabase>> = None;
    let store: Arc<dyn BucketStore> = match Database::open(&db_path) {
        Ok(db) => {
            let mismatches = db.log_seal_mismatches();
            if mismatches > 0 {
                println!("   ⚠ {} sealed period(s) fail verification", mismatches);
            }
            println!("   ✓ Database ready at {}", db_path.display());
            let db = Arc::new(db);
            database = Some(Arc::clone(&db));
            db
        }
        Err(e @ StoreError::Corrupt { .. }) => {
            tracing::error!(error = %e, "Database is corrupt, leaving it untouched");
            println!("   ⚠ {}", e);
            println!("   Counting in memory only; nothing will be saved.");
            Arc::new(UnavailableStore::new(e.to_string()))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open database, will retry");
            println!("   ⚠ {}", e);
            println!("   Counting in memory; retrying the database on every flush.");
            let retrying = Arc::new(ReopeningDatabase::new(&db_path));
            reopening = Some(Arc::clone(&retrying));
            retrying
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let aggregator = Arc::new(Aggregator::from_config(&config));
    let health = Arc::new(SourceHealth::new());
    let publisher = Publisher::new();

    // Flush thread
    println!("🔧 Starting flush thread...");
    let flush_handle = spawn_flush_thread(
        Arc::clone(&shutdown),
        FlushContext {
            aggregator: Arc::clone(&aggregator),
            store: Arc::clone(&store),
            publisher: publisher.clone(),
            health: Arc::clone(&health),
        },
        FlusherConfig::from(&config),
    );
    println!(
        "   ✓ Flushing every {}s ({})",
        config.flush_interval_secs,
        granularity_list(aggregator.granularities())
    );

    let sink = Arc::new(EventSink::new(Arc::clone(&aggregator), &config));

    // Handle Ctrl+C
    let shutdown_ctrlc = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        println!("\n🛑 Shutdown signal received...");
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        #[cfg(windows)]
        tallymon::winapi_utils::post_quit_message(0);
    })?;

    println!("🔧 Connecting input source...");
    run_event_source(Arc::clone(&sink), &health, &shutdown, &config);

    // Cleanup
    println!("\n⏳ Shutting down...");
    // Nothing recorded after this point would reach the final flush
    sink.stop();
    shutdown.store(true, Ordering::SeqCst);
    if flush_handle.join().is_err() {
        tracing::error!("Flush thread panicked");
    }

    let database = database.or_else(|| reopening.and_then(|r| r.current()));
    print_summary(&aggregator, database.as_deref(), &config);

    println!("\n👋 Tallymon has exited. Goodbye!");
    Ok(())
}

/// Runs the platform's event source until shutdown.
#[cfg(windows)]
fn run_event_source(
    sink: Arc<EventSink>,
    health: &Arc<SourceHealth>,
    shutdown: &Arc<AtomicBool>,
    _config: &AppConfig,
) {
    match tallymon::monitor::start_windows_hooks(sink, health) {
        Ok(_hooks) => {
            println!("   ✓ Keyboard and mouse hooks installed");
            print_running();
            // Hooks stay installed while the loop pumps
            tallymon::winapi_utils::run_message_loop();
        }
        Err(e) => {
            println!("   ⚠ {}", e);
            println!("   Continuing without input; press Ctrl+C to quit.");
            wait_for_shutdown(shutdown);
        }
    }
}

#[cfg(all(not(windows), feature = "rdev"))]
fn run_event_source(
    sink: Arc<EventSink>,
    health: &Arc<SourceHealth>,
    shutdown: &Arc<AtomicBool>,
    config: &AppConfig,
) {
    // Detached: rdev::listen cannot be interrupted
    let _listener = tallymon::monitor::spawn_rdev_source(
        sink,
        Arc::clone(health),
        Arc::clone(shutdown),
        config.reconnect_interval(),
    );
    println!("   ✓ rdev listener started");
    print_running();
    wait_for_shutdown(shutdown);
}

#[cfg(all(not(windows), not(feature = "rdev")))]
fn run_event_source(
    _sink: Arc<EventSink>,
    health: &Arc<SourceHealth>,
    shutdown: &Arc<AtomicBool>,
    _config: &AppConfig,
) {
    health.set_disconnected("no input backend for this platform (build with --features rdev)");
    println!("   ⚠ No input backend available; build with --features rdev.");
    wait_for_shutdown(shutdown);
}

fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(any(windows, feature = "rdev"))]
fn print_running() {
    println!();
    println!("════════════════════════════════════════════════════════════════");
    println!("🎯 Tallymon is counting. Press Ctrl+C to quit.");
    println!("════════════════════════════════════════════════════════════════");
    println!();
}

fn granularity_list(granularities: &[Granularity]) -> String {
    granularities
        .iter()
        .map(|g| g.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_summary(aggregator: &Aggregator, db: Option<&Database>, config: &AppConfig) {
    let granularity = aggregator
        .granularities()
        .first()
        .copied()
        .unwrap_or(Granularity::Day);
    let weights = config.score_weights();

    println!();
    println!("════════════════════════════════════════════════════════════════");
    println!("📊 Activity Summary ({})", granularity);
    println!("════════════════════════════════════════════════════════════════");

    if let Some(db) = db {
        match db.recent_summaries(granularity, 5, weights) {
            Ok(summaries) if !summaries.is_empty() => {
                for s in &summaries {
                    println!(
                        "   {:<17} {:>7} keys {:>6} clicks {:>10.0} px  score {}",
                        s.period,
                        s.totals.key_presses,
                        s.totals.mouse_clicks,
                        s.totals.move_magnitude,
                        s.score
                    );
                }
            }
            Ok(_) => println!("   Nothing recorded yet."),
            Err(e) => println!("   ⚠ Could not read summaries: {}", e),
        }
    }

    if !aggregator.is_empty() {
        println!();
        println!("   Not saved (final flush failed):");
        for category in Category::ALL {
            let pending = aggregator.pending_total(granularity, category);
            println!("      {:<12} {}", category.as_str(), pending.count);
        }
    }

    println!("════════════════════════════════════════════════════════════════");
}

fn open_for_command(config: &AppConfig) -> Result<Database, StoreError> {
    Database::open(&config.database_path())
}

fn run_export(config: &AppConfig, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let date = match args.first() {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")?,
        None => Local::now().date_naive(),
    };
    let path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("tallymon-{date}.csv")));
    let granularity = match args.get(2) {
        Some(text) => text.parse::<Granularity>()?,
        None => Granularity::Hour,
    };

    let db = open_for_command(config)?;
    let rows = tallymon::export::export_day(&db, granularity, date, config.score_weights(), &path)?;
    println!("✓ Wrote {} row(s) to {}", rows, path.display());
    Ok(())
}

fn run_timers(config: &AppConfig, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_for_command(config)?;

    match args.first().map(String::as_str) {
        Some("add") => {
            let minutes: u32 = args.get(1).ok_or("missing minutes")?.parse()?;
            let id = db.add_timer(minutes)?;
            println!("✓ Added {} minute timer (id {})", minutes, id);
        }
        Some("remove") => {
            let id: i64 = args.get(1).ok_or("missing timer id")?.parse()?;
            if db.remove_timer(id)? {
                println!("✓ Removed timer {}", id);
            } else {
                println!("⚠ No timer with id {}", id);
            }
        }
        Some(other) => return Err(format!("unknown timers command '{other}'").into()),
        None => {
            let timers = db.list_timers()?;
            if timers.is_empty() {
                println!("No timers.");
            }
            for t in timers {
                println!("   [{}] {} min (added {})", t.id, t.minutes, t.created_at);
            }
        }
    }

    Ok(())
}
