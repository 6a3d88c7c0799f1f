//! pagewatch - command-line client for a pagewatch collection endpoint
//!
//! This tool provides commands for:
//! - Checking monitor configuration and file locations
//! - Replaying recorded events from a JSON Lines file
//! - Streaming events from stdin through a live monitor
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/pagewatch/config.toml (~/.config/pagewatch/config.toml)
//! - Logs: $XDG_STATE_HOME/pagewatch/ (~/.local/state/pagewatch/)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pagewatch_core::{
    create_monitor, BeaconOutcome, Config, CustomEvent, EventRecord, FlushOutcome, Monitor,
    Transmitter,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "pagewatch")]
#[command(about = "Send client-side telemetry to a pagewatch collector")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file)
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: $XDG_CONFIG_HOME/pagewatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override monitor.server_url
    #[arg(long)]
    server_url: Option<String>,

    /// Override monitor.app_id
    #[arg(long)]
    app_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show monitor configuration and file locations
    Status,

    /// Send events read from a JSON Lines file
    Send {
        /// File with one event per line
        #[arg(short, long)]
        file: PathBuf,

        /// Fire-and-forget beacon instead of a normal POST
        #[arg(long, conflicts_with = "pixel")]
        beacon: bool,

        /// GET with the batch in the query string
        #[arg(long)]
        pixel: bool,
    },

    /// Track each stdin line as a custom event until EOF or Ctrl-C
    Run {
        /// Event name for plain-text lines
        #[arg(short, long, default_value = "log")]
        name: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(server_url) = &args.server_url {
        config.monitor.server_url = server_url.clone();
    }
    if let Some(app_id) = &args.app_id {
        config.monitor.app_id = app_id.clone();
    }

    // Held for the rest of main so buffered log lines are written
    let _log_guard = if args.verbose {
        Some(pagewatch_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let command = match args.command {
        Command::Status => return cmd_status(&config, args.config.as_deref()),
        command => command,
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(async move {
        match command {
            Command::Send {
                file,
                beacon,
                pixel,
            } => cmd_send(config, &file, beacon, pixel).await,
            Command::Run { name } => cmd_run(config, &name).await,
            Command::Status => Ok(()),
        }
    });
    // A pending stdin read would otherwise keep the runtime alive
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

fn cmd_status(config: &Config, config_path: Option<&Path>) -> Result<()> {
    println!("pagewatch Monitor Configuration");
    println!("===============================");
    println!();

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);
    println!(
        "Config file:     {}{}",
        path.display(),
        if path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!();

    let monitor = &config.monitor;
    println!("App ID:          {}", or_not_set(&monitor.app_id));
    println!("Server URL:      {}", or_not_set(&monitor.server_url));
    println!("Queue size:      {}", monitor.max_queue_size);
    println!("Flush interval:  {}ms", monitor.flush_interval_ms);
    println!("Timeout:         {}ms", monitor.timeout_ms);
    println!("Auto flush:      {}", monitor.enable_auto_flush);
    println!("Auto track:      {}", monitor.enable_auto_track);
    println!("Capture panics:  {}", monitor.capture_panics);
    println!("Console log:     {}", monitor.enable_console_log);
    println!();

    match monitor.validate() {
        Ok(()) => println!("Status:          ready"),
        Err(e) => {
            println!("Status:          not configured ({})", e);
            println!();
            println!("Set the required fields in config.toml:");
            println!();
            println!("  [monitor]");
            println!("  app_id = \"your-app\"");
            println!("  server_url = \"https://collect.example.com/events\"");
        }
    }

    println!();
    println!("Log file:        {}", Config::log_path().display());
    Ok(())
}

fn or_not_set(value: &str) -> &str {
    if value.is_empty() {
        "<not set>"
    } else {
        value
    }
}

/// A line of input: a complete record, or a custom event to stamp.
enum Line {
    Record(EventRecord),
    Custom(CustomEvent),
}

fn parse_line(line: &str, default_name: &str) -> Line {
    if let Ok(record) = serde_json::from_str::<EventRecord>(line) {
        return Line::Record(record);
    }
    match serde_json::from_str::<CustomEvent>(line) {
        Ok(mut event) => {
            event.name.get_or_insert_with(|| default_name.to_string());
            Line::Custom(event)
        }
        Err(_) => Line::Custom(CustomEvent::named(default_name).with("message", line)),
    }
}

fn track_line(monitor: &Monitor, line: &str, default_name: &str) {
    match parse_line(line, default_name) {
        Line::Record(record) => monitor.event_sink().enqueue(record),
        Line::Custom(event) => monitor.track_custom_event(event),
    }
}

async fn cmd_send(mut config: Config, file: &Path, beacon: bool, pixel: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    // Replay only: no hooks, no timer
    config.monitor.enable_auto_track = false;
    config.monitor.enable_auto_flush = false;
    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.len() > config.monitor.max_queue_size {
        config.monitor.max_queue_size = lines.len();
    }

    let monitor = create_monitor(config.monitor.clone()).context("invalid monitor configuration")?;
    for line in &lines {
        track_line(&monitor, line, "event");
    }
    let server_url = &config.monitor.server_url;

    if pixel {
        let transmitter = Transmitter::from_config(&config.monitor)?;
        let records: Vec<EventRecord> = monitor
            .queue_snapshot()
            .into_iter()
            .map(|item| item.into_record())
            .collect();
        if records.is_empty() {
            println!("No events to send");
            return Ok(());
        }
        transmitter
            .send_pixel(&records)
            .await
            .context("pixel delivery failed")?;
        println!("Sent {} events to {} (pixel)", records.len(), server_url);
        return Ok(());
    }

    if beacon {
        return match monitor.flush_sync() {
            BeaconOutcome::Empty => {
                println!("No events to send");
                Ok(())
            }
            BeaconOutcome::Accepted(count) => {
                // The beacon runs on this runtime; give it time to finish
                tokio::time::sleep(config.monitor.timeout().min(Duration::from_secs(2))).await;
                println!("Beacon accepted {} events for {}", count, server_url);
                Ok(())
            }
            BeaconOutcome::Rejected(count) => bail!("beacon rejected {} events", count),
        };
    }

    match monitor.flush().await {
        FlushOutcome::Empty | FlushOutcome::NothingReady => {
            println!("No events to send");
            Ok(())
        }
        FlushOutcome::Sent { events } => {
            println!("Sent {} events to {}", events, server_url);
            Ok(())
        }
        FlushOutcome::Failed { attempted, error } => {
            bail!("delivery failed ({} events attempted): {}", attempted, error)
        }
        FlushOutcome::InFlight => bail!("a flush was already in progress"),
    }
}

async fn cmd_run(mut config: Config, name: &str) -> Result<()> {
    config
        .monitor
        .page_url
        .get_or_insert_with(|| "pagewatch://run".to_string());
    let monitor = create_monitor(config.monitor).context("invalid monitor configuration")?;
    monitor.init();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl-C handler")?;

    println!("Session {} (Ctrl-C to stop)", monitor.session_id());
    tracing::info!(session_id = %monitor.session_id(), "Streaming stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = false;
    loop {
        if !running.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => track_line(&monitor, line.trim(), name),
                None => break,
            },
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    if interrupted {
        // Shutdown path: beacon what is queued, then let it go out
        let outcome = monitor.handle_unload();
        tracing::info!(?outcome, "Unload handled");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    monitor.destroy().await;
    let stats = monitor.stats();
    println!(
        "Stopped: {} events sent in {} flushes, {} failed flushes, {} left undelivered",
        stats.events_sent,
        stats.flushes,
        stats.flush_failures,
        monitor.queue_len()
    );
    Ok(())
}
