//! # pagewatch-core
//!
//! Core library for pagewatch - client-side monitoring for web and
//! desktop applications.
//!
//! This library provides:
//! - Normalized event records (errors, page lifecycle, network calls,
//!   performance metrics, custom events)
//! - A bounded, retry-aware event queue
//! - HTTP delivery to a collection endpoint (batch, beacon, pixel)
//! - The [`Monitor`] controller tying queue, transport and trackers together
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow one way:
//! - **Trackers** observe the host and build records through an [`EventSink`]
//! - **Queue** keeps the most recent records with per-item retry counts
//! - **Transport** ships batches; failures are retried up to
//!   [`queue::MAX_RETRIES`] times
//!
//! ## Example
//!
//! ```rust,no_run
//! use pagewatch_core::{create_monitor, destroy_monitor, CustomEvent, MonitorConfig};
//!
//! # async fn run() -> pagewatch_core::Result<()> {
//! let monitor = create_monitor(MonitorConfig::new("shop", "https://collect.example.com/events"))?;
//! monitor.init();
//! monitor.set_user_id("u-42");
//! monitor.track_custom_event(CustomEvent::named("checkout").with("total", 129.5));
//!
//! destroy_monitor(monitor).await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, ConfigUpdate, MonitorConfig};
pub use error::{Error, Result, TransmitError};
pub use monitor::{
    create_monitor, destroy_monitor, BeaconOutcome, EventSink, FlushOutcome, Monitor,
    MonitorState, MonitorStats, PageContext,
};
pub use queue::{EventQueue, QueueItem};
pub use record::*;
pub use trackers::{InstrumentedClient, Tracker, Visibility};
pub use transmitter::{Transmitter, Transport};

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod record;
pub mod trackers;
pub mod transmitter;

#[cfg(test)]
pub(crate) mod test_support;
