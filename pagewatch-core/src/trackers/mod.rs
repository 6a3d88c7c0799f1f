//! Trackers: adapters from host event channels to records
//!
//! A tracker turns one source of observations (panics, navigation, HTTP
//! calls, timings) into [`EventRecord`](crate::record::EventRecord)s and
//! hands them to its [`EventSink`]. That sink is the only capability a
//! tracker receives; it never sees the queue.
//!
//! Every tracker has two kinds of entry points:
//! - automatic hooks, installed by [`Tracker::init`] and removed by
//!   [`Tracker::destroy`] (both idempotent)
//! - manual reporting methods, which work whether or not hooks are installed

mod error;
mod network;
mod page;
mod performance;

pub use error::ErrorTracker;
pub use network::{InstrumentedClient, NetworkTracker};
pub use page::{PageTracker, Visibility};
pub use performance::PerformanceTracker;

use crate::monitor::EventSink;

/// Lifecycle shared by all trackers.
pub trait Tracker: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Install automatic hooks. Calling it again is a no-op.
    fn init(&mut self);

    /// Remove automatic hooks, restoring whatever they replaced.
    /// Calling it again is a no-op.
    fn destroy(&mut self);

    fn is_active(&self) -> bool;
}

/// The built-in trackers owned by one monitor.
pub(crate) struct Trackers {
    pub error: ErrorTracker,
    pub page: PageTracker,
    pub network: NetworkTracker,
    pub performance: PerformanceTracker,
}

impl Trackers {
    pub fn new(sink: EventSink, capture_panics: bool) -> Self {
        Self {
            error: ErrorTracker::new(sink.clone(), capture_panics),
            page: PageTracker::new(sink.clone()),
            network: NetworkTracker::new(sink.clone()),
            performance: PerformanceTracker::new(sink),
        }
    }

    fn all(&mut self) -> [&mut dyn Tracker; 4] {
        [
            &mut self.error,
            &mut self.page,
            &mut self.network,
            &mut self.performance,
        ]
    }

    pub fn init_all(&mut self) {
        for tracker in self.all() {
            tracker.init();
            tracing::debug!(tracker = tracker.name(), "Tracker initialized");
        }
    }

    pub fn destroy_all(&mut self) {
        for tracker in self.all() {
            if tracker.is_active() {
                tracker.destroy();
                tracing::debug!(tracker = tracker.name(), "Tracker destroyed");
            }
        }
    }
}
