//! Monitor controller
//!
//! A [`Monitor`] owns one session: the bounded queue, the transport, the
//! built-in trackers and the periodic flush timer. It is a cheap, clonable
//! handle; all clones share the same state.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --init--> Active --destroy--> Destroyed
//!        \________________destroy_______________/
//! ```
//!
//! `init` installs tracker hooks (when `enable_auto_track`) and starts the
//! periodic flush (when `enable_auto_flush`). `Destroyed` is terminal: a
//! destroyed monitor drops every event handed to it.
//!
//! ## Delivery
//!
//! [`Monitor::flush`] sends a snapshot of the ready items and then acts on
//! exactly that snapshot: removed on success, retry-marked on failure.
//! Items enqueued while a send is in flight are untouched. Only one flush
//! runs at a time; a concurrent call returns [`FlushOutcome::InFlight`].
//!
//! [`Monitor::flush_sync`] is the teardown path. It hands the queued
//! records to the transport's fire-and-forget beacon and removes them only
//! if the beacon was accepted. Items that belong to an in-flight flush are
//! left to that flush, so the two paths never share an item.
//!
//! ## Locking
//!
//! Internal locks are short and never held across an await. The queue lock
//! is held while a custom [`Transport::send_beacon`] runs, so a transport
//! must not report events back into the monitor that owns it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
    Weak,
};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigUpdate, MonitorConfig};
use crate::error::Result;
use crate::queue::{EventQueue, ItemId, QueueItem};
use crate::record::{
    now_millis, CustomEvent, EventKind, EventPayload, EventRecord, MetricType, RecordStamp,
};
use crate::trackers::{InstrumentedClient, Trackers, Visibility};
use crate::transmitter::{Transmitter, Transport};

/// Create a monitor from validated configuration.
///
/// The monitor is not active until [`Monitor::init`] is called.
pub fn create_monitor(config: MonitorConfig) -> Result<Monitor> {
    Monitor::new(config)
}

/// Tear a monitor down: final flush, trackers removed, timer stopped.
pub async fn destroy_monitor(monitor: Monitor) {
    monitor.destroy().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Active,
    Destroyed,
}

/// Result of one [`Monitor::flush`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The queue was empty
    Empty,
    /// Every queued item has exhausted its retries
    NothingReady,
    /// Another flush was already running
    InFlight,
    /// The batch was accepted and removed from the queue
    Sent { events: usize },
    /// The batch was rejected; its items were retry-marked
    Failed { attempted: usize, error: String },
}

/// Result of one [`Monitor::flush_sync`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconOutcome {
    Empty,
    /// Handed to the beacon; the queue was cleared
    Accepted(usize),
    /// The beacon refused the payload; the queue is unchanged
    Rejected(usize),
}

/// Current page context, stamped onto every record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub referrer: Option<String>,
}

/// Delivery counters since the monitor was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Flushes that attempted a send
    pub flushes: u64,
    pub events_sent: u64,
    pub flush_failures: u64,
    /// Items pushed out of a full queue
    pub events_evicted: u64,
    /// Events handed to a destroyed monitor
    pub events_dropped: u64,
    pub beacons_accepted: u64,
    pub beacons_rejected: u64,
    pub timers_started: u64,
}

#[derive(Default)]
struct Counters {
    flushes: AtomicU64,
    events_sent: AtomicU64,
    flush_failures: AtomicU64,
    events_evicted: AtomicU64,
    events_dropped: AtomicU64,
    beacons_accepted: AtomicU64,
    beacons_rejected: AtomicU64,
    timers_started: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            events_evicted: self.events_evicted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            beacons_accepted: self.beacons_accepted.load(Ordering::Relaxed),
            beacons_rejected: self.beacons_rejected.load(Ordering::Relaxed),
            timers_started: self.timers_started.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// `session_<ms since epoch>_<9 random base-36ish chars>`
fn generate_session_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", now_millis(), &random[..9])
}

struct Shared {
    session_id: String,
    created_at: Instant,
    config: RwLock<MonitorConfig>,
    user_id: RwLock<Option<String>>,
    page: RwLock<PageContext>,
    state: Mutex<MonitorState>,
    /// Held by `init`, the start of `destroy` and timer restarts
    lifecycle: Mutex<()>,
    tearing_down: AtomicBool,
    queue: Mutex<EventQueue>,
    transport: RwLock<Arc<dyn Transport>>,
    /// False when the host supplied its own transport
    owns_transport: bool,
    flushing: AtomicBool,
    /// Ids in the batch the running flush is sending
    in_flight: Mutex<HashSet<ItemId>>,
    counters: Counters,
    trackers: Mutex<Trackers>,
    timer: Mutex<Option<FlushTimer>>,
}

/// The periodic flush task and the signal that ends it between ticks.
struct FlushTimer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FlushTimer {
    /// Ask the loop to exit once any flush it started has finished.
    fn stop(self) -> JoinHandle<()> {
        let _ = self.stop.send(true);
        self.task
    }
}

impl Shared {
    fn state(&self) -> MonitorState {
        *lock(&self.state)
    }

    fn transport(&self) -> Arc<dyn Transport> {
        let transport = read(&self.transport);
        Arc::clone(&*transport)
    }

    fn stamp(&self) -> RecordStamp {
        let config = read(&self.config);
        let page = read(&self.page);
        RecordStamp {
            session_id: self.session_id.clone(),
            user_id: read(&self.user_id).clone(),
            url: page.url.clone(),
            user_agent: config.user_agent_or_default(),
            app_id: config.app_id.clone(),
        }
    }

    /// Lifecycle logging: info with `enable_console_log`, debug otherwise.
    fn log(&self, message: std::fmt::Arguments<'_>) {
        if read(&self.config).enable_console_log {
            info!(session_id = %self.session_id, "{}", message);
        } else {
            debug!(session_id = %self.session_id, "{}", message);
        }
    }

    fn accepts_events(&self, kind: EventKind) -> bool {
        if self.state() == MonitorState::Destroyed {
            bump(&self.counters.events_dropped, 1);
            debug!(session_id = %self.session_id, kind = %kind, "Monitor destroyed, event dropped");
            return false;
        }
        true
    }

    fn with_user(&self, mut record: EventRecord) -> EventRecord {
        if record.user_id.is_none() {
            record.user_id = read(&self.user_id).clone();
        }
        record
    }

    fn enqueue(&self, record: EventRecord) {
        let kind = record.kind();
        if !self.accepts_events(kind) {
            return;
        }
        let record = self.with_user(record);
        let evicted = lock(&self.queue).enqueue(record);
        self.queued(kind, evicted);
    }

    /// Enqueue without blocking on the queue lock; the event is dropped if
    /// the lock is held. Used from the panic hook.
    fn try_enqueue(&self, record: EventRecord) {
        let kind = record.kind();
        if !self.accepts_events(kind) {
            return;
        }
        let record = self.with_user(record);
        let evicted = match self.queue.try_lock() {
            Ok(mut queue) => queue.enqueue(record),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().enqueue(record),
            Err(TryLockError::WouldBlock) => {
                bump(&self.counters.events_dropped, 1);
                return;
            }
        };
        self.queued(kind, evicted);
    }

    fn queued(&self, kind: EventKind, evicted: Option<QueueItem>) {
        if let Some(evicted) = evicted {
            bump(&self.counters.events_evicted, 1);
            debug!(
                session_id = %self.session_id,
                evicted = %evicted.record().kind(),
                retry_count = evicted.retry_count(),
                "Queue full, oldest event evicted"
            );
        }
        self.log(format_args!("Event queued: {}", kind));
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.task.abort();
        }
    }
}

/// Capability handed to trackers: stamp records and enqueue them.
///
/// Holds a weak reference; once every [`Monitor`] handle is gone the sink
/// silently drops what it receives.
#[derive(Clone)]
pub struct EventSink {
    shared: Weak<Shared>,
}

impl EventSink {
    pub fn is_connected(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// Common fields for a record built now
    pub fn stamp(&self) -> Option<RecordStamp> {
        self.shared.upgrade().map(|shared| shared.stamp())
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.upgrade().map(|shared| shared.session_id.clone())
    }

    pub fn app_id(&self) -> Option<String> {
        self.shared
            .upgrade()
            .map(|shared| read(&shared.config).app_id.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared
            .upgrade()
            .and_then(|shared| read(&shared.user_id).clone())
    }

    pub fn page(&self) -> Option<PageContext> {
        self.shared.upgrade().map(|shared| read(&shared.page).clone())
    }

    pub fn enqueue(&self, record: EventRecord) {
        if let Some(shared) = self.shared.upgrade() {
            shared.enqueue(record);
        }
    }

    /// Stamp `payload` with the current context and enqueue it.
    pub fn emit(&self, payload: impl Into<EventPayload>) {
        if let Some(shared) = self.shared.upgrade() {
            let record = EventRecord::new(payload, shared.stamp());
            shared.enqueue(record);
        }
    }

    pub(crate) fn try_emit(&self, payload: impl Into<EventPayload>) {
        if let Some(shared) = self.shared.upgrade() {
            let record = EventRecord::new(payload, shared.stamp());
            shared.try_enqueue(record);
        }
    }

    /// Make `url` the current page; the previous url becomes the referrer.
    pub(crate) fn set_location(&self, url: &str, title: &str) {
        if let Some(shared) = self.shared.upgrade() {
            let mut page = write(&shared.page);
            let previous = std::mem::replace(&mut page.url, url.to_string());
            page.title = title.to_string();
            page.referrer = Some(previous).filter(|previous| !previous.is_empty());
        }
    }

    pub(crate) fn created_at(&self) -> Option<Instant> {
        self.shared.upgrade().map(|shared| shared.created_at)
    }
}

/// Handle to one monitoring session.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("session_id", &self.shared.session_id)
            .field("state", &self.shared.state())
            .field("queued", &self.queue_len())
            .finish()
    }
}

/// Ends the flight when the flush ends, however it ends.
struct FlightGuard<'a>(&'a Shared);

impl<'a> FlightGuard<'a> {
    fn acquire(shared: &'a Shared) -> Option<Self> {
        shared
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(shared))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(&self.0.in_flight).clear();
        self.0.flushing.store(false, Ordering::Release);
    }
}

impl Monitor {
    /// Create a monitor that delivers over HTTP to `config.server_url`.
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let transmitter = Transmitter::from_config(&config)?;
        Ok(Self::build(config, Arc::new(transmitter), true))
    }

    /// Create a monitor that delivers through a caller-supplied transport.
    ///
    /// Changing `server_url` or `timeout_ms` later does not replace it.
    pub fn with_transport(config: MonitorConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, transport, false))
    }

    fn build(config: MonitorConfig, transport: Arc<dyn Transport>, owns_transport: bool) -> Self {
        let session_id = generate_session_id();
        let page = PageContext {
            url: config
                .page_url
                .clone()
                .unwrap_or_else(|| "about:blank".to_string()),
            ..PageContext::default()
        };
        let capture_panics = config.capture_panics;
        let max_queue_size = config.max_queue_size;

        info!(
            session_id = %session_id,
            app_id = %config.app_id,
            server_url = %config.server_url,
            "Monitor created"
        );

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
            session_id,
            created_at: Instant::now(),
            config: RwLock::new(config),
            user_id: RwLock::new(None),
            page: RwLock::new(page),
            state: Mutex::new(MonitorState::Uninitialized),
            lifecycle: Mutex::new(()),
            tearing_down: AtomicBool::new(false),
            queue: Mutex::new(EventQueue::new(max_queue_size)),
            transport: RwLock::new(transport),
            owns_transport,
            flushing: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            trackers: Mutex::new(Trackers::new(
                EventSink {
                    shared: weak.clone(),
                },
                capture_panics,
            )),
            timer: Mutex::new(None),
        });

        Self { shared }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Activate the monitor. Repeated calls, and calls after destroy, only
    /// log a warning.
    pub fn init(&self) {
        // Held until hooks and timer are in place, so a concurrent destroy
        // either sees them or makes this call a no-op
        let _lifecycle = lock(&self.shared.lifecycle);
        if self.shared.tearing_down.load(Ordering::Acquire) {
            warn!(session_id = %self.shared.session_id, "Monitor destroyed, init ignored");
            return;
        }
        {
            let mut state = lock(&self.shared.state);
            match *state {
                MonitorState::Active => {
                    warn!(session_id = %self.shared.session_id, "Monitor already initialized");
                    return;
                }
                MonitorState::Destroyed => {
                    warn!(session_id = %self.shared.session_id, "Monitor destroyed, init ignored");
                    return;
                }
                MonitorState::Uninitialized => *state = MonitorState::Active,
            }
        }

        let config = self.config();
        if config.enable_auto_track {
            lock(&self.shared.trackers).init_all();
        }
        if config.enable_auto_flush {
            self.start_timer(config.flush_interval());
        }
        self.shared.log(format_args!("Monitor initialized"));
    }

    /// Final flush, trackers removed, timer stopped. The monitor is then
    /// permanently inert. Calling it again only logs a warning.
    pub async fn destroy(&self) {
        let timer = {
            let _lifecycle = lock(&self.shared.lifecycle);
            if self.shared.tearing_down.swap(true, Ordering::AcqRel) {
                warn!(session_id = %self.shared.session_id, "Monitor already destroyed");
                return;
            }
            self.take_timer()
        };

        // A periodic flush already sending is allowed to finish
        if let Some(timer) = timer {
            let _ = timer.stop().await;
        }

        self.destroy_trackers();

        let outcome = self.flush().await;
        if outcome == FlushOutcome::InFlight {
            self.flush_sync();
        }

        *lock(&self.shared.state) = MonitorState::Destroyed;
        self.shared.log(format_args!(
            "Monitor destroyed, {} events left undelivered",
            self.queue_len()
        ));
    }

    fn destroy_trackers(&self) {
        lock(&self.shared.trackers).destroy_all();
    }

    pub fn state(&self) -> MonitorState {
        self.shared.state()
    }

    fn start_timer(&self, period: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(session_id = %self.shared.session_id, "No tokio runtime, periodic flush disabled");
            return;
        };

        let weak = Arc::downgrade(&self.shared);
        let (stop, mut stopped) = watch::channel(false);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Monitor { shared }.flush().await;
            }
        });

        let timer = FlushTimer { stop, task };
        if let Some(previous) = lock(&self.shared.timer).replace(timer) {
            drop(previous.stop());
        }
        bump(&self.shared.counters.timers_started, 1);
    }

    fn take_timer(&self) -> Option<FlushTimer> {
        lock(&self.shared.timer).take()
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Send the ready items as one batch.
    ///
    /// Outside a tokio runtime nothing is sent and the items stay queued
    /// with their retry counts unchanged.
    pub async fn flush(&self) -> FlushOutcome {
        let shared = &self.shared;
        let Some(_guard) = FlightGuard::acquire(shared) else {
            shared.log(format_args!("Flush already in progress"));
            return FlushOutcome::InFlight;
        };

        let items = {
            let queue = lock(&shared.queue);
            if queue.is_empty() {
                return FlushOutcome::Empty;
            }
            let items = queue.get_ready_items();
            lock(&shared.in_flight).extend(items.iter().map(QueueItem::id));
            items
        };
        if items.is_empty() {
            shared.log(format_args!("No events ready, all queued events exhausted retries"));
            return FlushOutcome::NothingReady;
        }

        let attempted = items.len();
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                session_id = %shared.session_id,
                attempted,
                "No tokio runtime, flush skipped"
            );
            bump(&shared.counters.flush_failures, 1);
            return FlushOutcome::Failed {
                attempted,
                error: "no tokio runtime".to_string(),
            };
        };
        bump(&shared.counters.flushes, 1);
        shared.log(format_args!("Flushing {} events", attempted));

        // A panicking transport surfaces as a JoinError instead of
        // unwinding through the caller
        let transport = shared.transport();
        let batch = items.clone();
        let result = runtime
            .spawn(async move { transport.send_batch(&batch).await })
            .await;

        match result {
            Ok(Ok(())) => {
                let removed = lock(&shared.queue).remove_transmitted_items(&items);
                bump(&shared.counters.events_sent, attempted as u64);
                shared.log(format_args!("Flushed {} events ({} still queued)", removed, self.queue_len()));
                FlushOutcome::Sent { events: attempted }
            }
            Ok(Err(error)) => {
                warn!(
                    session_id = %shared.session_id,
                    attempted,
                    kind = error.kind(),
                    error = %error,
                    "Flush failed, events kept for retry"
                );
                self.retry_later(&items, error.to_string())
            }
            Err(join_error) => {
                warn!(
                    session_id = %shared.session_id,
                    attempted,
                    error = %join_error,
                    "Transport panicked during flush, events kept for retry"
                );
                self.retry_later(&items, format!("transport panicked: {}", join_error))
            }
        }
    }

    fn retry_later(&self, items: &[QueueItem], error: String) -> FlushOutcome {
        lock(&self.shared.queue).mark_for_retry(items);
        bump(&self.shared.counters.flush_failures, 1);
        FlushOutcome::Failed {
            attempted: items.len(),
            error,
        }
    }

    /// Hand every queued record, dead letters included, to the beacon.
    ///
    /// Records in the batch of a running [`Monitor::flush`] are skipped;
    /// that flush still owns them. Does not wait for delivery. Records are
    /// removed only if the beacon accepted the payload.
    pub fn flush_sync(&self) -> BeaconOutcome {
        let shared = &self.shared;
        let mut queue = lock(&shared.queue);
        let items: Vec<QueueItem> = {
            let in_flight = lock(&shared.in_flight);
            queue
                .get_all()
                .into_iter()
                .filter(|item| !in_flight.contains(&item.id()))
                .collect()
        };
        if items.is_empty() {
            return BeaconOutcome::Empty;
        }

        let events: Vec<EventRecord> = items.iter().map(|item| item.record().clone()).collect();
        let count = events.len();

        if shared.transport().send_beacon(&events) {
            queue.remove_transmitted_items(&items);
            drop(queue);
            bump(&shared.counters.beacons_accepted, 1);
            shared.log(format_args!("Beacon accepted {} events", count));
            BeaconOutcome::Accepted(count)
        } else {
            drop(queue);
            bump(&shared.counters.beacons_rejected, 1);
            warn!(
                session_id = %shared.session_id,
                events = count,
                "Beacon not accepted, events may be lost"
            );
            BeaconOutcome::Rejected(count)
        }
    }

    /// The host is going away: close the current page and beacon the queue.
    pub fn handle_unload(&self) -> BeaconOutcome {
        lock(&self.shared.trackers)
            .page
            .visibility_changed(Visibility::Hidden);
        self.flush_sync()
    }

    /// Hidden closes the current page and beacons the queue; visible
    /// reopens it.
    pub fn handle_visibility_change(&self, visibility: Visibility) {
        lock(&self.shared.trackers)
            .page
            .visibility_changed(visibility);
        if visibility == Visibility::Hidden {
            self.flush_sync();
        }
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Capability for external trackers.
    pub fn event_sink(&self) -> EventSink {
        EventSink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Report an error; its source chain is recorded as the stack.
    pub fn track_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: Option<Map<String, Value>>,
    ) {
        lock(&self.shared.trackers).error.report_error(error, context);
    }

    /// Report a background task that panicked or was cancelled.
    pub fn track_task_failure(&self, error: &tokio::task::JoinError) {
        lock(&self.shared.trackers).error.report_task_failure(error);
    }

    pub fn track_resource_error(&self, kind: &str, resource_url: &str) {
        lock(&self.shared.trackers)
            .error
            .report_resource_error(kind, resource_url);
    }

    /// Record a page view; `url` and `title` default to the current page.
    pub fn track_page_view(&self, url: Option<&str>, title: Option<&str>) {
        lock(&self.shared.trackers).page.track_page_view(url, title);
    }

    pub fn track_custom_event(&self, event: CustomEvent) {
        let record = EventRecord::new(event, self.shared.stamp());
        self.shared.enqueue(record);
    }

    /// Move to a new page, emitting leave/enter records once initialized.
    pub fn navigate(&self, url: &str, title: &str) {
        lock(&self.shared.trackers).page.navigate(url, title);
    }

    pub fn page(&self) -> PageContext {
        read(&self.shared.page).clone()
    }

    pub fn mark(&self, name: &str) {
        lock(&self.shared.trackers).performance.mark(name);
    }

    /// Emit a timing metric between two marks; see
    /// [`PerformanceTracker::measure`](crate::trackers::PerformanceTracker::measure).
    pub fn measure(&self, name: &str, start_mark: Option<&str>, end_mark: Option<&str>) -> Option<u64> {
        lock(&self.shared.trackers)
            .performance
            .measure(name, start_mark, end_mark)
    }

    pub fn record_metrics(&self, metric_type: MetricType, metrics: Map<String, Value>) {
        lock(&self.shared.trackers)
            .performance
            .record(metric_type, metrics);
    }

    /// HTTP client whose requests are recorded while auto-tracking is on.
    pub fn http_client(&self) -> InstrumentedClient {
        lock(&self.shared.trackers).network.client()
    }

    // ------------------------------------------------------------------
    // Identity and configuration
    // ------------------------------------------------------------------

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Set the user id applied to records enqueued from now on.
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.shared.log(format_args!("User id set: {}", user_id));
        *write(&self.shared.user_id) = Some(user_id);
    }

    pub fn user_id(&self) -> Option<String> {
        read(&self.shared.user_id).clone()
    }

    pub fn config(&self) -> MonitorConfig {
        read(&self.shared.config).clone()
    }

    /// Apply a partial configuration update.
    ///
    /// The merged configuration is validated first; an invalid update
    /// leaves everything unchanged. Queue capacity, transport settings and
    /// the flush timer follow the new values immediately.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let previous = {
            let mut config = write(&self.shared.config);
            let next = config.merged(&update);
            next.validate()?;

            let transport_changed = next.server_url != config.server_url
                || next.timeout_ms != config.timeout_ms;
            if self.shared.owns_transport && transport_changed {
                let transmitter = Transmitter::from_config(&next)?;
                *write(&self.shared.transport) = Arc::new(transmitter);
            }

            std::mem::replace(&mut *config, next)
        };
        let next = self.config();

        if next.max_queue_size != previous.max_queue_size {
            let evicted = lock(&self.shared.queue).set_max_size(next.max_queue_size);
            bump(&self.shared.counters.events_evicted, evicted.len() as u64);
        }

        let timer_changed = next.enable_auto_flush != previous.enable_auto_flush
            || next.flush_interval_ms != previous.flush_interval_ms;
        if timer_changed {
            let _lifecycle = lock(&self.shared.lifecycle);
            let running = self.state() == MonitorState::Active
                && !self.shared.tearing_down.load(Ordering::Acquire);
            if running {
                // The old loop finishes any flush it is running, then exits
                if let Some(timer) = self.take_timer() {
                    drop(timer.stop());
                }
                if next.enable_auto_flush {
                    self.start_timer(next.flush_interval());
                }
            }
        }

        self.shared.log(format_args!("Configuration updated"));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn queue_len(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Copy of every queued item, oldest first
    pub fn queue_snapshot(&self) -> Vec<QueueItem> {
        lock(&self.shared.queue).get_all()
    }

    pub fn stats(&self) -> MonitorStats {
        self.shared.counters.snapshot()
    }
}
