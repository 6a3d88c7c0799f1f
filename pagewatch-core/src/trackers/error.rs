//! Error tracking: panics, task failures, manual reports.
//!
//! Panic capture is shared by every monitor in the process. While at least
//! one tracker is registered a single dispatcher hook is installed: it
//! records the panic into each registered sink, then runs the hook it
//! replaced. When the last tracker leaves, the replaced hook is put back,
//! unless another hook has since been installed over ours.

use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use serde_json::{Map, Value};

use crate::monitor::EventSink;
use crate::record::{ErrorEvent, ErrorType};

use super::Tracker;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

static PANIC_CAPTURE: Mutex<PanicCapture> = Mutex::new(PanicCapture {
    sinks: Vec::new(),
    dispatcher: None,
});

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

struct PanicCapture {
    sinks: Vec<(u64, EventSink)>,
    dispatcher: Option<Dispatcher>,
}

/// Our installed hook and the one it replaced.
struct Dispatcher {
    previous: Arc<PanicHook>,
    /// Identifies our boxed hook when it comes back from `take_hook`
    hook_addr: usize,
}

fn panic_capture() -> MutexGuard<'static, PanicCapture> {
    PANIC_CAPTURE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn hook_addr(hook: &PanicHook) -> usize {
    let ptr: *const (dyn Fn(&PanicHookInfo<'_>) + Sync + Send) = &**hook;
    ptr as *const () as usize
}

fn register_sink(sink: EventSink) -> u64 {
    let id = NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed);
    let mut capture = panic_capture();
    if capture.dispatcher.is_none() {
        capture.dispatcher = Some(install_dispatcher());
    }
    capture.sinks.push((id, sink));
    tracing::debug!(registration = id, sinks = capture.sinks.len(), "Panic capture registered");
    id
}

fn unregister_sink(id: u64) {
    let mut capture = panic_capture();
    capture.sinks.retain(|(other, _)| *other != id);
    if !capture.sinks.is_empty() {
        return;
    }
    let Some(dispatcher) = capture.dispatcher.take() else {
        return;
    };

    let current = std::panic::take_hook();
    if hook_addr(&current) != dispatcher.hook_addr {
        // Someone chained over us; ours stays below theirs as a pass-through
        std::panic::set_hook(current);
        capture.dispatcher = Some(dispatcher);
        return;
    }

    // Dropping our hook releases its reference to `previous`
    drop(current);
    match Arc::try_unwrap(dispatcher.previous) {
        Ok(hook) => std::panic::set_hook(hook),
        Err(shared) => std::panic::set_hook(Box::new(move |info| shared(info))),
    }
    tracing::debug!("Panic hook restored");
}

fn install_dispatcher() -> Dispatcher {
    let previous: Arc<PanicHook> = Arc::new(std::panic::take_hook());
    let chained = Arc::clone(&previous);
    let hook: PanicHook = Box::new(move |info| {
        dispatch(info);
        chained(info);
    });
    let hook_addr = hook_addr(&hook);
    std::panic::set_hook(hook);
    Dispatcher { previous, hook_addr }
}

/// Never blocks: a panic raised while the registry is being changed is
/// not recorded.
fn dispatch(info: &PanicHookInfo<'_>) {
    let sinks: Vec<EventSink> = match PANIC_CAPTURE.try_lock() {
        Ok(capture) => capture.sinks.iter().map(|(_, sink)| sink.clone()).collect(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned
            .into_inner()
            .sinks
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect(),
        Err(TryLockError::WouldBlock) => return,
    };
    if sinks.is_empty() {
        return;
    }

    let event = panic_event(info);
    for sink in sinks {
        sink.try_emit(event.clone());
    }
}

pub struct ErrorTracker {
    sink: EventSink,
    capture_panics: bool,
    active: bool,
    /// Our entry in the panic capture registry
    registration: Option<u64>,
}

impl ErrorTracker {
    pub fn new(sink: EventSink, capture_panics: bool) -> Self {
        Self {
            sink,
            capture_panics,
            active: false,
            registration: None,
        }
    }

    /// Whether panics are currently recorded into this tracker's sink
    pub fn captures_panics(&self) -> bool {
        self.registration.is_some()
    }

    /// Report an error value; its source chain becomes the stack.
    pub fn report_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: Option<Map<String, Value>>,
    ) {
        let mut event = ErrorEvent::new(ErrorType::Js, error.to_string());
        event.stack = source_chain(error);
        if let Some(context) = context {
            event.context = context;
        }
        self.sink.emit(event);
    }

    /// Report a background task that panicked or was cancelled.
    pub fn report_task_failure(&self, error: &tokio::task::JoinError) {
        let message = if error.is_cancelled() {
            "task cancelled".to_string()
        } else {
            format!("task panicked: {}", error)
        };
        self.sink.emit(ErrorEvent::new(ErrorType::Promise, message));
    }

    /// Report a resource (asset, config blob, remote file) that failed to load.
    pub fn report_resource_error(&self, kind: &str, resource_url: &str) {
        let mut event = ErrorEvent::new(
            ErrorType::Resource,
            format!("Resource loading failed: {}", kind),
        );
        event.filename = Some(resource_url.to_string());
        self.sink.emit(event);
    }

    fn stop_panic_capture(&mut self) {
        if let Some(id) = self.registration.take() {
            unregister_sink(id);
        }
    }
}

impl Tracker for ErrorTracker {
    fn name(&self) -> &'static str {
        "error"
    }

    fn init(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        if self.capture_panics {
            self.registration = Some(register_sink(self.sink.clone()));
        }
    }

    fn destroy(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.stop_panic_capture();
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for ErrorTracker {
    fn drop(&mut self) {
        // The hook cannot be swapped while this thread is panicking
        if std::thread::panicking() {
            return;
        }
        self.stop_panic_capture();
    }
}

fn panic_event(info: &PanicHookInfo<'_>) -> ErrorEvent {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string());

    let mut event = ErrorEvent::new(ErrorType::Js, message);
    if let Some(location) = info.location() {
        event.filename = Some(location.file().to_string());
        event.lineno = Some(location.line());
        event.colno = Some(location.column());
    }

    let backtrace = std::backtrace::Backtrace::capture();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        event.stack = Some(backtrace.to_string());
    }
    event
}

fn source_chain(error: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut lines = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
