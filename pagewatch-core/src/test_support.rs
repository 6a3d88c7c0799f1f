//! Fixtures shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::config::MonitorConfig;
use crate::error::TransmitError;
use crate::monitor::Monitor;
use crate::queue::QueueItem;
use crate::record::EventRecord;
use crate::transmitter::Transport;

/// In-memory transport that records what it was asked to send.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub fail: AtomicBool,
    pub reject_beacons: AtomicBool,
    pub batches: Mutex<Vec<Vec<EventRecord>>>,
    pub beacons: Mutex<Vec<Vec<EventRecord>>>,
    /// Signalled whenever a batch send starts
    pub started: Notify,
    /// When set, each batch send waits for a permit before completing
    pub gate: Option<Notify>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn batches(&self) -> Vec<Vec<EventRecord>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn beacons(&self) -> Vec<Vec<EventRecord>> {
        self.beacons.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_batch(&self, items: &[QueueItem]) -> Result<(), TransmitError> {
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        self.batches
            .lock()
            .unwrap()
            .push(items.iter().map(|item| item.record().clone()).collect());

        if self.fail.load(Ordering::SeqCst) {
            Err(TransmitError::Status {
                code: 500,
                reason: "Internal Server Error".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn send_beacon(&self, events: &[EventRecord]) -> bool {
        if self.reject_beacons.load(Ordering::SeqCst) {
            return false;
        }
        self.beacons.lock().unwrap().push(events.to_vec());
        true
    }
}

/// Manual-only configuration: no timer, no hooks.
pub(crate) fn test_config() -> MonitorConfig {
    MonitorConfig {
        enable_auto_flush: false,
        enable_auto_track: false,
        capture_panics: false,
        page_url: Some("https://shop.example.com/".to_string()),
        user_agent: Some("pagewatch-test".to_string()),
        ..MonitorConfig::new("shop", "http://127.0.0.1:9/collect")
    }
}

pub(crate) fn test_monitor(config: MonitorConfig, transport: Arc<RecordingTransport>) -> Monitor {
    Monitor::with_transport(config, transport).unwrap()
}
