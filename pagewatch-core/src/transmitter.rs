//! HTTP delivery to the collection endpoint
//!
//! Three strategies, matched to context:
//! - [`Transmitter::send`]: ordinary POST under a timeout, used by flushes
//! - [`Transmitter::send_beacon`]: fire-and-forget POST for shutdown paths
//! - [`Transmitter::send_pixel`]: GET with the batch in the query string,
//!   a last resort for endpoints that only accept simple requests
//!
//! All three carry the same body: `{"events": [...], "timestamp": <ms>}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::MonitorConfig;
use crate::error::{Error, Result, TransmitError};
use crate::queue::QueueItem;
use crate::record::{now_millis, EventRecord};

/// Largest body a beacon will carry (64 KiB, the usual browser limit)
pub const BEACON_MAX_BYTES: usize = 64 * 1024;

/// The delivery operations the monitor drives.
///
/// [`Transmitter`] is the production implementation; hosts can plug in
/// their own (e.g. to route through an existing HTTP stack).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a batch. An empty batch succeeds without any I/O.
    async fn send_batch(&self, items: &[QueueItem]) -> std::result::Result<(), TransmitError>;

    /// Hand a batch to background delivery.
    ///
    /// `true` means accepted for delivery, not received. `false` means
    /// nothing was sent.
    fn send_beacon(&self, events: &[EventRecord]) -> bool;
}

/// Request body for every delivery strategy
#[derive(Serialize)]
struct Envelope<'a> {
    events: Vec<&'a EventRecord>,
    timestamp: i64,
}

impl<'a> Envelope<'a> {
    fn new(events: Vec<&'a EventRecord>) -> Self {
        Self {
            events,
            timestamp: now_millis(),
        }
    }

    fn encode(&self) -> std::result::Result<Vec<u8>, TransmitError> {
        serde_json::to_vec(self).map_err(|e| TransmitError::Serialization(e.to_string()))
    }
}

/// HTTP client for the collection endpoint
pub struct Transmitter {
    http_client: reqwest::Client,
    server_url: String,
    timeout: Duration,
    /// Runtime that runs beacons; captured at construction when available
    runtime: Option<Handle>,
}

impl Transmitter {
    /// Create a transmitter with its own HTTP client
    pub fn new(server_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pagewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(http_client, server_url, timeout))
    }

    /// Create a transmitter from monitor configuration
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.server_url.clone(), config.timeout())
    }

    /// Create a transmitter on top of an existing client
    pub fn with_client(
        http_client: reqwest::Client,
        server_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            server_url: server_url.into(),
            timeout,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a batch of records, aborting after the configured timeout
    pub async fn send(&self, events: &[EventRecord]) -> std::result::Result<(), TransmitError> {
        self.post(&Envelope::new(events.iter().collect())).await
    }

    /// Deliver queued items. Empty batches succeed without a request.
    pub async fn send_batch(&self, items: &[QueueItem]) -> std::result::Result<(), TransmitError> {
        if items.is_empty() {
            return Ok(());
        }

        let envelope = Envelope::new(items.iter().map(QueueItem::record).collect());
        self.post(&envelope).await
    }

    async fn post(&self, envelope: &Envelope<'_>) -> std::result::Result<(), TransmitError> {
        let body = envelope.encode()?;
        let count = envelope.events.len();

        let request = self
            .http_client
            .post(&self.server_url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send();

        // Dropping the request future on timeout aborts the exchange
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TransmitError::Network(describe(&e))),
            Err(_) => return Err(TransmitError::Timeout(self.timeout)),
        };

        check_status(response.status())?;
        tracing::debug!(events = count, status = %response.status(), "Batch delivered");
        Ok(())
    }

    /// Queue a background POST and return whether it was accepted.
    ///
    /// Returns `false` without sending anything when no tokio runtime is
    /// reachable, when the batch cannot be encoded, or when it exceeds
    /// [`BEACON_MAX_BYTES`].
    pub fn send_beacon(&self, events: &[EventRecord]) -> bool {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::debug!("Beacon unavailable: no async runtime");
            return false;
        };

        let body = match Envelope::new(events.iter().collect()).encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Beacon rejected");
                return false;
            }
        };

        if body.len() > BEACON_MAX_BYTES {
            tracing::warn!(
                bytes = body.len(),
                limit = BEACON_MAX_BYTES,
                "Beacon rejected: payload too large"
            );
            return false;
        }

        let request = self
            .http_client
            .post(&self.server_url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(self.timeout)
            .body(body);
        let count = events.len();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    tracing::debug!(events = count, status = %response.status(), "Beacon delivered")
                }
                Err(e) => tracing::debug!(events = count, error = %e, "Beacon lost"),
            }
        });

        true
    }

    /// Deliver a batch as `GET <server_url>?data=<url-encoded body>`.
    ///
    /// Success is a 2xx answer, the equivalent of an image `load` event.
    pub async fn send_pixel(&self, events: &[EventRecord]) -> std::result::Result<(), TransmitError> {
        let body = Envelope::new(events.iter().collect()).encode()?;
        let data = String::from_utf8(body)
            .map_err(|e| TransmitError::Serialization(e.to_string()))?;

        let separator = if self.server_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}data={}",
            self.server_url,
            separator,
            urlencoding::encode(&data)
        );

        let request = self.http_client.get(&url).send();
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(TransmitError::Network(format!(
                    "pixel transmission failed: {}",
                    describe(&e)
                )))
            }
            Err(_) => return Err(TransmitError::Timeout(self.timeout)),
        };

        check_status(response.status())
    }
}

#[async_trait]
impl Transport for Transmitter {
    async fn send_batch(&self, items: &[QueueItem]) -> std::result::Result<(), TransmitError> {
        Transmitter::send_batch(self, items).await
    }

    fn send_beacon(&self, events: &[EventRecord]) -> bool {
        Transmitter::send_beacon(self, events)
    }
}

fn check_status(status: reqwest::StatusCode) -> std::result::Result<(), TransmitError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransmitError::Status {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        })
    }
}

/// Render a reqwest error with its source chain ("error sending request: connection refused")
fn describe(error: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
