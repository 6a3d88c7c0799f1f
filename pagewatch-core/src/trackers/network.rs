//! Outbound HTTP instrumentation
//!
//! The host makes requests through an [`InstrumentedClient`]; while the
//! tracker is active each completed request (or failure) becomes a network
//! record. After destroy the client passes requests straight through.
//! The monitor's own transmitter uses a separate, uninstrumented client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reqwest::{Client, IntoUrl, Method, Request, RequestBuilder, Response};

use crate::monitor::EventSink;
use crate::record::NetworkEvent;

use super::Tracker;

pub struct NetworkTracker {
    sink: EventSink,
    client: Client,
    active: Arc<AtomicBool>,
}

impl NetworkTracker {
    pub fn new(sink: EventSink) -> Self {
        Self::with_client(sink, Client::new())
    }

    pub fn with_client(sink: EventSink, client: Client) -> Self {
        Self {
            sink,
            client,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A client whose requests are recorded while this tracker is active.
    pub fn client(&self) -> InstrumentedClient {
        InstrumentedClient {
            inner: self.client.clone(),
            sink: self.sink.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl Tracker for NetworkTracker {
    fn name(&self) -> &'static str {
        "network"
    }

    fn init(&mut self) {
        self.active.store(true, Ordering::SeqCst);
    }

    fn destroy(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// `reqwest::Client` wrapper that reports each request it executes.
#[derive(Clone)]
pub struct InstrumentedClient {
    inner: Client,
    sink: EventSink,
    active: Arc<AtomicBool>,
}

impl InstrumentedClient {
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.post(url)
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.inner.request(method, url)
    }

    /// Build and execute a request made with this client's builders.
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        self.execute(builder.build()?).await
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        if !self.active.load(Ordering::SeqCst) {
            return self.inner.execute(request).await;
        }

        let method = request.method().to_string();
        let request_url = request.url().to_string();
        let request_size = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(|bytes| bytes.len() as u64);

        let started = Instant::now();
        let result = self.inner.execute(request).await;
        let duration = started.elapsed().as_millis() as u64;

        let (status, response_size) = match &result {
            Ok(response) => (response.status().as_u16(), response.content_length()),
            Err(_) => (0, None),
        };

        self.sink.emit(NetworkEvent {
            method,
            request_url,
            status,
            duration,
            request_size,
            response_size,
        });

        result
    }
}
