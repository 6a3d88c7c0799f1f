//! Normalized event records
//!
//! Every observation (error, page view, network call, performance metric,
//! custom event) becomes one [`EventRecord`]. Records serialize flat, with
//! an `eventType` discriminator next to the common fields:
//!
//! ```json
//! { "eventType": "network", "timestamp": 1718000000000, "sessionId": "session_...",
//!   "url": "https://shop.example.com/cart", "userAgent": "...", "appId": "shop",
//!   "method": "GET", "requestUrl": "/api/cart", "status": 200, "duration": 41 }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope keys; free-form property maps never carry these.
pub const RESERVED_KEYS: &[&str] = &[
    "eventType",
    "timestamp",
    "sessionId",
    "userId",
    "url",
    "userAgent",
    "appId",
];

const ERROR_FIELDS: &[&str] = &["message", "stack", "filename", "lineno", "colno", "errorType"];
const CUSTOM_FIELDS: &[&str] = &["name"];

fn is_reserved(key: &str, own_fields: &[&str]) -> bool {
    RESERVED_KEYS.contains(&key) || own_fields.contains(&key)
}

fn drop_reserved(map: &mut Map<String, Value>, own_fields: &[&str]) {
    map.retain(|key, _| {
        let reserved = is_reserved(key, own_fields);
        if reserved {
            tracing::debug!(key = %key, "Reserved key dropped from event properties");
        }
        !reserved
    });
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================
// Record envelope
// ============================================

/// One normalized observation.
///
/// The payload (and therefore the kind) is fixed at construction. The
/// common fields are stamped once when the record is built; only
/// `user_id` may still be filled in by the queue owner at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(flatten)]
    payload: EventPayload,
    pub timestamp: i64,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub url: String,
    pub user_agent: String,
    pub app_id: String,
}

/// Common fields shared by every record built in one context.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStamp {
    pub session_id: String,
    pub user_id: Option<String>,
    pub url: String,
    pub user_agent: String,
    pub app_id: String,
}

impl EventRecord {
    /// Build a record timestamped now.
    pub fn new(payload: impl Into<EventPayload>, stamp: RecordStamp) -> Self {
        Self::at(now_millis(), payload, stamp)
    }

    /// Build a record with an explicit timestamp.
    ///
    /// Context and property keys that collide with the envelope or the
    /// payload's own fields are dropped.
    pub fn at(timestamp: i64, payload: impl Into<EventPayload>, stamp: RecordStamp) -> Self {
        let mut payload = payload.into();
        payload.drop_reserved_keys();
        Self {
            payload,
            timestamp,
            session_id: stamp.session_id,
            user_id: stamp.user_id,
            url: stamp.url,
            user_agent: stamp.user_agent,
            app_id: stamp.app_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

/// Record discriminator, as it appears in `eventType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Error,
    Page,
    Network,
    Performance,
    Custom,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Error => "error",
            EventKind::Page => "page",
            EventKind::Network => "network",
            EventKind::Performance => "performance",
            EventKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "lowercase")]
pub enum EventPayload {
    Error(ErrorEvent),
    Page(PageEvent),
    Network(NetworkEvent),
    Performance(PerformanceEvent),
    Custom(CustomEvent),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::Page(_) => EventKind::Page,
            EventPayload::Network(_) => EventKind::Network,
            EventPayload::Performance(_) => EventKind::Performance,
            EventPayload::Custom(_) => EventKind::Custom,
        }
    }

    fn drop_reserved_keys(&mut self) {
        match self {
            EventPayload::Error(event) => drop_reserved(&mut event.context, ERROR_FIELDS),
            EventPayload::Custom(event) => drop_reserved(&mut event.properties, CUSTOM_FIELDS),
            EventPayload::Page(_) | EventPayload::Network(_) | EventPayload::Performance(_) => {}
        }
    }
}

// ============================================
// Payloads
// ============================================

/// Where an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// Synchronous failure (panic or reported error)
    Js,
    /// Failure of a background task
    Promise,
    /// A resource that failed to load
    Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    pub error_type: ErrorType,
    /// Caller-supplied context, merged into the record
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ErrorEvent {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            filename: None,
            lineno: None,
            colno: None,
            error_type,
            context: Map::new(),
        }
    }

    /// Add a context key; reserved keys are ignored.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key, ERROR_FIELDS) {
            self.context.insert(key, value.into());
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageAction {
    Enter,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    pub action: PageAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    pub title: String,
    /// Load time on `enter`, time spent on the page on `leave` (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub method: String,
    pub request_url: String,
    /// HTTP status, 0 when the request never got a response
    pub status: u16,
    /// Milliseconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Timing,
    Navigation,
    Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEvent {
    pub metric_type: MetricType,
    pub metrics: Map<String, Value>,
}

/// Host-defined event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Arbitrary properties, merged into the record
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl CustomEvent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            properties: Map::new(),
        }
    }

    /// Add a property; reserved keys are ignored.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key, CUSTOM_FIELDS) {
            self.properties.insert(key, value.into());
        }
        self
    }
}

impl From<ErrorEvent> for EventPayload {
    fn from(event: ErrorEvent) -> Self {
        EventPayload::Error(event)
    }
}

impl From<PageEvent> for EventPayload {
    fn from(event: PageEvent) -> Self {
        EventPayload::Page(event)
    }
}

impl From<NetworkEvent> for EventPayload {
    fn from(event: NetworkEvent) -> Self {
        EventPayload::Network(event)
    }
}

impl From<PerformanceEvent> for EventPayload {
    fn from(event: PerformanceEvent) -> Self {
        EventPayload::Performance(event)
    }
}

impl From<CustomEvent> for EventPayload {
    fn from(event: CustomEvent) -> Self {
        EventPayload::Custom(event)
    }
}

#[cfg(test)]
pub(crate) fn test_stamp() -> RecordStamp {
    RecordStamp {
        session_id: "session_1_abc".to_string(),
        user_id: None,
        url: "https://shop.example.com/".to_string(),
        user_agent: "pagewatch-test".to_string(),
        app_id: "shop".to_string(),
    }
}
