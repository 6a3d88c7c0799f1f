//! Performance metrics: startup time, marks, and measures.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::monitor::EventSink;
use crate::record::{MetricType, PerformanceEvent};

use super::Tracker;

pub struct PerformanceTracker {
    sink: EventSink,
    active: bool,
    marks: HashMap<String, Instant>,
}

impl PerformanceTracker {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            active: false,
            marks: HashMap::new(),
        }
    }

    /// Remember the current instant under `name`, replacing any earlier mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Emit a timing metric for the span between two marks.
    ///
    /// A missing `start_mark` means monitor creation; a missing `end_mark`
    /// means now. Returns the duration in ms, or `None` if a named mark
    /// does not exist.
    pub fn measure(
        &mut self,
        name: &str,
        start_mark: Option<&str>,
        end_mark: Option<&str>,
    ) -> Option<u64> {
        let start = match start_mark {
            Some(mark) => *self.marks.get(mark)?,
            None => self.sink.created_at()?,
        };
        let end = match end_mark {
            Some(mark) => *self.marks.get(mark)?,
            None => Instant::now(),
        };
        let duration = end.saturating_duration_since(start).as_millis() as u64;

        let mut metrics = Map::new();
        metrics.insert("name".to_string(), json!(name));
        metrics.insert("duration".to_string(), json!(duration));
        if let Some(mark) = start_mark {
            metrics.insert("startMark".to_string(), json!(mark));
        }
        if let Some(mark) = end_mark {
            metrics.insert("endMark".to_string(), json!(mark));
        }
        self.record(MetricType::Timing, metrics);

        Some(duration)
    }

    pub fn record(&self, metric_type: MetricType, metrics: Map<String, Value>) {
        self.sink.emit(PerformanceEvent {
            metric_type,
            metrics,
        });
    }
}

impl Tracker for PerformanceTracker {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn init(&mut self) {
        if self.active {
            return;
        }
        self.active = true;

        let Some(created_at) = self.sink.created_at() else {
            return;
        };
        let mut metrics = Map::new();
        metrics.insert(
            "startupTime".to_string(),
            json!(created_at.elapsed().as_millis() as u64),
        );
        self.record(MetricType::Navigation, metrics);
    }

    fn destroy(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.marks.clear();
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
