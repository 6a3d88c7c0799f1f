//! Page lifecycle tracking
//!
//! Emits an `enter` record when a page becomes current and a `leave` record
//! (carrying the time spent on it) when it stops being current: on
//! navigation, when the host is hidden, and on teardown.

use std::time::Instant;

use crate::monitor::EventSink;
use crate::record::{EventRecord, PageAction, PageEvent};

use super::Tracker;

/// Host visibility, as reported by [`crate::Monitor::handle_visibility_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

pub struct PageTracker {
    sink: EventSink,
    active: bool,
    /// When the current page was entered; `None` while hidden or inactive
    entered_at: Option<Instant>,
}

impl PageTracker {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            active: false,
            entered_at: None,
        }
    }

    /// Record a page view without touching the enter/leave bookkeeping.
    ///
    /// `url` and `title` default to the current page.
    pub fn track_page_view(&self, url: Option<&str>, title: Option<&str>) {
        let Some(mut stamp) = self.sink.stamp() else {
            return;
        };
        let page = self.sink.page().unwrap_or_default();
        if let Some(url) = url {
            stamp.url = url.to_string();
        }
        self.sink.enqueue(EventRecord::new(
            PageEvent {
                action: PageAction::Enter,
                referrer: page.referrer,
                title: title.map(str::to_string).unwrap_or(page.title),
                load_time: None,
            },
            stamp,
        ));
    }

    /// Move to a new page: leave the current one, update the page
    /// context, and enter the new one.
    ///
    /// Before `init` only the page context changes.
    pub fn navigate(&mut self, url: &str, title: &str) {
        if self.active {
            self.leave();
        }
        self.sink.set_location(url, title);
        if self.active {
            self.enter();
        }
    }

    pub fn visibility_changed(&mut self, visibility: Visibility) {
        if !self.active {
            return;
        }
        match visibility {
            Visibility::Hidden => self.leave(),
            Visibility::Visible if self.entered_at.is_none() => self.enter(),
            Visibility::Visible => {}
        }
    }

    fn enter(&mut self) {
        self.entered_at = Some(Instant::now());
        let page = self.sink.page().unwrap_or_default();
        self.sink.emit(PageEvent {
            action: PageAction::Enter,
            referrer: page.referrer,
            title: page.title,
            load_time: None,
        });
    }

    fn leave(&mut self) {
        let Some(entered_at) = self.entered_at.take() else {
            return;
        };
        let page = self.sink.page().unwrap_or_default();
        self.sink.emit(PageEvent {
            action: PageAction::Leave,
            referrer: page.referrer,
            title: page.title,
            load_time: Some(entered_at.elapsed().as_millis() as u64),
        });
    }
}

impl Tracker for PageTracker {
    fn name(&self) -> &'static str {
        "page"
    }

    fn init(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.enter();
    }

    fn destroy(&mut self) {
        if !self.active {
            return;
        }
        self.leave();
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
