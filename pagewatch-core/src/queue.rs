//! Bounded event queue with per-item retry state
//!
//! The queue always holds the most recent `max_size` records: when full,
//! `enqueue` evicts the oldest item first. Items that failed
//! [`MAX_RETRIES`] flushes stay in place (dead-lettered) and are skipped by
//! [`EventQueue::get_ready_items`] until FIFO pressure evicts them.
//!
//! Snapshots handed out by the queue are clones. Callers refer back to
//! queued items by [`ItemId`], so acting on a stale snapshot is harmless:
//! ids that are no longer queued are ignored.

use std::collections::VecDeque;

use crate::record::{now_millis, EventRecord};

/// Failed flush attempts after which an item is no longer sent.
pub const MAX_RETRIES: u32 = 3;

/// Identity of a queued item, unique for the queue's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

/// One queued record and its delivery state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    id: ItemId,
    record: EventRecord,
    retry_count: u32,
    timestamp: i64,
}

impl QueueItem {
    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn record(&self) -> &EventRecord {
        &self.record
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Enqueue time, or the time of the last retry mark (ms)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Whether the item is still eligible for a flush
    pub fn is_ready(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    pub fn into_record(self) -> EventRecord {
        self.record
    }
}

/// Bounded FIFO of pending records.
#[derive(Debug)]
pub struct EventQueue {
    items: VecDeque<QueueItem>,
    max_size: usize,
    next_id: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

impl EventQueue {
    /// Create a queue holding at most `max_size` items (at least one).
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
            next_id: 0,
        }
    }

    /// Append a record, evicting the oldest item when at capacity.
    ///
    /// Returns the evicted item, if any.
    pub fn enqueue(&mut self, record: EventRecord) -> Option<QueueItem> {
        let evicted = if self.items.len() >= self.max_size {
            self.items.pop_front()
        } else {
            None
        };

        let id = ItemId(self.next_id);
        self.next_id += 1;
        self.items.push_back(QueueItem {
            id,
            record,
            retry_count: 0,
            timestamp: now_millis(),
        });

        evicted
    }

    /// Remove and return the oldest item
    pub fn dequeue(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    /// The oldest item, without removing it
    pub fn peek(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Remove the item at `index` (0 is the oldest)
    pub fn remove(&mut self, index: usize) -> Option<QueueItem> {
        self.items.remove(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Snapshot of every queued item, oldest first
    pub fn get_all(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    /// Snapshot of the items below the retry ceiling, oldest first
    pub fn get_ready_items(&self) -> Vec<QueueItem> {
        self.items.iter().filter(|item| item.is_ready()).cloned().collect()
    }

    /// Number of items that exhausted their retries but are still queued
    pub fn dead_letter_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_ready()).count()
    }

    /// Count one more failed attempt for each given item still queued.
    pub fn mark_for_retry(&mut self, items: &[QueueItem]) {
        let now = now_millis();
        for attempted in items {
            if let Some(item) = self.items.iter_mut().find(|i| i.id == attempted.id) {
                item.retry_count += 1;
                item.timestamp = now;
            }
        }
    }

    /// Drop each given item still queued.
    ///
    /// Returns how many were actually removed.
    pub fn remove_transmitted_items(&mut self, items: &[QueueItem]) -> usize {
        let before = self.items.len();
        self.items
            .retain(|queued| !items.iter().any(|sent| sent.id == queued.id));
        before - self.items.len()
    }

    /// Change the capacity, evicting oldest items if now over it.
    ///
    /// Returns the evicted items.
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<QueueItem> {
        self.max_size = max_size.max(1);
        let overflow = self.items.len().saturating_sub(self.max_size);
        self.items.drain(..overflow).collect()
    }
}
