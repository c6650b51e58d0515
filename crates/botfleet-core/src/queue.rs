//! Run queue with four ordering modes.
//!
//! Items are kept in arrival order; the mode only decides which item
//! `next()` hands out, so switching modes mid-run never loses or reorders
//! entries. Priority mode orders by priority rank, then arrival within the
//! same rank. Not internally synchronized; the owner provides locking.

use botfleet_types::queue::{Priority, QueueItem, QueueMode, QueueStats};
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunQueue
// ---------------------------------------------------------------------------

/// Ordered collection of pending runs.
#[derive(Debug, Default)]
pub struct RunQueue {
    items: Vec<QueueItem>,
    mode: QueueMode,
}

impl RunQueue {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            items: Vec::new(),
            mode,
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Change the ordering mode. Items stay put; only selection changes.
    pub fn set_mode(&mut self, mode: QueueMode) {
        self.mode = mode;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item at the back.
    pub fn add(&mut self, item: QueueItem) {
        self.items.push(item);
    }

    /// Put an item at the front of arrival order, ahead of everything in
    /// FIFO mode.
    pub fn add_front(&mut self, item: QueueItem) {
        self.items.insert(0, item);
    }

    /// Remove and return the next item per the current mode.
    pub fn next(&mut self) -> Option<QueueItem> {
        let index = self.select_index()?;
        Some(self.items.remove(index))
    }

    /// The item `next()` would return, without removing it. Random mode
    /// peeks the front since the draw happens at removal time.
    pub fn peek(&self) -> Option<&QueueItem> {
        let index = match self.mode {
            QueueMode::Random => {
                if self.items.is_empty() {
                    return None;
                }
                0
            }
            _ => self.select_index()?,
        };
        self.items.get(index)
    }

    fn select_index(&self) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let index = match self.mode {
            QueueMode::Fifo => 0,
            QueueMode::Lifo => self.items.len() - 1,
            QueueMode::Random => rand::thread_rng().gen_range(0..self.items.len()),
            QueueMode::Priority => self
                .items
                .iter()
                .enumerate()
                .min_by_key(|(index, item)| (item.priority.rank(), *index))
                .map(|(index, _)| index)?,
        };
        Some(index)
    }

    /// Remove an item by id. Returns it if present.
    pub fn remove(&mut self, id: &Uuid) -> Option<QueueItem> {
        let index = self.items.iter().position(|item| item.id == *id)?;
        Some(self.items.remove(index))
    }

    /// Remove every item whose payload has `key` equal to `value`.
    /// Returns the number removed.
    pub fn remove_by_payload(&mut self, key: &str, value: &Value) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| item.payload.get(key) != Some(value));
        before - self.items.len()
    }

    /// Move an item to the front of arrival order.
    pub fn move_to_front(&mut self, id: &Uuid) -> bool {
        match self.items.iter().position(|item| item.id == *id) {
            Some(index) => {
                let item = self.items.remove(index);
                self.items.insert(0, item);
                true
            }
            None => false,
        }
    }

    /// Move an item to the back of arrival order.
    pub fn move_to_back(&mut self, id: &Uuid) -> bool {
        match self.items.iter().position(|item| item.id == *id) {
            Some(index) => {
                let item = self.items.remove(index);
                self.items.push(item);
                true
            }
            None => false,
        }
    }

    /// Change an item's priority in place.
    pub fn update_priority(&mut self, id: &Uuid, priority: Priority) -> bool {
        match self.items.iter_mut().find(|item| item.id == *id) {
            Some(item) => {
                item.priority = priority;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Snapshot of queued items in arrival order.
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn stats(&self) -> QueueStats {
        let now = chrono::Utc::now();
        let mut by_priority = std::collections::HashMap::new();
        for item in &self.items {
            *by_priority.entry(item.priority).or_insert(0usize) += 1;
        }
        let oldest_age_ms = self
            .items
            .iter()
            .map(|item| (now - item.added_at).num_milliseconds().max(0) as u64)
            .max();
        QueueStats {
            total: self.items.len(),
            by_priority,
            oldest_age_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
