//! Queue domain types: pending work items and ordering policy.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Dispatch priority for queued work items.
///
/// The rank table is fixed: lower rank dispatches first in priority mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Fixed rank used for priority-mode ordering (lower dispatches first).
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// QueueItem
// ---------------------------------------------------------------------------

/// One pending unit of work.
///
/// Owned exclusively by the queue while pending; ownership transfers to a
/// slot when dispatched. An item is never simultaneously queued and active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// UUIDv7 item id.
    pub id: Uuid,
    /// Opaque payload (typically a profile descriptor).
    pub payload: Value,
    /// Dispatch priority.
    #[serde(default)]
    pub priority: Priority,
    /// When the item entered the queue.
    pub added_at: DateTime<Utc>,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueItem {
    /// Create a new item with `Normal` priority and zero retries.
    pub fn new(payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            priority: Priority::Normal,
            added_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Create a new item with an explicit priority.
    pub fn with_priority(payload: Value, priority: Priority) -> Self {
        Self {
            priority,
            ..Self::new(payload)
        }
    }
}

// ---------------------------------------------------------------------------
// QueueMode
// ---------------------------------------------------------------------------

/// The ordering discipline governing which pending item dispatches next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    #[default]
    Fifo,
    Lifo,
    Random,
    Priority,
}

// ---------------------------------------------------------------------------
// QueueStats
// ---------------------------------------------------------------------------

/// Snapshot of queue contents for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of pending items.
    pub total: usize,
    /// Pending counts keyed by priority.
    pub by_priority: HashMap<Priority, usize>,
    /// Age of the oldest pending item in milliseconds (None when empty).
    pub oldest_age_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
