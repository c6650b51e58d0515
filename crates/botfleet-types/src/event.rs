//! Run lifecycle events published by the parallel executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discrete progress and lifecycle events for one parallel run.
///
/// Observers (schedulers, UIs) subscribe for the run's lifetime and react
/// incrementally instead of polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// The run has been started and profiles enqueued.
    Started { run_id: Uuid, total_profiles: usize },
    /// A slot picked up a profile and began executing.
    SlotStarted { slot_id: Uuid, profile_id: String },
    /// Per-slot step progress.
    Progress {
        slot_id: Uuid,
        profile_id: String,
        percent: u8,
        current_step: usize,
        total_steps: usize,
    },
    /// A slot's workflow execution completed.
    SlotSucceeded { profile_id: String, duration_ms: u64 },
    /// A failed slot was re-enqueued for another attempt.
    SlotRetried {
        profile_id: String,
        retry_count: u32,
        delay_ms: u64,
    },
    /// A slot failed terminally (retry budget exhausted or not retryable).
    SlotFailed {
        profile_id: String,
        error: String,
        retry_count: u32,
        duration_ms: u64,
    },
    /// A slot was released (after success, failure, or requeue).
    SlotEnded { slot_id: Uuid },
    /// Slot filling is paused; in-flight slots continue.
    Paused,
    /// Slot filling resumed.
    Resumed,
    /// The run was stopped and active slots force-released.
    Stopped,
    /// The run finished; all profiles are terminal.
    Completed {
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
}
