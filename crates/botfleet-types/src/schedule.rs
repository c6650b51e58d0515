//! Schedule domain types: persisted cron bindings of workflows to profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A persisted cron-triggered binding of a workflow to a set of profiles.
///
/// `enabled = false` suppresses triggering without deleting history. The
/// schedule record (including its counters) survives process restart; only
/// in-flight execution state does not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// UUIDv7 schedule id.
    pub id: Uuid,
    /// Human-readable schedule name.
    pub name: String,
    /// Id of the workflow to run.
    pub workflow_id: Uuid,
    /// Cron expression or human-readable schedule string.
    pub cron: String,
    /// Whether the schedule fires.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Profile ids the workflow fans out across on each fire.
    #[serde(default)]
    pub profile_ids: Vec<String>,
    /// Per-profile retry budget for triggered runs.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-profile run timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrency cap for the fan-out (1 = sequential).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// When the schedule last fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Next computed fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    /// Total fires.
    #[serde(default)]
    pub run_count: u64,
    /// Fires where every profile succeeded.
    #[serde(default)]
    pub success_count: u64,
    /// Fires where at least one profile failed.
    #[serde(default)]
    pub failure_count: u64,
    /// When the schedule was created.
    pub created_at: DateTime<Utc>,
    /// When the schedule was last modified.
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    1
}

impl Schedule {
    /// Create a new enabled schedule with default limits.
    pub fn new(name: impl Into<String>, workflow_id: Uuid, cron: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            workflow_id,
            cron: cron.into(),
            enabled: true,
            profile_ids: Vec::new(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            last_run: None,
            next_run: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleRunSummary
// ---------------------------------------------------------------------------

/// Outcome of one schedule fire, with per-profile granularity.
///
/// A single profile's failure never aborts its peers; mixed results are the
/// normal reporting shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRunSummary {
    /// The schedule that fired.
    pub schedule_id: Uuid,
    /// When the fire started.
    pub fired_at: DateTime<Utc>,
    /// Profiles whose runs completed.
    pub succeeded: Vec<String>,
    /// Profiles whose runs failed, with the terminal error message.
    pub failed: Vec<(String, String)>,
}

impl ScheduleRunSummary {
    /// Whether every profile in the fire succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
