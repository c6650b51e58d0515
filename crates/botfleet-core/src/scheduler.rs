//! Cron scheduling of workflow fan-outs.
//!
//! Three layers:
//! - [`normalize_schedule`]: human-readable schedule strings to 6-field cron.
//! - [`CronRunner`]: `tokio-cron-scheduler` job lifecycle plus missed-run
//!   detection via `croner`.
//! - [`WorkflowScheduler`]: persisted [`Schedule`] records with counters,
//!   enable/disable, and manual triggering. The actual fan-out is delegated
//!   to an injected run function so the scheduler stays storage- and
//!   executor-agnostic.

use std::collections::HashMap;
use std::sync::Arc;

use botfleet_types::error::RepositoryError;
use botfleet_types::schedule::{Schedule, ScheduleRunSummary};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::repository::{ScheduleRepository, WorkflowRepository};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Schedule id not found.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// The schedule references an unregistered workflow.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Storage failure.
    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a human-readable schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N seconds"     -> "*/N * * * * *"
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "every hour"          -> "0 0 * * * *"
/// - "every day"           -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
/// - "hourly" / "daily" / "weekly"
///
/// 5-field cron expressions get "0" prepended for seconds; 6-field
/// expressions pass through unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();

    if lower == "every minute" || lower == "minutely" {
        return Ok("0 * * * * *".to_string());
    }
    if lower == "every hour" || lower == "hourly" {
        return Ok("0 0 * * * *".to_string());
    }
    if lower == "every day" || lower == "daily" {
        return Ok("0 0 0 * * *".to_string());
    }
    if lower == "every week" || lower == "weekly" {
        return Ok("0 0 0 * * 0".to_string());
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        // "every day at HH:MM"
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let time_parts: Vec<&str> = at_part.split(':').collect();
            if time_parts.len() == 2 {
                let hour: u32 = time_parts[0]
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
                let minute: u32 = time_parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
                if hour < 24 && minute < 60 {
                    return Ok(format!("0 {minute} {hour} * * *"));
                }
            }
            return Err(SchedulerError::InvalidSchedule(input.to_string()));
        }

        // "every N seconds/minutes/hours"
        let words: Vec<&str> = rest.split_whitespace().collect();
        if words.len() == 2 {
            let n: u32 = words[0]
                .parse()
                .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            let unit = words[1].trim_end_matches('s');
            return match unit {
                "second" => Ok(format!("*/{n} * * * * *")),
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(SchedulerError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

/// Next fire time of a normalized cron expression, if it parses.
pub fn next_occurrence(cron_expr: &str) -> Option<DateTime<Utc>> {
    let cron = cron_expr.parse::<croner::Cron>().ok()?;
    cron.iter_after(Utc::now()).next()
}

/// Fire times a schedule missed between its last run and now.
///
/// Schedules without a `last_run` baseline are skipped; so are schedules
/// whose cron fails to normalize or parse.
pub fn missed_runs(schedules: &[Schedule]) -> Vec<(Uuid, Vec<DateTime<Utc>>)> {
    let now = Utc::now();
    let mut missed = Vec::new();

    for schedule in schedules {
        let Ok(cron_expr) = normalize_schedule(&schedule.cron) else {
            continue;
        };
        let Ok(cron) = cron_expr.parse::<croner::Cron>() else {
            continue;
        };
        let Some(from) = schedule.last_run else {
            continue;
        };

        let mut missed_times = Vec::new();
        for next in cron.iter_after(from) {
            if next >= now {
                break;
            }
            missed_times.push(next);
        }

        if !missed_times.is_empty() {
            tracing::warn!(
                schedule_id = %schedule.id,
                count = missed_times.len(),
                "detected missed schedule fires"
            );
            missed.push((schedule.id, missed_times));
        }
    }

    missed
}

// ---------------------------------------------------------------------------
// CronRunner
// ---------------------------------------------------------------------------

/// Callback invoked when a cron trigger fires.
pub type CronCallback =
    Arc<dyn Fn(Uuid, DateTime<Utc>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Cron job lifecycle on top of `tokio-cron-scheduler`.
///
/// Maps schedule ids to registered jobs. Callbacks receive the schedule id
/// and the fire timestamp.
pub struct CronRunner {
    inner: Arc<RwLock<Option<JobScheduler>>>,
    /// schedule_id -> job id assigned by tokio-cron-scheduler.
    jobs: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl CronRunner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the underlying job scheduler. Must precede `schedule`.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let mut inner = self.inner.write().await;
        *inner = Some(scheduler);
        tracing::info!("cron runner started");
        Ok(())
    }

    /// Shut down and drop every registered job.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron runner stopped");
        }
        self.jobs.write().await.clear();
        Ok(())
    }

    /// Register a cron job for a schedule, replacing any existing
    /// registration for the same id. The expression must already be
    /// normalized to 6 fields.
    pub async fn schedule(
        &self,
        schedule_id: Uuid,
        cron_expr: &str,
        callback: CronCallback,
    ) -> Result<(), SchedulerError> {
        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("cron runner not started".to_string()))?;

        if let Some(old_id) = self.jobs.write().await.remove(&schedule_id) {
            scheduler
                .remove(&old_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let cb = callback.clone();
            Box::pin(async move {
                let now = Utc::now();
                tracing::debug!(%schedule_id, %now, "cron trigger fired");
                cb(schedule_id, now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        self.jobs.write().await.insert(schedule_id, job_id);
        tracing::info!(%schedule_id, %job_id, "schedule registered");
        Ok(())
    }

    /// Remove a schedule's cron job.
    pub async fn unschedule(&self, schedule_id: Uuid) -> Result<(), SchedulerError> {
        let job_id = self
            .jobs
            .write()
            .await
            .remove(&schedule_id)
            .ok_or(SchedulerError::ScheduleNotFound(schedule_id))?;

        let inner = self.inner.read().await;
        if let Some(scheduler) = inner.as_ref() {
            scheduler
                .remove(&job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }
        tracing::info!(%schedule_id, "schedule unregistered");
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

impl Default for CronRunner {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// WorkflowScheduler
// ---------------------------------------------------------------------------

/// Executes a schedule's fan-out and reports per-profile results.
///
/// Injected so the scheduler does not depend on a concrete executor wiring.
pub type ScheduleRunFn =
    Arc<dyn Fn(Schedule) -> BoxFuture<'static, ScheduleRunSummary> + Send + Sync>;

/// Point-in-time view of the scheduler for operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStatus {
    /// Whether the cron runner is started.
    pub running: bool,
    /// Cron jobs currently registered.
    pub registered_jobs: usize,
    /// Total persisted schedules.
    pub schedules: usize,
    /// Enabled persisted schedules.
    pub enabled: usize,
    /// Earliest upcoming fire across enabled schedules.
    pub next_fire: Option<DateTime<Utc>>,
}

struct SchedulerInner<S: ScheduleRepository> {
    schedules: Arc<S>,
    run_fn: ScheduleRunFn,
}

/// Persisted schedules bound to cron triggers.
///
/// Counters (`run_count`, `success_count`, `failure_count`) update after
/// every fire, manual or cron-driven, and persist through the repository.
pub struct WorkflowScheduler<S: ScheduleRepository + 'static> {
    inner: Arc<SchedulerInner<S>>,
    runner: CronRunner,
}

impl<S: ScheduleRepository + 'static> WorkflowScheduler<S> {
    pub fn new(schedules: Arc<S>, run_fn: ScheduleRunFn) -> Self {
        Self {
            inner: Arc::new(SchedulerInner { schedules, run_fn }),
            runner: CronRunner::new(),
        }
    }

    /// Start the cron runner and register every enabled persisted schedule.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.runner.start().await?;
        let all = self.inner.schedules.list().await?;
        for schedule in all.iter().filter(|s| s.enabled) {
            self.register(schedule).await?;
        }
        tracing::info!(schedules = all.len(), "workflow scheduler started");
        Ok(())
    }

    /// Stop the cron runner. Schedule records are untouched.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.runner.stop().await
    }

    /// Fires that were missed while the process was down, per schedule.
    pub async fn missed_since_last_run(
        &self,
    ) -> Result<Vec<(Uuid, Vec<DateTime<Utc>>)>, SchedulerError> {
        let all = self.inner.schedules.list().await?;
        let enabled: Vec<Schedule> = all.into_iter().filter(|s| s.enabled).collect();
        Ok(missed_runs(&enabled))
    }

    /// Create and persist a schedule, registering its cron job when the
    /// runner is started. Validates the workflow and the cron expression.
    pub async fn create<W: WorkflowRepository>(
        &self,
        registry: &W,
        mut schedule: Schedule,
    ) -> Result<Schedule, SchedulerError> {
        if registry.get(&schedule.workflow_id).await?.is_none() {
            return Err(SchedulerError::WorkflowNotFound(schedule.workflow_id));
        }
        schedule.cron = normalize_schedule(&schedule.cron)?;
        schedule.next_run = next_occurrence(&schedule.cron);
        schedule.updated_at = Utc::now();
        self.inner.schedules.save(&schedule).await?;

        if schedule.enabled && self.runner_started().await {
            self.register(&schedule).await?;
        }
        Ok(schedule)
    }

    /// Replace a schedule's record (name, cron, profiles, limits),
    /// re-normalizing the cron and re-registering the cron job. Counters
    /// and `last_run` carry over from the stored record.
    pub async fn update<W: WorkflowRepository>(
        &self,
        registry: &W,
        mut schedule: Schedule,
    ) -> Result<Schedule, SchedulerError> {
        let existing = self
            .inner
            .schedules
            .get(&schedule.id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(schedule.id))?;
        if registry.get(&schedule.workflow_id).await?.is_none() {
            return Err(SchedulerError::WorkflowNotFound(schedule.workflow_id));
        }
        schedule.cron = normalize_schedule(&schedule.cron)?;
        schedule.last_run = existing.last_run;
        schedule.run_count = existing.run_count;
        schedule.success_count = existing.success_count;
        schedule.failure_count = existing.failure_count;
        schedule.created_at = existing.created_at;
        schedule.next_run = if schedule.enabled {
            next_occurrence(&schedule.cron)
        } else {
            None
        };
        schedule.updated_at = Utc::now();
        self.inner.schedules.save(&schedule).await?;

        if self.runner_started().await {
            if schedule.enabled {
                self.register(&schedule).await?;
            } else {
                let _ = self.runner.unschedule(schedule.id).await;
            }
        }
        Ok(schedule)
    }

    /// Enable or disable a schedule, registering or dropping its cron job.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule, SchedulerError> {
        let mut schedule = self
            .inner
            .schedules
            .get(&id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(id))?;
        if schedule.enabled == enabled {
            return Ok(schedule);
        }
        schedule.enabled = enabled;
        schedule.next_run = if enabled {
            next_occurrence(&schedule.cron)
        } else {
            None
        };
        schedule.updated_at = Utc::now();
        self.inner.schedules.save(&schedule).await?;

        if self.runner_started().await {
            if enabled {
                self.register(&schedule).await?;
            } else {
                // Ignore "not registered": the runner may have started after
                // this schedule was disabled.
                let _ = self.runner.unschedule(id).await;
            }
        }
        Ok(schedule)
    }

    /// Delete a schedule and its cron job.
    pub async fn delete(&self, id: Uuid) -> Result<(), SchedulerError> {
        if !self.inner.schedules.delete(&id).await? {
            return Err(SchedulerError::ScheduleNotFound(id));
        }
        let _ = self.runner.unschedule(id).await;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Schedule>, SchedulerError> {
        Ok(self.inner.schedules.get(&id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Schedule>, SchedulerError> {
        Ok(self.inner.schedules.list().await?)
    }

    /// Trigger a schedule immediately, bypassing both cron and the enabled
    /// flag (a manual trigger is an explicit operator action). Counters
    /// update as for a cron fire.
    pub async fn run_now(&self, id: Uuid) -> Result<ScheduleRunSummary, SchedulerError> {
        let schedule = self
            .inner
            .schedules
            .get(&id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound(id))?;
        Ok(fire(&self.inner, schedule).await)
    }

    /// Running state, registered job count, and the earliest upcoming fire.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let all = self.inner.schedules.list().await?;
        let enabled = all.iter().filter(|s| s.enabled).count();
        let next_fire = all
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|s| s.next_run)
            .min();
        Ok(SchedulerStatus {
            running: self.runner_started().await,
            registered_jobs: self.runner.job_count().await,
            schedules: all.len(),
            enabled,
            next_fire,
        })
    }

    async fn runner_started(&self) -> bool {
        self.runner.inner.read().await.is_some()
    }

    async fn register(&self, schedule: &Schedule) -> Result<(), SchedulerError> {
        let inner = Arc::clone(&self.inner);
        let callback: CronCallback = Arc::new(move |schedule_id, _fired_at| {
            let inner = Arc::clone(&inner);
            Box::pin(async move {
                match inner.schedules.get(&schedule_id).await {
                    Ok(Some(schedule)) if schedule.enabled => {
                        fire(&inner, schedule).await;
                    }
                    Ok(_) => {
                        tracing::debug!(%schedule_id, "skipping fire for missing or disabled schedule");
                    }
                    Err(e) => {
                        tracing::warn!(%schedule_id, error = %e, "failed to load schedule on fire");
                    }
                }
            })
        });
        self.runner
            .schedule(schedule.id, &schedule.cron, callback)
            .await
    }
}

/// Run a schedule's fan-out and persist the updated counters.
async fn fire<S: ScheduleRepository>(
    inner: &Arc<SchedulerInner<S>>,
    mut schedule: Schedule,
) -> ScheduleRunSummary {
    tracing::info!(
        schedule_id = %schedule.id,
        schedule = schedule.name.as_str(),
        workflow_id = %schedule.workflow_id,
        profiles = schedule.profile_ids.len(),
        "schedule firing"
    );
    let summary = (inner.run_fn)(schedule.clone()).await;

    schedule.run_count += 1;
    if summary.all_succeeded() {
        schedule.success_count += 1;
    } else {
        schedule.failure_count += 1;
    }
    schedule.last_run = Some(summary.fired_at);
    schedule.next_run = next_occurrence(&schedule.cron);
    schedule.updated_at = Utc::now();
    if let Err(e) = inner.schedules.save(&schedule).await {
        tracing::warn!(schedule_id = %schedule.id, error = %e, "failed to persist schedule counters");
    }
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
