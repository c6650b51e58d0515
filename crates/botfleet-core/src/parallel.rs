//! Parallel executor: fan one workflow across N profiles under a
//! concurrency cap.
//!
//! A run owns a [`RunQueue`] of profiles and a set of active slots, both
//! behind one `std::sync::Mutex` that is never held across an await. A
//! dispatcher task fills slots from the queue; each slot provisions an
//! isolated session, runs the workflow, and reports back. Failed slots are
//! classified by the [`RetryManager`] and either re-enqueued after a backoff
//! delay or recorded as terminal failures. Every profile ends terminal in
//! exactly one of completed/failed.
//!
//! Control surface: pause gates slot filling only (in-flight runs finish),
//! stop cancels everything and force-closes active sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use botfleet_types::event::RunEvent;
use botfleet_types::queue::{QueueItem, QueueMode, QueueStats};
use botfleet_types::retry::RetryPolicy;
use botfleet_types::workflow::{ExecutionStatus, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::action::{ActionFuture, ActionSession};
use crate::event::EventBus;
use crate::queue::RunQueue;
use crate::repository::WorkflowRepository;
use crate::retry::RetryManager;
use crate::workflow::{ExecutionContext, StepExecutor};

// ---------------------------------------------------------------------------
// Profile and provisioning
// ---------------------------------------------------------------------------

/// One browser profile a workflow runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Stable profile identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Per-profile variable overrides layered over the workflow's declarations.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            variables: HashMap::new(),
        }
    }
}

/// Provisions an isolated action session for a profile.
///
/// Object-safe so runs can hold `Arc<dyn SessionProvider>`.
pub trait SessionProvider: Send + Sync {
    fn provision<'a>(&'a self, profile: &'a Profile)
        -> ActionFuture<'a, Arc<dyn ActionSession>>;
}

// ---------------------------------------------------------------------------
// Options and status
// ---------------------------------------------------------------------------

/// Tuning for one parallel run.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Concurrency cap; at most this many slots execute at once.
    pub max_concurrent: usize,
    /// Queue ordering discipline.
    pub queue_mode: QueueMode,
    /// Retry policy for failed slots.
    pub retry: RetryPolicy,
    /// Wall-clock budget per slot attempt.
    pub slot_timeout: Duration,
    /// Stagger between slot starts within one dispatch wave.
    pub delay_between: Duration,
    /// Abort the whole run on the first terminal slot failure.
    pub stop_on_error: bool,
    /// Event bus channel capacity.
    pub event_capacity: usize,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            queue_mode: QueueMode::Fifo,
            retry: RetryPolicy::default(),
            slot_timeout: Duration::from_secs(300),
            delay_between: Duration::ZERO,
            stop_on_error: false,
            event_capacity: 1024,
        }
    }
}

/// Lifecycle phase of a parallel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Running,
    Paused,
    Stopped,
    Completed,
}

/// Point-in-time view of a run for observers.
#[derive(Debug, Clone, Serialize)]
pub struct ParallelStatus {
    pub run_id: Uuid,
    pub phase: RunPhase,
    pub total: usize,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Slots waiting out a retry backoff.
    pub pending_retries: usize,
    /// Terminal profiles over total, 0-100.
    pub percent: u8,
    pub avg_duration_ms: Option<u64>,
    /// Estimated time to drain the remaining work at the current average
    /// duration and concurrency cap. None until one slot has finished.
    pub eta_ms: Option<u64>,
    pub elapsed_ms: u64,
    /// Terminal failures as `(profile_id, error)`.
    pub failures: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Run internals
// ---------------------------------------------------------------------------

struct ActiveSlot {
    profile_id: String,
    /// Set once provisioning succeeds; force-closed on stop.
    session: Option<Arc<dyn ActionSession>>,
}

struct RunState {
    queue: RunQueue,
    active: HashMap<Uuid, ActiveSlot>,
    completed: usize,
    failures: Vec<(String, String)>,
    durations_ms: Vec<u64>,
    pending_retries: usize,
    paused: bool,
    stopped: bool,
    finished: bool,
}

struct RunCore {
    run_id: Uuid,
    total: usize,
    max_concurrent: usize,
    slot_timeout: Duration,
    delay_between: Duration,
    stop_on_error: bool,
    retry: RetryManager,
    bus: EventBus,
    state: Mutex<RunState>,
    /// Wakes the dispatcher after any state change.
    wake: tokio::sync::Notify,
    cancel: CancellationToken,
    finished_tx: watch::Sender<bool>,
    started_at: Instant,
}

impl RunCore {
    fn status(&self) -> ParallelStatus {
        let state = self.state.lock().unwrap();
        let terminal = state.completed + state.failures.len();
        let percent = if self.total == 0 {
            100
        } else {
            ((terminal * 100) / self.total) as u8
        };
        let avg_duration_ms = if state.durations_ms.is_empty() {
            None
        } else {
            Some(state.durations_ms.iter().sum::<u64>() / state.durations_ms.len() as u64)
        };
        let remaining = state.queue.len() + state.active.len() + state.pending_retries;
        let eta_ms = avg_duration_ms.map(|avg| {
            let waves = remaining.div_ceil(self.max_concurrent.max(1));
            avg * waves as u64
        });
        let phase = if state.stopped {
            RunPhase::Stopped
        } else if state.finished {
            RunPhase::Completed
        } else if state.paused {
            RunPhase::Paused
        } else {
            RunPhase::Running
        };

        ParallelStatus {
            run_id: self.run_id,
            phase,
            total: self.total,
            queued: state.queue.len(),
            active: state.active.len(),
            completed: state.completed,
            failed: state.failures.len(),
            pending_retries: state.pending_retries,
            percent,
            avg_duration_ms,
            eta_ms,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            failures: state.failures.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ParallelRun handle
// ---------------------------------------------------------------------------

/// Handle to a live (or finished) parallel run.
pub struct ParallelRun {
    core: Arc<RunCore>,
}

impl ParallelRun {
    pub fn id(&self) -> Uuid {
        self.core.run_id
    }

    /// Subscribe to the run's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.core.bus.subscribe()
    }

    pub fn status(&self) -> ParallelStatus {
        self.core.status()
    }

    /// Stop filling slots. In-flight slots run to completion.
    pub fn pause(&self) {
        let mut state = self.core.state.lock().unwrap();
        if !state.paused && !state.finished {
            state.paused = true;
            drop(state);
            self.core.bus.publish(RunEvent::Paused);
        }
    }

    /// Resume slot filling.
    pub fn resume(&self) {
        let mut state = self.core.state.lock().unwrap();
        if state.paused {
            state.paused = false;
            drop(state);
            self.core.bus.publish(RunEvent::Resumed);
            self.core.wake.notify_one();
        }
    }

    /// Cancel the run: queued profiles fail with "run stopped", active
    /// sessions are force-closed.
    pub fn stop(&self) {
        self.core.cancel.cancel();
        self.core.wake.notify_one();
    }

    /// Switch queue ordering mid-run.
    pub fn set_queue_mode(&self, mode: QueueMode) {
        self.core.state.lock().unwrap().queue.set_mode(mode);
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.core.state.lock().unwrap().queue.stats()
    }

    /// Wait until every profile is terminal, then return the final status.
    pub async fn wait(&self) -> ParallelStatus {
        let mut rx = self.core.finished_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.status()
    }
}

// ---------------------------------------------------------------------------
// ParallelExecutor
// ---------------------------------------------------------------------------

/// Starts parallel runs of a workflow across profile sets.
pub struct ParallelExecutor<W: WorkflowRepository + 'static> {
    executor: StepExecutor<W>,
    provider: Arc<dyn SessionProvider>,
}

impl<W: WorkflowRepository + 'static> ParallelExecutor<W> {
    pub fn new(executor: StepExecutor<W>, provider: Arc<dyn SessionProvider>) -> Self {
        Self { executor, provider }
    }

    /// Start a run. Returns immediately with a handle; the work proceeds on
    /// background tasks.
    pub fn start(
        &self,
        workflow: Workflow,
        profiles: Vec<Profile>,
        options: StartOptions,
    ) -> ParallelRun {
        let run_id = Uuid::now_v7();
        let total = profiles.len();
        let mut queue = RunQueue::new(options.queue_mode);
        let mut failures = Vec::new();
        for profile in profiles {
            match serde_json::to_value(&profile) {
                Ok(payload) => queue.add(QueueItem::new(payload)),
                Err(e) => failures.push((profile.id.clone(), e.to_string())),
            }
        }

        let (finished_tx, _) = watch::channel(false);
        let core = Arc::new(RunCore {
            run_id,
            total,
            max_concurrent: options.max_concurrent.max(1),
            slot_timeout: options.slot_timeout,
            delay_between: options.delay_between,
            stop_on_error: options.stop_on_error,
            retry: RetryManager::new(options.retry),
            bus: EventBus::new(options.event_capacity),
            state: Mutex::new(RunState {
                queue,
                active: HashMap::new(),
                completed: 0,
                failures,
                durations_ms: Vec::new(),
                pending_retries: 0,
                paused: false,
                stopped: false,
                finished: false,
            }),
            wake: tokio::sync::Notify::new(),
            cancel: CancellationToken::new(),
            finished_tx,
            started_at: Instant::now(),
        });

        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            profiles = total,
            max_concurrent = core.max_concurrent,
            "starting parallel run"
        );
        core.bus.publish(RunEvent::Started {
            run_id,
            total_profiles: total,
        });

        tokio::spawn(dispatch_loop(
            Arc::clone(&core),
            self.executor.clone(),
            Arc::clone(&self.provider),
            Arc::new(workflow),
        ));

        ParallelRun { core }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

async fn dispatch_loop<W: WorkflowRepository + 'static>(
    core: Arc<RunCore>,
    executor: StepExecutor<W>,
    provider: Arc<dyn SessionProvider>,
    workflow: Arc<Workflow>,
) {
    loop {
        if core.cancel.is_cancelled() {
            drain_on_stop(&core);
        }

        // Fill free slots, then check for completion, all under one lock.
        let (batch, finished) = {
            let mut state = core.state.lock().unwrap();
            let mut batch = Vec::new();
            if !state.stopped {
                while !state.paused && state.active.len() < core.max_concurrent {
                    let Some(item) = state.queue.next() else { break };
                    let slot_id = Uuid::now_v7();
                    let profile_id = item
                        .payload
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    state.active.insert(
                        slot_id,
                        ActiveSlot {
                            profile_id,
                            session: None,
                        },
                    );
                    batch.push((slot_id, item));
                }
            }
            let finished = !state.finished
                && batch.is_empty()
                && state.active.is_empty()
                && state.queue.is_empty()
                && state.pending_retries == 0;
            if finished {
                state.finished = true;
            }
            (batch, finished)
        };

        for (offset, (slot_id, item)) in batch.into_iter().enumerate() {
            // Stagger starts within the wave; a stop releases the waiters.
            let stagger = core.delay_between * offset as u32;
            let core = Arc::clone(&core);
            let executor = executor.clone();
            let provider = Arc::clone(&provider);
            let workflow = Arc::clone(&workflow);
            tokio::spawn(async move {
                if !stagger.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(stagger) => {}
                        _ = core.cancel.cancelled() => {}
                    }
                }
                run_slot(core, executor, provider, workflow, slot_id, item).await;
            });
        }

        if finished {
            let status = core.status();
            tracing::info!(
                run_id = %core.run_id,
                completed = status.completed,
                failed = status.failed,
                elapsed_ms = status.elapsed_ms,
                "parallel run finished"
            );
            core.bus.publish(RunEvent::Completed {
                completed: status.completed,
                failed: status.failed,
                duration_ms: status.elapsed_ms,
            });
            let _ = core.finished_tx.send(true);
            return;
        }

        if core.cancel.is_cancelled() {
            // Already drained; only slot and timer completions move state
            // from here, so park on the wake alone.
            core.wake.notified().await;
        } else {
            tokio::select! {
                _ = core.wake.notified() => {}
                _ = core.cancel.cancelled() => {}
            }
        }
    }
}

/// On stop: fail everything still queued and force-close active sessions.
/// Active slot tasks observe the cancel token and record their own failures.
fn drain_on_stop(core: &RunCore) {
    let (first_stop, sessions) = {
        let mut state = core.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.stopped = true;
        while let Some(item) = state.queue.next() {
            let profile_id = item
                .payload
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            state.failures.push((profile_id, "run stopped".to_string()));
        }
        let sessions: Vec<Arc<dyn ActionSession>> = state
            .active
            .values()
            .filter_map(|slot| slot.session.clone())
            .collect();
        (true, sessions)
    };
    if first_stop {
        tracing::info!(run_id = %core.run_id, "stopping parallel run");
        core.bus.publish(RunEvent::Stopped);
        for session in sessions {
            tokio::spawn(async move {
                let _ = session.close().await;
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Slot task
// ---------------------------------------------------------------------------

async fn run_slot<W: WorkflowRepository + 'static>(
    core: Arc<RunCore>,
    executor: StepExecutor<W>,
    provider: Arc<dyn SessionProvider>,
    workflow: Arc<Workflow>,
    slot_id: Uuid,
    mut item: QueueItem,
) {
    let profile: Profile = match serde_json::from_value(item.payload.clone()) {
        Ok(profile) => profile,
        Err(e) => {
            finish_failed(&core, slot_id, "", &format!("bad profile payload: {e}"), 0, 0);
            return;
        }
    };

    core.bus.publish(RunEvent::SlotStarted {
        slot_id,
        profile_id: profile.id.clone(),
    });
    let slot_start = Instant::now();

    let attempt = attempt_slot(&core, &executor, &provider, &workflow, slot_id, &profile);
    let outcome = tokio::select! {
        _ = core.cancel.cancelled() => Err(SlotError {
            message: "run stopped".to_string(),
            retryable: false,
        }),
        outcome = attempt => outcome,
    };
    let duration_ms = slot_start.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            {
                let mut state = core.state.lock().unwrap();
                state.active.remove(&slot_id);
                state.completed += 1;
                state.durations_ms.push(duration_ms);
            }
            tracing::info!(
                run_id = %core.run_id,
                profile_id = profile.id.as_str(),
                duration_ms,
                "profile run succeeded"
            );
            core.bus.publish(RunEvent::SlotSucceeded {
                profile_id: profile.id.clone(),
                duration_ms,
            });
            core.bus.publish(RunEvent::SlotEnded { slot_id });
        }
        Err(error) => {
            let retry = error.retryable && core.retry.should_retry(item.retry_count, &error.message);
            if retry {
                let delay = core.retry.delay(item.retry_count);
                item.retry_count += 1;
                {
                    let mut state = core.state.lock().unwrap();
                    state.active.remove(&slot_id);
                    state.pending_retries += 1;
                }
                tracing::warn!(
                    run_id = %core.run_id,
                    profile_id = profile.id.as_str(),
                    retry_count = item.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = error.message.as_str(),
                    "profile run failed, re-enqueueing"
                );
                core.bus.publish(RunEvent::SlotRetried {
                    profile_id: profile.id.clone(),
                    retry_count: item.retry_count,
                    delay_ms: delay.as_millis() as u64,
                });
                core.bus.publish(RunEvent::SlotEnded { slot_id });

                let timer_core = Arc::clone(&core);
                let profile_id = profile.id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    {
                        let mut state = timer_core.state.lock().unwrap();
                        state.pending_retries -= 1;
                        if state.stopped {
                            // The run ended while the backoff was pending.
                            state.failures.push((profile_id, "run stopped".to_string()));
                        } else {
                            state.queue.add(item);
                        }
                    }
                    timer_core.wake.notify_one();
                });
            } else {
                finish_failed(
                    &core,
                    slot_id,
                    &profile.id,
                    &error.message,
                    item.retry_count,
                    duration_ms,
                );
            }
        }
    }
    core.wake.notify_one();
}

struct SlotError {
    message: String,
    retryable: bool,
}

/// One attempt: provision, seed scope, execute under the slot timeout.
async fn attempt_slot<W: WorkflowRepository + 'static>(
    core: &RunCore,
    executor: &StepExecutor<W>,
    provider: &Arc<dyn SessionProvider>,
    workflow: &Arc<Workflow>,
    slot_id: Uuid,
    profile: &Profile,
) -> Result<(), SlotError> {
    let session = provider.provision(profile).await.map_err(|e| SlotError {
        message: e.to_string(),
        retryable: true,
    })?;
    let already_stopped = {
        let mut state = core.state.lock().unwrap();
        if state.stopped {
            true
        } else {
            if let Some(slot) = state.active.get_mut(&slot_id) {
                slot.session = Some(Arc::clone(&session));
            }
            false
        }
    };
    if already_stopped {
        // Provisioning raced the stop; this session was never registered
        // for force-close, so release it here.
        let _ = session.close().await;
        return Err(SlotError {
            message: "run stopped".to_string(),
            retryable: false,
        });
    }

    let mut ctx = ExecutionContext::new(workflow, Arc::clone(&session));
    // A failed step fails the profile run; the retry policy decides what
    // happens to it next.
    ctx.continue_on_error = false;
    for (name, value) in &profile.variables {
        ctx.scope.set_base(name, value.clone());
    }
    ctx.scope.set_base("profile_id", json!(profile.id));
    ctx.scope.set_base("profile_name", json!(profile.name));

    let bus = core.bus.clone();
    let profile_id = profile.id.clone();
    let progress = move |current: usize, total: usize| {
        let percent = if total == 0 {
            100
        } else {
            ((current * 100) / total) as u8
        };
        bus.publish(RunEvent::Progress {
            slot_id,
            profile_id: profile_id.clone(),
            percent,
            current_step: current,
            total_steps: total,
        });
    };

    let result = tokio::time::timeout(
        core.slot_timeout,
        executor.execute(workflow, &mut ctx, Some(&progress)),
    )
    .await;
    let _ = session.close().await;

    match result {
        Err(_) => Err(SlotError {
            message: format!(
                "profile run timed out after {}s",
                core.slot_timeout.as_secs()
            ),
            retryable: true,
        }),
        Ok(execution) if execution.status == ExecutionStatus::Failed => Err(SlotError {
            message: execution
                .error
                .unwrap_or_else(|| "workflow execution failed".to_string()),
            retryable: true,
        }),
        Ok(_) => Ok(()),
    }
}

fn finish_failed(
    core: &RunCore,
    slot_id: Uuid,
    profile_id: &str,
    error: &str,
    retry_count: u32,
    duration_ms: u64,
) {
    {
        let mut state = core.state.lock().unwrap();
        state.active.remove(&slot_id);
        state
            .failures
            .push((profile_id.to_string(), error.to_string()));
    }
    tracing::warn!(
        run_id = %core.run_id,
        profile_id,
        retry_count,
        error,
        "profile run failed terminally"
    );
    core.bus.publish(RunEvent::SlotFailed {
        profile_id: profile_id.to_string(),
        error: error.to_string(),
        retry_count,
        duration_ms,
    });
    core.bus.publish(RunEvent::SlotEnded { slot_id });

    if core.stop_on_error && !core.cancel.is_cancelled() {
        tracing::warn!(run_id = %core.run_id, "aborting run on first failure");
        core.cancel.cancel();
        core.wake.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
