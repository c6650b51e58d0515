//! Step-level debug controller.
//!
//! A `DebugSession` gates an execution before every step: it can hold the
//! run at a breakpoint or after a single step, expose a variable snapshot
//! while paused, release the run to continue, or abort it. The executor
//! polls nothing; pausing is a cheap async wait on a `Notify`.
//!
//! One session belongs to one execution. `DebugRegistry` maps execution ids
//! to live sessions for external controllers (UI, API).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use botfleet_types::workflow::{ExecutionStatus, StepResult};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use super::scope::VariableScope;

// ---------------------------------------------------------------------------
// DebugSession
// ---------------------------------------------------------------------------

/// Observable lifecycle of a debugged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// Run mode as seen by the step gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugMode {
    /// Run freely, stopping only at breakpoints.
    Running,
    /// Held at the gate until resumed.
    Paused,
    /// Run exactly one step, then pause again.
    Stepping,
}

#[derive(Debug)]
struct DebugState {
    mode: DebugMode,
    breakpoints: HashSet<String>,
    /// An external pause request that takes effect at the next gate.
    pause_requested: bool,
    /// Set by `resume`: the next gate skips its breakpoint check, so a
    /// resume from a breakpoint does not immediately re-trigger.
    skip_next_breakpoint: bool,
    /// Step id the run is currently held at (None while running).
    paused_at: Option<String>,
    /// Variable snapshot captured when the run paused.
    snapshot: HashMap<String, Value>,
    /// Writes queued from outside the run, applied to the live scope at
    /// the next gate.
    pending_writes: Vec<(String, Value)>,
    /// Set by `stop`; the next gate aborts the run.
    stop_requested: bool,
    /// Terminal outcome once the run ends (or is stopped).
    outcome: Option<DebugStatus>,
    /// Top-level steps completed so far.
    current_step_index: usize,
    /// Result trace mirrored from the execution after each top-level step.
    results: Vec<StepResult>,
}

/// Debug controller for a single execution.
///
/// The executor calls [`gate`](Self::gate) before each step; everything else
/// is driven from outside the run.
pub struct DebugSession {
    state: Mutex<DebugState>,
    resumed: Notify,
}

impl DebugSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DebugState {
                mode: DebugMode::Running,
                breakpoints: HashSet::new(),
                pause_requested: false,
                skip_next_breakpoint: false,
                paused_at: None,
                snapshot: HashMap::new(),
                pending_writes: Vec::new(),
                stop_requested: false,
                outcome: None,
                current_step_index: 0,
                results: Vec::new(),
            }),
            resumed: Notify::new(),
        }
    }

    /// Create a session that starts paused at the first step.
    pub fn paused() -> Self {
        let session = Self::new();
        session.state.lock().unwrap().pause_requested = true;
        session
    }

    // -- breakpoints --------------------------------------------------------

    pub fn add_breakpoint(&self, step_id: impl Into<String>) {
        self.state.lock().unwrap().breakpoints.insert(step_id.into());
    }

    pub fn remove_breakpoint(&self, step_id: &str) {
        self.state.lock().unwrap().breakpoints.remove(step_id);
    }

    pub fn clear_breakpoints(&self) {
        self.state.lock().unwrap().breakpoints.clear();
    }

    pub fn breakpoints(&self) -> HashSet<String> {
        self.state.lock().unwrap().breakpoints.clone()
    }

    // -- control ------------------------------------------------------------

    /// Request a pause; takes effect before the next step begins.
    pub fn pause(&self) {
        self.state.lock().unwrap().pause_requested = true;
    }

    /// Release a paused run until the next breakpoint (or the end). The
    /// immediately following step skips its breakpoint check so the run
    /// makes progress past the pause site.
    pub fn continue_run(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.mode = DebugMode::Running;
            state.skip_next_breakpoint = true;
            state.paused_at = None;
        }
        self.resumed.notify_waiters();
    }

    /// Release a paused run for exactly one step, then pause again.
    pub fn step(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.mode = DebugMode::Stepping;
            state.paused_at = None;
        }
        self.resumed.notify_waiters();
    }

    /// Abort the run. Takes effect at the next gate; a paused run is
    /// released immediately.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.stop_requested = true;
            state.outcome = Some(DebugStatus::Stopped);
            state.mode = DebugMode::Running;
            state.paused_at = None;
        }
        self.resumed.notify_waiters();
    }

    // -- inspection ---------------------------------------------------------

    /// Lifecycle status: terminal outcome if the run ended, otherwise
    /// paused or running.
    pub fn status(&self) -> DebugStatus {
        let state = self.state.lock().unwrap();
        if let Some(outcome) = state.outcome {
            return outcome;
        }
        if state.mode == DebugMode::Paused {
            DebugStatus::Paused
        } else {
            DebugStatus::Running
        }
    }

    /// Number of top-level steps completed so far.
    pub fn current_step_index(&self) -> usize {
        self.state.lock().unwrap().current_step_index
    }

    /// Result trace of the run so far.
    pub fn results(&self) -> Vec<StepResult> {
        self.state.lock().unwrap().results.clone()
    }

    /// Whether the run is currently held at the gate.
    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().mode == DebugMode::Paused
    }

    /// Step id the run is held at, if paused.
    pub fn paused_at(&self) -> Option<String> {
        self.state.lock().unwrap().paused_at.clone()
    }

    /// Variable snapshot captured at the pause site. Empty unless paused.
    pub fn variables(&self) -> HashMap<String, Value> {
        self.state.lock().unwrap().snapshot.clone()
    }

    /// Queue a write into the run's base scope, applied before the next
    /// step executes. While paused the snapshot reflects the new value
    /// immediately.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        state.snapshot.insert(name.clone(), value.clone());
        state.pending_writes.push((name, value));
    }

    // -- the gate ------------------------------------------------------------

    /// Called by the executor before each step. Returns immediately while
    /// running; blocks (async) while the session is paused. Pending
    /// variable writes land in the scope's base map before the step runs.
    /// Returns `true` when the run should abort because `stop` was called.
    pub async fn gate(&self, step_id: &str, scope: &mut VariableScope) -> bool {
        let (should_pause, writes) = {
            let mut state = self.state.lock().unwrap();
            if state.stop_requested {
                return true;
            }
            let skip = std::mem::take(&mut state.skip_next_breakpoint);
            let requested = std::mem::take(&mut state.pause_requested);

            let hit = match state.mode {
                DebugMode::Paused => true,
                DebugMode::Stepping => true,
                DebugMode::Running => {
                    requested || (!skip && state.breakpoints.contains(step_id))
                }
            };
            if hit {
                state.mode = DebugMode::Paused;
                state.paused_at = Some(step_id.to_string());
                state.snapshot = scope.snapshot();
            }
            (hit, std::mem::take(&mut state.pending_writes))
        };
        for (name, value) in writes {
            scope.set_base(name, value);
        }

        if !should_pause {
            return false;
        }
        tracing::debug!(step_id, "execution paused");

        loop {
            // Register interest before re-checking so a release between the
            // check and the await is not lost.
            let resumed = self.resumed.notified();
            if !self.is_paused() {
                break;
            }
            resumed.await;
        }
        // Writes queued while paused take effect on this very step.
        let (writes, stopped) = {
            let mut state = self.state.lock().unwrap();
            (
                std::mem::take(&mut state.pending_writes),
                state.stop_requested,
            )
        };
        for (name, value) in writes {
            scope.set_base(name, value);
        }
        tracing::debug!(step_id, "execution resumed");
        stopped
    }

    // -- executor hooks ------------------------------------------------------

    /// Record progress after a top-level step finishes.
    pub(crate) fn advance(&self, index: usize, results: &[StepResult]) {
        let mut state = self.state.lock().unwrap();
        state.current_step_index = index;
        state.results = results.to_vec();
    }

    /// Record the terminal outcome once the execution ends. A `stop`
    /// already recorded wins over whatever the executor reports.
    pub(crate) fn finish(&self, status: &ExecutionStatus) {
        let mut state = self.state.lock().unwrap();
        if state.outcome.is_some() {
            return;
        }
        state.outcome = Some(match status {
            ExecutionStatus::Failed => DebugStatus::Failed,
            ExecutionStatus::Stopped => DebugStatus::Stopped,
            _ => DebugStatus::Completed,
        });
    }
}

impl Default for DebugSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DebugRegistry
// ---------------------------------------------------------------------------

/// Live debug sessions keyed by execution id.
#[derive(Default)]
pub struct DebugRegistry {
    sessions: DashMap<Uuid, Arc<DebugSession>>,
}

impl DebugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session for an execution.
    pub fn create(&self, execution_id: Uuid) -> Arc<DebugSession> {
        let session = Arc::new(DebugSession::new());
        self.sessions.insert(execution_id, Arc::clone(&session));
        session
    }

    pub fn get(&self, execution_id: &Uuid) -> Option<Arc<DebugSession>> {
        self.sessions.get(execution_id).map(|s| Arc::clone(&s))
    }

    /// Drop the session once its execution reaches a terminal status.
    pub fn remove(&self, execution_id: &Uuid) {
        self.sessions.remove(execution_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
