//! Workflow domain types for Botfleet.
//!
//! Defines the canonical representation for automation workflows: an ordered
//! tree of steps (leaf actions plus control-flow constructs), the results
//! they produce, and the execution records that track a run. All types
//! roundtrip through YAML and JSON.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A named, ordered tree of steps with initial variable declarations.
///
/// Immutable once registered for a run; changing a workflow requires
/// re-registration under the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on first registration.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of top-level steps.
    pub steps: Vec<Step>,
    /// Initial variable declarations seeded into the run's scope store.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single step in a workflow tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// User-defined step id (e.g. "open-login-page"). Unique within a workflow.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// The kind of step, with type-specific children.
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The kind of step, internally tagged by `type` to match YAML structure:
///
/// ```yaml
/// - id: check-login
///   name: Check Login
///   type: condition
///   condition:
///     kind: comparison
///     left: "{{ status }}"
///     operator: eq
///     right: "ok"
///   then_steps: []
///   else_steps: []
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Leaf step dispatched to the registered action capability.
    Action {
        /// Action type tag resolved through the action registry at run time.
        action: String,
        /// Templated configuration; values are interpolated before dispatch.
        #[serde(default)]
        config: HashMap<String, Value>,
    },
    /// Conditional branching.
    Condition {
        condition: ConditionSpec,
        /// Invert the condition result before branching.
        #[serde(default)]
        negate: bool,
        #[serde(default)]
        then_steps: Vec<Step>,
        #[serde(default)]
        else_steps: Vec<Step>,
    },
    /// Loop over a body with one of four iteration disciplines.
    Loop {
        #[serde(rename = "loop")]
        loop_spec: LoopSpec,
        #[serde(default)]
        body: Vec<Step>,
    },
    /// Try/catch/finally block.
    TryCatch {
        #[serde(default)]
        try_steps: Vec<Step>,
        #[serde(default)]
        catch_steps: Vec<Step>,
        #[serde(default)]
        finally_steps: Vec<Step>,
        /// Variable name that receives `{message, stack}` on catch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_variable: Option<String>,
    },
    /// Terminate the nearest enclosing loop.
    Break,
    /// Skip to the next iteration of the nearest enclosing loop.
    Continue,
    /// Abort the whole run.
    Stop {
        /// Treat the stop as a failure rather than an early success.
        #[serde(default)]
        fail: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Emit a templated log line; produces no side effects.
    Log {
        message: String,
        #[serde(default)]
        level: LogLevel,
    },
    /// Inert annotation; skipped at execution time.
    Comment {
        #[serde(default)]
        text: String,
    },
    /// Invoke another registered workflow by id.
    CallWorkflow {
        workflow_id: Uuid,
        /// Wait for the nested execution to finish (vs fire-and-forget).
        #[serde(default = "default_true")]
        wait: bool,
    },
}

fn default_true() -> bool {
    true
}

/// Severity for `Log` steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// How a `Condition` step (or a `While` loop) decides its branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionSpec {
    /// Compare two templated operands.
    Comparison {
        left: Value,
        operator: ComparisonOperator,
        right: Value,
    },
    /// Substring check on a templated subject.
    TextContains { text: String, search: String },
    /// Check the current page URL for a fragment (via the action session).
    UrlContains { fragment: String },
    /// Check an element's state on the page (via the action session).
    ElementState { selector: String, state: ElementState },
    /// Free JEXL expression evaluated against the variable scope.
    Expression { expression: String },
}

/// Operators for `ConditionSpec::Comparison`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
}

/// Element states checkable through the action session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Exists,
    Visible,
    Hidden,
    Enabled,
    Disabled,
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// The four loop disciplines. The effective iteration bound is always
/// `min(requested, safety cap)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopSpec {
    /// Fixed iteration count.
    Count { count: u32 },
    /// Iterate over the elements of an array-valued expression.
    ForEach {
        /// Name bound to the current element inside the body.
        variable: String,
        /// Template or expression that resolves to a JSON array.
        items: Value,
    },
    /// One iteration per matched page element (via the action session).
    ElementCount {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u32>,
    },
    /// Repeat while a condition holds, bounded by a safety cap.
    While {
        condition: ConditionSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },
}

// ---------------------------------------------------------------------------
// Step results and control flow
// ---------------------------------------------------------------------------

/// Control signal carried by a successful `StepResult`.
///
/// Break/continue/stop are ordinary results interpreted by the enclosing
/// executor, never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ControlFlow {
    /// No signal; execution proceeds to the next sibling.
    Normal,
    /// Terminate the nearest enclosing loop.
    Break,
    /// Skip to the next iteration of the nearest enclosing loop.
    Continue,
    /// Abort the whole run.
    Stop { fail: bool },
    /// A condition step reporting which branch it selected.
    ConditionBranch { condition_met: bool },
    /// A loop step reporting its iteration outcome.
    LoopSummary {
        iterations: u32,
        /// False when the loop exited early via `break`.
        completed: bool,
    },
}

/// The outcome of one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step id matching `Step.id`.
    pub step_id: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
    /// Control signal for the enclosing executor.
    #[serde(default = "default_flow")]
    pub flow: ControlFlow,
    /// Free-form payload from the action or control-flow step.
    #[serde(default)]
    pub data: Value,
    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_flow() -> ControlFlow {
    ControlFlow::Normal
}

impl StepResult {
    /// A successful result with no control signal.
    pub fn ok(step_id: impl Into<String>, data: Value) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            timestamp: Utc::now(),
            flow: ControlFlow::Normal,
            data,
            error: None,
        }
    }

    /// A successful result carrying a control signal.
    pub fn signal(step_id: impl Into<String>, flow: ControlFlow) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            timestamp: Utc::now(),
            flow,
            data: Value::Null,
            error: None,
        }
    }

    /// A failed result.
    pub fn failed(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            timestamp: Utc::now(),
            flow: ControlFlow::Normal,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    /// Whether the status is terminal (Completed, Failed, or Stopped).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// A single execution instance of a workflow.
///
/// Created at run start, mutated only by the owning executor, terminal once
/// completed/failed/stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// UUIDv7 run id.
    pub id: Uuid,
    /// Id of the workflow being executed.
    pub workflow_id: Uuid,
    /// Current run status.
    pub status: ExecutionStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status (None while running).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Append-only trace of step results.
    pub results: Vec<StepResult>,
    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    /// Create a new running execution record for a workflow.
    pub fn new(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
