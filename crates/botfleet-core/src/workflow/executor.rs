//! Workflow step executor: sequential interpretation of a step tree.
//!
//! `StepExecutor` walks a workflow's steps in order against one
//! `ActionSession`, handling control flow (conditions, four loop kinds,
//! try/catch/finally, break/continue/stop) and producing an append-only
//! `StepResult` trace. Control signals are ordinary successful results
//! interpreted by the enclosing level -- never exceptions.
//!
//! Within one run, execution is strictly sequential: a step's action call
//! resolves before the next step begins, and loop scope push/pop makes
//! iterations sequential by construction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use botfleet_types::error::RepositoryError;
use botfleet_types::workflow::{
    ComparisonOperator, ConditionSpec, ControlFlow, Execution, ExecutionStatus, LogLevel,
    LoopSpec, Step, StepKind, StepResult, Workflow,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::action::ActionSession;
use crate::repository::WorkflowRepository;

use super::debug::DebugSession;
use super::expression::ScopeEvaluator;
use super::scope::{value_to_string, VariableScope};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Runtime safety cap applied to every loop's iteration bound.
pub const DEFAULT_LOOP_SAFETY_CAP: u32 = 100;

/// Maximum nested call-workflow depth.
pub const MAX_WORKFLOW_DEPTH: u32 = 5;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Per-run aggregate: variable scope, action session, and the result trace.
pub struct ExecutionContext {
    /// Named values for this run.
    pub scope: VariableScope,
    /// Opaque handle to the profile's isolated browser session.
    pub session: Arc<dyn ActionSession>,
    /// Whether a failed step aborts the run (false) or is recorded and
    /// skipped (true). True at the top level by default; forced false
    /// inside `try` blocks.
    pub continue_on_error: bool,
    /// Call-workflow nesting depth.
    pub depth: u32,
    /// Append-only trace of step results.
    pub results: Vec<StepResult>,
    /// Debug controller handle; when present, every step passes its gate.
    pub debug: Option<Arc<DebugSession>>,
}

impl ExecutionContext {
    /// Create a context for a workflow run, seeding the scope with the
    /// workflow's initial variable declarations.
    pub fn new(workflow: &Workflow, session: Arc<dyn ActionSession>) -> Self {
        Self {
            scope: VariableScope::new(workflow.variables.clone()),
            session,
            continue_on_error: true,
            depth: 0,
            results: Vec::new(),
            debug: None,
        }
    }

    fn push_result(&mut self, result: StepResult) {
        self.results.push(result);
    }
}

// ---------------------------------------------------------------------------
// StepFlow
// ---------------------------------------------------------------------------

/// How a sequence of steps ended, as seen by the enclosing level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    /// All steps ran (or were skipped per `continue_on_error`).
    Completed,
    /// A `break` signal is propagating to the nearest enclosing loop.
    Break,
    /// A `continue` signal is propagating to the nearest enclosing loop.
    Continue,
    /// A graceful `stop` terminated the run early.
    Stopped,
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A step failed and the context did not allow continuing.
    #[error("step '{step_name}' ({step_id}) failed: {error}")]
    StepFailed {
        step_id: String,
        step_name: String,
        error: String,
    },

    /// A `stop` step with `fail: true` aborted the run.
    #[error("workflow stopped with failure: {message}")]
    StoppedWithFailure { message: String },

    /// A call-workflow step referenced an unregistered workflow.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(uuid::Uuid),

    /// Call-workflow nesting exceeded the depth cap.
    #[error("workflow nesting depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// Workflow registry lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RepositoryError),
}

/// Progress notifier invoked after each top-level step: `(done, total)`.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Interprets workflow step trees.
///
/// Generic over `W: WorkflowRepository`, the registry used to resolve
/// call-workflow targets. Cheap to clone (shared internals).
pub struct StepExecutor<W: WorkflowRepository + 'static> {
    registry: Arc<W>,
    evaluator: Arc<ScopeEvaluator>,
}

impl<W: WorkflowRepository + 'static> Clone for StepExecutor<W> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            evaluator: Arc::clone(&self.evaluator),
        }
    }
}

impl<W: WorkflowRepository + 'static> StepExecutor<W> {
    /// Create an executor backed by a workflow registry.
    pub fn new(registry: Arc<W>) -> Self {
        Self {
            registry,
            evaluator: Arc::new(ScopeEvaluator::new()),
        }
    }

    /// Execute a whole workflow against a context.
    ///
    /// Never returns an error: every outcome is folded into the returned
    /// [`Execution`]'s status and error message. `progress` (if given) is
    /// invoked after each top-level step.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        ctx: &mut ExecutionContext,
        progress: Option<&ProgressFn>,
    ) -> Execution {
        let mut execution = Execution::new(workflow.id);
        tracing::info!(
            execution_id = %execution.id,
            workflow = workflow.name.as_str(),
            steps = workflow.steps.len(),
            "starting workflow execution"
        );

        // Inline top-level loop so a debug session sees the step index and
        // result trace advance after every top-level step.
        let total = workflow.steps.len();
        let mut outcome = Ok(StepFlow::Completed);
        for (index, step) in workflow.steps.iter().enumerate() {
            let flow = match self.execute_step(step, ctx).await {
                Ok(flow) => flow,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            if let Some(notify) = progress {
                notify(index + 1, total);
            }
            if flow != StepFlow::Completed {
                outcome = Ok(flow);
                break;
            }
            if ctx.depth == 0 {
                if let Some(debug) = &ctx.debug {
                    debug.advance(index + 1, &ctx.results);
                }
            }
        }
        execution.results = std::mem::take(&mut ctx.results);
        execution.completed_at = Some(Utc::now());

        match outcome {
            // A bare break/continue outside any loop is a no-op early
            // return from the top-level sequence.
            Ok(StepFlow::Completed) | Ok(StepFlow::Break) | Ok(StepFlow::Continue) => {
                execution.status = ExecutionStatus::Completed;
            }
            Ok(StepFlow::Stopped) => {
                execution.status = ExecutionStatus::Stopped;
            }
            Err(e) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(e.to_string());
                tracing::warn!(
                    execution_id = %execution.id,
                    workflow = workflow.name.as_str(),
                    error = %e,
                    "workflow execution failed"
                );
            }
        }

        if ctx.depth == 0 {
            if let Some(debug) = &ctx.debug {
                debug.finish(&execution.status);
            }
        }

        execution
    }

    /// Execute a sequence of sibling steps, interpreting control signals.
    ///
    /// Break/continue/stop propagate upward without executing subsequent
    /// siblings; the nearest enclosing loop consumes break/continue.
    pub async fn execute_steps(
        &self,
        steps: &[Step],
        ctx: &mut ExecutionContext,
        progress: Option<&ProgressFn>,
    ) -> Result<StepFlow, ExecutorError> {
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            let flow = self.execute_step(step, ctx).await?;
            if let Some(notify) = progress {
                notify(index + 1, total);
            }
            if flow != StepFlow::Completed {
                return Ok(flow);
            }
        }
        Ok(StepFlow::Completed)
    }

    /// Execute exactly one step, appending its result(s) to the context.
    ///
    /// Boxed for recursion: conditions, loops, and try blocks re-enter
    /// `execute_steps` for their children.
    pub fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepFlow, ExecutorError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(debug) = ctx.debug.clone() {
                if debug.gate(&step.id, &mut ctx.scope).await {
                    return Ok(StepFlow::Stopped);
                }
            }
            tracing::debug!(step_id = step.id.as_str(), step = step.name.as_str(), "executing step");
            match &step.kind {
                StepKind::Action { action, config } => {
                    self.run_action(step, action, config, ctx).await
                }
                StepKind::Condition {
                    condition,
                    negate,
                    then_steps,
                    else_steps,
                } => {
                    let raw = self.evaluate_condition(condition, ctx).await;
                    let condition_met = raw != *negate;
                    ctx.push_result(StepResult::signal(
                        &step.id,
                        ControlFlow::ConditionBranch { condition_met },
                    ));
                    let branch = if condition_met { then_steps } else { else_steps };
                    self.execute_steps(branch, ctx, None).await
                }
                StepKind::Loop { loop_spec, body } => {
                    self.run_loop(step, loop_spec, body, ctx).await
                }
                StepKind::TryCatch {
                    try_steps,
                    catch_steps,
                    finally_steps,
                    error_variable,
                } => {
                    self.run_try_catch(
                        step,
                        try_steps,
                        catch_steps,
                        finally_steps,
                        error_variable.as_deref(),
                        ctx,
                    )
                    .await
                }
                StepKind::Break => {
                    ctx.push_result(StepResult::signal(&step.id, ControlFlow::Break));
                    Ok(StepFlow::Break)
                }
                StepKind::Continue => {
                    ctx.push_result(StepResult::signal(&step.id, ControlFlow::Continue));
                    Ok(StepFlow::Continue)
                }
                StepKind::Stop { fail, message } => {
                    let message = message
                        .as_deref()
                        .map(|m| ctx.scope.interpolate(m))
                        .unwrap_or_default();
                    ctx.push_result(StepResult {
                        data: json!({ "message": message }),
                        ..StepResult::signal(&step.id, ControlFlow::Stop { fail: *fail })
                    });
                    if *fail {
                        Err(ExecutorError::StoppedWithFailure { message })
                    } else {
                        Ok(StepFlow::Stopped)
                    }
                }
                StepKind::Log { message, level } => {
                    let message = ctx.scope.interpolate(message);
                    match level {
                        LogLevel::Debug => tracing::debug!(step_id = step.id.as_str(), "{message}"),
                        LogLevel::Info => tracing::info!(step_id = step.id.as_str(), "{message}"),
                        LogLevel::Warn => tracing::warn!(step_id = step.id.as_str(), "{message}"),
                        LogLevel::Error => tracing::error!(step_id = step.id.as_str(), "{message}"),
                    }
                    ctx.push_result(StepResult::ok(&step.id, json!({ "message": message })));
                    Ok(StepFlow::Completed)
                }
                StepKind::Comment { text } => {
                    ctx.push_result(StepResult::ok(&step.id, json!({ "comment": text })));
                    Ok(StepFlow::Completed)
                }
                StepKind::CallWorkflow { workflow_id, wait } => {
                    self.run_call_workflow(step, *workflow_id, *wait, ctx).await
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Leaf actions
    // -----------------------------------------------------------------------

    async fn run_action(
        &self,
        step: &Step,
        action: &str,
        config: &HashMap<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, ExecutorError> {
        let interpolated = ctx.scope.interpolate_config(config);
        let session = Arc::clone(&ctx.session);

        let outcome = if session.has_action(action) {
            session.execute(action, &mut ctx.scope, &interpolated).await
        } else {
            Err(crate::action::ActionError::UnknownAction(action.to_string()))
        };

        match outcome {
            Ok(data) => {
                ctx.push_result(StepResult::ok(&step.id, data));
                Ok(StepFlow::Completed)
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(
                    step_id = step.id.as_str(),
                    step = step.name.as_str(),
                    error = error.as_str(),
                    "action step failed"
                );
                ctx.push_result(StepResult::failed(&step.id, &error));
                self.fail_or_continue(step, error, ctx)
            }
        }
    }

    /// Apply the context's `continue_on_error` policy to a failed step.
    fn fail_or_continue(
        &self,
        step: &Step,
        error: String,
        ctx: &ExecutionContext,
    ) -> Result<StepFlow, ExecutorError> {
        if ctx.continue_on_error {
            Ok(StepFlow::Completed)
        } else {
            Err(ExecutorError::StepFailed {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                error,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    /// Evaluate a condition spec. A condition never fails: lookup or
    /// evaluation errors resolve to `false`.
    async fn evaluate_condition(&self, spec: &ConditionSpec, ctx: &ExecutionContext) -> bool {
        match spec {
            ConditionSpec::Comparison {
                left,
                operator,
                right,
            } => {
                let left = ctx.scope.interpolate_value(left);
                let right = ctx.scope.interpolate_value(right);
                compare_values(&left, *operator, &right)
            }
            ConditionSpec::TextContains { text, search } => {
                let text = ctx.scope.interpolate(text);
                let search = ctx.scope.interpolate(search);
                text.contains(&search)
            }
            ConditionSpec::UrlContains { fragment } => {
                let fragment = ctx.scope.interpolate(fragment);
                match ctx.session.current_url().await {
                    Ok(url) => url.contains(&fragment),
                    Err(e) => {
                        tracing::warn!(error = %e, "url check failed, condition is false");
                        false
                    }
                }
            }
            ConditionSpec::ElementState { selector, state } => {
                let selector = ctx.scope.interpolate(selector);
                match ctx.session.element_state(&selector, *state).await {
                    Ok(met) => met,
                    Err(e) => {
                        tracing::warn!(error = %e, "element check failed, condition is false");
                        false
                    }
                }
            }
            ConditionSpec::Expression { expression } => {
                self.evaluator.evaluate_bool(expression, &ctx.scope)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn run_loop(
        &self,
        step: &Step,
        spec: &LoopSpec,
        body: &[Step],
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, ExecutorError> {
        // Resolve the iteration bound and any per-iteration bindings.
        let (bound, named) = match spec {
            LoopSpec::Count { count } => ((*count).min(DEFAULT_LOOP_SAFETY_CAP), None),
            LoopSpec::ForEach { variable, items } => {
                let items = self.resolve_items(items, &ctx.scope);
                let bound = (items.len() as u32).min(DEFAULT_LOOP_SAFETY_CAP);
                (bound, Some((variable.clone(), items)))
            }
            LoopSpec::ElementCount { selector, max } => {
                let selector = ctx.scope.interpolate(selector);
                let count = match ctx.session.element_count(&selector).await {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(
                            selector = selector.as_str(),
                            error = %e,
                            "element count failed, looping zero times"
                        );
                        0
                    }
                };
                let bound = count
                    .min(max.unwrap_or(DEFAULT_LOOP_SAFETY_CAP))
                    .min(DEFAULT_LOOP_SAFETY_CAP);
                (bound, None)
            }
            LoopSpec::While { max_iterations, .. } => (
                max_iterations
                    .unwrap_or(DEFAULT_LOOP_SAFETY_CAP)
                    .min(DEFAULT_LOOP_SAFETY_CAP),
                None,
            ),
        };

        let mut iterations = 0u32;
        let mut completed = true;

        for index in 0..bound {
            // While loops re-check their guard before every iteration.
            if let LoopSpec::While { condition, .. } = spec {
                if !self.evaluate_condition(condition, ctx).await {
                    break;
                }
            }

            let mut overlay = HashMap::from([
                ("index".to_string(), json!(index)),
                ("count".to_string(), json!(bound)),
                ("first".to_string(), json!(index == 0)),
                ("last".to_string(), json!(index + 1 == bound)),
            ]);
            if let Some((variable, items)) = &named {
                overlay.insert(variable.clone(), items[index as usize].clone());
            }

            // Pop on every exit path so a failing body never leaks scope.
            ctx.scope.push_scope(overlay);
            let flow = self.execute_steps(body, ctx, None).await;
            ctx.scope.pop_scope();

            iterations += 1;
            match flow? {
                StepFlow::Completed | StepFlow::Continue => {}
                StepFlow::Break => {
                    completed = false;
                    break;
                }
                StepFlow::Stopped => {
                    ctx.push_result(StepResult::signal(
                        &step.id,
                        ControlFlow::LoopSummary {
                            iterations,
                            completed: false,
                        },
                    ));
                    return Ok(StepFlow::Stopped);
                }
            }
        }

        ctx.push_result(StepResult::signal(
            &step.id,
            ControlFlow::LoopSummary {
                iterations,
                completed,
            },
        ));
        Ok(StepFlow::Completed)
    }

    /// Resolve a for-each items value to a JSON array. Non-arrays loop
    /// zero times (logged, not an error).
    fn resolve_items(&self, items: &Value, scope: &VariableScope) -> Vec<Value> {
        let resolved = match items {
            Value::String(s) => {
                let interpolated = scope.interpolate_value(items);
                if interpolated.is_array() {
                    interpolated
                } else {
                    // Not a placeholder for an array; try it as an expression.
                    self.evaluator.evaluate_or_false(s, scope)
                }
            }
            other => scope.interpolate_value(other),
        };
        match resolved {
            Value::Array(items) => items,
            other => {
                tracing::warn!(resolved = %other, "for-each items did not resolve to an array");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Try/catch/finally
    // -----------------------------------------------------------------------

    async fn run_try_catch(
        &self,
        step: &Step,
        try_steps: &[Step],
        catch_steps: &[Step],
        finally_steps: &[Step],
        error_variable: Option<&str>,
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, ExecutorError> {
        // Errors inside `try` must be caught here, not propagated past the
        // block, so force continue_on_error off for its duration.
        let saved = ctx.continue_on_error;
        ctx.continue_on_error = false;
        let try_flow = self.execute_steps(try_steps, ctx, None).await;
        ctx.continue_on_error = saved;

        match try_flow {
            Ok(flow) => {
                let finally_flow = self.execute_steps(finally_steps, ctx, None).await?;
                ctx.push_result(StepResult::ok(&step.id, json!({ "caught": false })));
                if flow != StepFlow::Completed {
                    Ok(flow)
                } else {
                    Ok(finally_flow)
                }
            }
            Err(original) => {
                let message = original.to_string();
                tracing::debug!(
                    step_id = step.id.as_str(),
                    error = message.as_str(),
                    "try block caught error"
                );
                if let Some(name) = error_variable {
                    ctx.scope.set(
                        name,
                        json!({ "message": message, "stack": message }),
                    );
                }

                let catch_flow = self.execute_steps(catch_steps, ctx, None).await;
                // Finally always runs, even when catch itself failed.
                let finally_flow = self.execute_steps(finally_steps, ctx, None).await;

                let catch_flow = catch_flow?;
                let finally_flow = finally_flow?;

                if saved {
                    ctx.push_result(StepResult::ok(&step.id, json!({ "caught": true })));
                    if catch_flow != StepFlow::Completed {
                        Ok(catch_flow)
                    } else {
                        Ok(finally_flow)
                    }
                } else {
                    // The enclosing context does not tolerate errors: the
                    // original error re-raises after finally has run.
                    ctx.push_result(StepResult::failed(&step.id, &message));
                    Err(original)
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Nested workflows
    // -----------------------------------------------------------------------

    async fn run_call_workflow(
        &self,
        step: &Step,
        workflow_id: uuid::Uuid,
        wait: bool,
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, ExecutorError> {
        if ctx.depth + 1 > MAX_WORKFLOW_DEPTH {
            let error = ExecutorError::DepthExceeded {
                depth: ctx.depth + 1,
                max: MAX_WORKFLOW_DEPTH,
            }
            .to_string();
            ctx.push_result(StepResult::failed(&step.id, &error));
            return self.fail_or_continue(step, error, ctx);
        }

        let Some(target) = self.registry.get(&workflow_id).await? else {
            let error = ExecutorError::WorkflowNotFound(workflow_id).to_string();
            ctx.push_result(StepResult::failed(&step.id, &error));
            return self.fail_or_continue(step, error, ctx);
        };

        if wait {
            let mut sub_ctx = ExecutionContext {
                scope: VariableScope::new(target.variables.clone()),
                session: Arc::clone(&ctx.session),
                continue_on_error: true,
                depth: ctx.depth + 1,
                results: Vec::new(),
                // Breakpoints keep working inside awaited nested workflows.
                debug: ctx.debug.clone(),
            };
            let execution = self.execute(&target, &mut sub_ctx, None).await;
            let succeeded = execution.status != ExecutionStatus::Failed;
            let data = json!({
                "execution_id": execution.id,
                "workflow_id": workflow_id,
                "status": execution.status,
                "steps": execution.results.len(),
            });
            if succeeded {
                ctx.push_result(StepResult::ok(&step.id, data));
                Ok(StepFlow::Completed)
            } else {
                let error = execution
                    .error
                    .unwrap_or_else(|| "nested workflow failed".to_string());
                ctx.push_result(StepResult::failed(&step.id, &error));
                self.fail_or_continue(step, error, ctx)
            }
        } else {
            let executor = self.clone();
            let session = Arc::clone(&ctx.session);
            tokio::spawn(async move {
                let mut sub_ctx = ExecutionContext {
                    scope: VariableScope::new(target.variables.clone()),
                    session,
                    continue_on_error: true,
                    depth: 0,
                    results: Vec::new(),
                    debug: None,
                };
                let execution = executor.execute(&target, &mut sub_ctx, None).await;
                tracing::debug!(
                    workflow_id = %workflow_id,
                    status = ?execution.status,
                    "detached nested workflow finished"
                );
            });
            ctx.push_result(StepResult::ok(
                &step.id,
                json!({ "workflow_id": workflow_id, "detached": true }),
            ));
            Ok(StepFlow::Completed)
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison helpers
// ---------------------------------------------------------------------------

/// Lenient numeric view: JSON numbers, and strings that parse as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Compare two interpolated operands. Numbers compare numerically when both
/// sides are numeric; everything else compares as strings.
fn compare_values(left: &Value, operator: ComparisonOperator, right: &Value) -> bool {
    use ComparisonOperator::*;

    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return match operator {
            Eq => l == r,
            Ne => l != r,
            Lt => l < r,
            Gt => l > r,
            Le => l <= r,
            Ge => l >= r,
            Contains | StartsWith | EndsWith => {
                let (l, r) = (value_to_string(left), value_to_string(right));
                string_op(&l, operator, &r)
            }
        };
    }

    match operator {
        Eq => left == right,
        Ne => left != right,
        Contains if left.is_array() => left
            .as_array()
            .map(|items| items.contains(right))
            .unwrap_or(false),
        _ => {
            let (l, r) = (value_to_string(left), value_to_string(right));
            match operator {
                Lt => l < r,
                Gt => l > r,
                Le => l <= r,
                Ge => l >= r,
                _ => string_op(&l, operator, &r),
            }
        }
    }
}

fn string_op(left: &str, operator: ComparisonOperator, right: &str) -> bool {
    match operator {
        ComparisonOperator::Contains => left.contains(right),
        ComparisonOperator::StartsWith => left.starts_with(right),
        ComparisonOperator::EndsWith => left.ends_with(right),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::debug::DebugStatus;
    use crate::action::{ActionError, ActionFuture};
    use crate::repository::memory::InMemoryWorkflowRepository;
    use botfleet_types::workflow::ElementState;
    use serde_json::Map;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use uuid::Uuid;

    // -------------------------------------------------------------------
    // Stub session
    // -------------------------------------------------------------------

    /// Scripted action session: records calls, fails configured actions.
    struct StubSession {
        fail_actions: HashSet<String>,
        fail_message: String,
        url: String,
        element_counts: HashMap<String, u32>,
        calls: Mutex<Vec<String>>,
    }

    impl Default for StubSession {
        fn default() -> Self {
            Self {
                fail_actions: HashSet::new(),
                fail_message: "element not found".to_string(),
                url: "https://example.com/dashboard".to_string(),
                element_counts: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl StubSession {
        fn failing(actions: &[&str], message: &str) -> Self {
            Self {
                fail_actions: actions.iter().map(|s| s.to_string()).collect(),
                fail_message: message.to_string(),
                ..Self::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ActionSession for StubSession {
        fn execute<'a>(
            &'a self,
            action: &'a str,
            _scope: &'a mut VariableScope,
            config: &'a Map<String, Value>,
        ) -> ActionFuture<'a, Value> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(action.to_string());
                if self.fail_actions.contains(action) {
                    Err(ActionError::Failed(self.fail_message.clone()))
                } else {
                    Ok(json!({ "action": action, "config": config }))
                }
            })
        }

        fn has_action(&self, action: &str) -> bool {
            action != "unregistered"
        }

        fn current_url(&self) -> ActionFuture<'_, String> {
            Box::pin(async move { Ok(self.url.clone()) })
        }

        fn element_count<'a>(&'a self, selector: &'a str) -> ActionFuture<'a, u32> {
            Box::pin(async move { Ok(*self.element_counts.get(selector).unwrap_or(&0)) })
        }

        fn element_state<'a>(
            &'a self,
            selector: &'a str,
            state: ElementState,
        ) -> ActionFuture<'a, bool> {
            Box::pin(async move {
                let present = self.element_counts.get(selector).copied().unwrap_or(0) > 0;
                Ok(match state {
                    ElementState::Exists | ElementState::Visible | ElementState::Enabled => {
                        present
                    }
                    ElementState::Hidden | ElementState::Disabled => !present,
                })
            })
        }

        fn close(&self) -> ActionFuture<'_, ()> {
            Box::pin(async move { Ok(()) })
        }
    }

    // -------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------

    fn action_step(id: &str, action: &str) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            kind: StepKind::Action {
                action: action.to_string(),
                config: HashMap::new(),
            },
        }
    }

    fn workflow_with(steps: Vec<Step>) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: "test".to_string(),
            description: None,
            steps,
            variables: HashMap::new(),
        }
    }

    fn executor() -> StepExecutor<InMemoryWorkflowRepository> {
        StepExecutor::new(Arc::new(InMemoryWorkflowRepository::new()))
    }

    async fn run(
        workflow: &Workflow,
        session: Arc<StubSession>,
    ) -> (Execution, Arc<StubSession>) {
        let exec = executor();
        let mut ctx = ExecutionContext::new(workflow, session.clone());
        let execution = exec.execute(workflow, &mut ctx, None).await;
        (execution, session)
    }

    // -------------------------------------------------------------------
    // Sequential execution
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_n_successful_steps_yield_n_results() {
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "click"),
            action_step("c", "extract"),
        ]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results.len(), 3);
        assert!(execution.results.iter().all(|r| r.success));
        assert_eq!(session.call_count(), 3);
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failing_step_aborts_without_continue_on_error() {
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "broken"),
            action_step("c", "extract"),
        ]);
        let session = Arc::new(StubSession::failing(&["broken"], "element not found"));
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session.clone());
        ctx.continue_on_error = false;
        let execution = exec.execute(&workflow, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        // Step name and id both appear in the workflow-level error.
        let error = execution.error.unwrap();
        assert!(error.contains("b"));
        assert!(error.contains("element not found"));
        // Third step never ran.
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_step_recorded_with_continue_on_error() {
        let workflow = workflow_with(vec![
            action_step("a", "broken"),
            action_step("b", "extract"),
        ]);
        let session = Arc::new(StubSession::failing(&["broken"], "timeout"));
        let (execution, session) = run(&workflow, session).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results.len(), 2);
        assert!(!execution.results[0].success);
        assert!(execution.results[1].success);
        assert_eq!(session.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_action_is_runtime_failure() {
        let workflow = workflow_with(vec![action_step("a", "unregistered")]);
        let session = Arc::new(StubSession::default());
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session.clone());
        ctx.continue_on_error = false;
        let execution = exec.execute(&workflow, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().contains("unregistered"));
        // The session was never invoked for the unknown type.
        assert_eq!(session.call_count(), 0);
    }

    // -------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------

    fn condition_step(id: &str, spec: ConditionSpec, negate: bool) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            kind: StepKind::Condition {
                condition: spec,
                negate,
                then_steps: vec![action_step("then-a", "then_action")],
                else_steps: vec![action_step("else-a", "else_action")],
            },
        }
    }

    #[tokio::test]
    async fn test_true_condition_selects_then() {
        let workflow = workflow_with(vec![condition_step(
            "cond",
            ConditionSpec::Comparison {
                left: json!(2),
                operator: ComparisonOperator::Gt,
                right: json!(1),
            },
            false,
        )]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.results[0].flow,
            ControlFlow::ConditionBranch {
                condition_met: true
            }
        );
        assert_eq!(session.calls.lock().unwrap().as_slice(), ["then_action"]);
    }

    #[tokio::test]
    async fn test_negated_true_condition_selects_else() {
        let workflow = workflow_with(vec![condition_step(
            "cond",
            ConditionSpec::Comparison {
                left: json!("abc"),
                operator: ComparisonOperator::StartsWith,
                right: json!("ab"),
            },
            true,
        )]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(
            execution.results[0].flow,
            ControlFlow::ConditionBranch {
                condition_met: false
            }
        );
        assert_eq!(session.calls.lock().unwrap().as_slice(), ["else_action"]);
    }

    #[tokio::test]
    async fn test_url_contains_condition() {
        let workflow = workflow_with(vec![condition_step(
            "cond",
            ConditionSpec::UrlContains {
                fragment: "/dashboard".to_string(),
            },
            false,
        )]);
        let (_, session) = run(&workflow, Arc::new(StubSession::default())).await;
        assert_eq!(session.calls.lock().unwrap().as_slice(), ["then_action"]);
    }

    #[tokio::test]
    async fn test_comparison_with_interpolated_operands() {
        let mut workflow = workflow_with(vec![condition_step(
            "cond",
            ConditionSpec::Comparison {
                left: json!("{{ count }}"),
                operator: ComparisonOperator::Ge,
                right: json!(5),
            },
            false,
        )]);
        workflow.variables.insert("count".to_string(), json!(7));
        let (_, session) = run(&workflow, Arc::new(StubSession::default())).await;
        assert_eq!(session.calls.lock().unwrap().as_slice(), ["then_action"]);
    }

    #[tokio::test]
    async fn test_expression_condition_failure_is_false_not_error() {
        let workflow = workflow_with(vec![condition_step(
            "cond",
            ConditionSpec::Expression {
                expression: ")(*&^".to_string(),
            },
            false,
        )]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        // Condition steps never fail; a broken expression takes the else branch.
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(session.calls.lock().unwrap().as_slice(), ["else_action"]);
    }

    // -------------------------------------------------------------------
    // Loops
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_count_loop_runs_n_times() {
        let workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::Count { count: 5 },
                body: vec![action_step("body", "click")],
            },
        }]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(session.call_count(), 5);
        let summary = execution.results.last().unwrap();
        assert_eq!(
            summary.flow,
            ControlFlow::LoopSummary {
                iterations: 5,
                completed: true
            }
        );
    }

    #[tokio::test]
    async fn test_break_on_third_iteration_yields_three() {
        // break on index 2 -> iterations 0, 1, 2 ran = 3 total.
        let workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::Count { count: 5 },
                body: vec![
                    action_step("body", "click"),
                    Step {
                        id: "maybe-break".to_string(),
                        name: "maybe-break".to_string(),
                        kind: StepKind::Condition {
                            condition: ConditionSpec::Expression {
                                expression: "index == 2".to_string(),
                            },
                            negate: false,
                            then_steps: vec![Step {
                                id: "brk".to_string(),
                                name: "brk".to_string(),
                                kind: StepKind::Break,
                            }],
                            else_steps: vec![],
                        },
                    },
                ],
            },
        }]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(session.call_count(), 3);
        let summary = execution.results.last().unwrap();
        assert_eq!(
            summary.flow,
            ControlFlow::LoopSummary {
                iterations: 3,
                completed: false
            }
        );
    }

    #[tokio::test]
    async fn test_continue_skips_rest_of_body() {
        let workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::Count { count: 3 },
                body: vec![
                    Step {
                        id: "skip".to_string(),
                        name: "skip".to_string(),
                        kind: StepKind::Continue,
                    },
                    action_step("never", "click"),
                ],
            },
        }]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(session.call_count(), 0);
        let summary = execution.results.last().unwrap();
        assert_eq!(
            summary.flow,
            ControlFlow::LoopSummary {
                iterations: 3,
                completed: true
            }
        );
    }

    #[tokio::test]
    async fn test_loop_variable_scoping_restores_shadowed_value() {
        let mut workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::Count { count: 2 },
                body: vec![action_step("body", "click")],
            },
        }]);
        workflow.variables.insert("index".to_string(), json!("outer"));

        let session = Arc::new(StubSession::default());
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session);
        exec.execute(&workflow, &mut ctx, None).await;

        // The loop's `index` shadowed the outer value only inside the body.
        assert_eq!(ctx.scope.get("index"), Some(&json!("outer")));
        assert_eq!(ctx.scope.depth(), 0);
    }

    #[tokio::test]
    async fn test_for_each_binds_named_variable() {
        let mut workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::ForEach {
                    variable: "item".to_string(),
                    items: json!("{{ rows }}"),
                },
                body: vec![Step {
                    id: "log".to_string(),
                    name: "log".to_string(),
                    kind: StepKind::Log {
                        message: "got {{ item }}".to_string(),
                        level: LogLevel::Info,
                    },
                }],
            },
        }]);
        workflow
            .variables
            .insert("rows".to_string(), json!(["a", "b"]));
        let (execution, _) = run(&workflow, Arc::new(StubSession::default())).await;

        let messages: Vec<&str> = execution
            .results
            .iter()
            .filter_map(|r| r.data.get("message").and_then(Value::as_str))
            .collect();
        assert_eq!(messages, ["got a", "got b"]);
    }

    #[tokio::test]
    async fn test_element_count_loop_bounded_by_max() {
        let mut session = StubSession::default();
        session.element_counts.insert("li.row".to_string(), 10);
        let workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::ElementCount {
                    selector: "li.row".to_string(),
                    max: Some(4),
                },
                body: vec![action_step("body", "click")],
            },
        }]);
        let (_, session) = run(&workflow, Arc::new(session)).await;
        assert_eq!(session.call_count(), 4);
    }

    #[tokio::test]
    async fn test_while_loop_safety_cap() {
        // Condition is always true: the safety cap must stop the loop.
        let workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::While {
                    condition: ConditionSpec::Expression {
                        expression: "1 == 1".to_string(),
                    },
                    max_iterations: None,
                },
                body: vec![action_step("body", "click")],
            },
        }]);
        let (_, session) = run(&workflow, Arc::new(StubSession::default())).await;
        assert_eq!(session.call_count(), DEFAULT_LOOP_SAFETY_CAP as usize);
    }

    #[tokio::test]
    async fn test_while_loop_false_guard_runs_zero_times() {
        let mut workflow = workflow_with(vec![Step {
            id: "loop".to_string(),
            name: "loop".to_string(),
            kind: StepKind::Loop {
                loop_spec: LoopSpec::While {
                    condition: ConditionSpec::Expression {
                        expression: "remaining > 0".to_string(),
                    },
                    max_iterations: Some(50),
                },
                body: vec![action_step("body", "click")],
            },
        }]);
        workflow.variables.insert("remaining".to_string(), json!(0));
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(session.call_count(), 0);
        let summary = execution.results.last().unwrap();
        assert_eq!(
            summary.flow,
            ControlFlow::LoopSummary {
                iterations: 0,
                completed: true
            }
        );
    }

    // -------------------------------------------------------------------
    // Try/catch/finally
    // -------------------------------------------------------------------

    fn try_catch_workflow() -> Workflow {
        workflow_with(vec![Step {
            id: "guarded".to_string(),
            name: "guarded".to_string(),
            kind: StepKind::TryCatch {
                try_steps: vec![action_step("risky", "broken")],
                catch_steps: vec![action_step("recover", "recover_action")],
                finally_steps: vec![action_step("cleanup", "cleanup_action")],
                error_variable: Some("err".to_string()),
            },
        }])
    }

    #[tokio::test]
    async fn test_try_catch_finally_with_continue_on_error() {
        let workflow = try_catch_workflow();
        let session = Arc::new(StubSession::failing(&["broken"], "element not found"));
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session.clone());
        let execution = exec.execute(&workflow, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        // Catch and finally both ran.
        let calls = session.calls.lock().unwrap().clone();
        assert_eq!(calls, ["broken", "recover_action", "cleanup_action"]);
        // Error variable was populated for the catch steps.
        let err = ctx.scope.get("err").unwrap();
        assert!(err["message"].as_str().unwrap().contains("element not found"));
        // The block reports caught: true.
        let block = execution.results.last().unwrap();
        assert!(block.success);
        assert_eq!(block.data["caught"], json!(true));
    }

    #[tokio::test]
    async fn test_try_catch_reraises_when_continue_on_error_false() {
        let workflow = try_catch_workflow();
        let session = Arc::new(StubSession::failing(&["broken"], "element not found"));
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session.clone());
        ctx.continue_on_error = false;
        let execution = exec.execute(&workflow, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        // Finally still ran before the original error re-raised.
        let calls = session.calls.lock().unwrap().clone();
        assert_eq!(calls, ["broken", "recover_action", "cleanup_action"]);
        assert!(execution.error.unwrap().contains("risky"));
    }

    #[tokio::test]
    async fn test_finally_runs_when_catch_fails() {
        let workflow = workflow_with(vec![Step {
            id: "guarded".to_string(),
            name: "guarded".to_string(),
            kind: StepKind::TryCatch {
                try_steps: vec![action_step("risky", "broken")],
                catch_steps: vec![action_step("recover", "also_broken")],
                finally_steps: vec![action_step("cleanup", "cleanup_action")],
                error_variable: None,
            },
        }]);
        let session = Arc::new(StubSession::failing(
            &["broken", "also_broken"],
            "element not found",
        ));
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session.clone());
        ctx.continue_on_error = false;
        exec.execute(&workflow, &mut ctx, None).await;

        let calls = session.calls.lock().unwrap().clone();
        assert!(calls.contains(&"cleanup_action".to_string()));
    }

    // -------------------------------------------------------------------
    // Stop
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_graceful_stop_terminates_early() {
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            Step {
                id: "halt".to_string(),
                name: "halt".to_string(),
                kind: StepKind::Stop {
                    fail: false,
                    message: Some("done early".to_string()),
                },
            },
            action_step("never", "click"),
        ]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!(session.call_count(), 1);
        assert!(execution.error.is_none());
    }

    #[tokio::test]
    async fn test_failing_stop_raises_workflow_error() {
        let workflow = workflow_with(vec![Step {
            id: "halt".to_string(),
            name: "halt".to_string(),
            kind: StepKind::Stop {
                fail: true,
                message: Some("bad state".to_string()),
            },
        }]);
        let (execution, _) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().contains("bad state"));
    }

    #[tokio::test]
    async fn test_stop_inside_loop_propagates() {
        let workflow = workflow_with(vec![
            Step {
                id: "loop".to_string(),
                name: "loop".to_string(),
                kind: StepKind::Loop {
                    loop_spec: LoopSpec::Count { count: 10 },
                    body: vec![Step {
                        id: "halt".to_string(),
                        name: "halt".to_string(),
                        kind: StepKind::Stop {
                            fail: false,
                            message: None,
                        },
                    }],
                },
            },
            action_step("never", "click"),
        ]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!(session.call_count(), 0);
    }

    // -------------------------------------------------------------------
    // Break/continue outside a loop
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_bare_break_is_early_return_not_error() {
        let workflow = workflow_with(vec![
            Step {
                id: "brk".to_string(),
                name: "brk".to_string(),
                kind: StepKind::Break,
            },
            action_step("never", "click"),
        ]);
        let (execution, session) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(session.call_count(), 0);
    }

    // -------------------------------------------------------------------
    // Call-workflow
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_call_workflow_waits_for_nested_execution() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let nested = workflow_with(vec![action_step("inner", "click")]);
        repo.save(&nested).await.unwrap();

        let outer = workflow_with(vec![Step {
            id: "call".to_string(),
            name: "call".to_string(),
            kind: StepKind::CallWorkflow {
                workflow_id: nested.id,
                wait: true,
            },
        }]);

        let session = Arc::new(StubSession::default());
        let exec = StepExecutor::new(repo);
        let mut ctx = ExecutionContext::new(&outer, session.clone());
        let execution = exec.execute(&outer, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(session.call_count(), 1);
        assert_eq!(execution.results[0].data["status"], json!("completed"));
    }

    #[tokio::test]
    async fn test_call_workflow_missing_target_fails() {
        let outer = workflow_with(vec![Step {
            id: "call".to_string(),
            name: "call".to_string(),
            kind: StepKind::CallWorkflow {
                workflow_id: Uuid::now_v7(),
                wait: true,
            },
        }]);
        let session = Arc::new(StubSession::default());
        let exec = executor();
        let mut ctx = ExecutionContext::new(&outer, session);
        ctx.continue_on_error = false;
        let execution = exec.execute(&outer, &mut ctx, None).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.unwrap().contains("not found"));
    }

    // -------------------------------------------------------------------
    // Config interpolation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_action_config_interpolated_before_dispatch() {
        let mut workflow = workflow_with(vec![Step {
            id: "nav".to_string(),
            name: "nav".to_string(),
            kind: StepKind::Action {
                action: "navigate".to_string(),
                config: HashMap::from([("url".to_string(), json!("{{ base }}/login"))]),
            },
        }]);
        workflow
            .variables
            .insert("base".to_string(), json!("https://example.com"));
        let (execution, _) = run(&workflow, Arc::new(StubSession::default())).await;

        assert_eq!(
            execution.results[0].data["config"]["url"],
            json!("https://example.com/login")
        );
    }

    // -------------------------------------------------------------------
    // Progress notifications
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_progress_invoked_per_top_level_step() {
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "click"),
        ]);
        let session = Arc::new(StubSession::default());
        let exec = executor();
        let mut ctx = ExecutionContext::new(&workflow, session);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = Arc::clone(&seen);
        let notify = move |done: usize, total: usize| {
            seen_ref.lock().unwrap().push((done, total));
        };
        exec.execute(&workflow, &mut ctx, Some(&notify)).await;

        assert_eq!(seen.lock().unwrap().as_slice(), [(1, 2), (2, 2)]);
    }

    // -------------------------------------------------------------------
    // Debug sessions
    // -------------------------------------------------------------------

    /// Run a workflow on a spawned task with a debug session attached.
    fn run_debugged(
        workflow: Workflow,
        session: Arc<DebugSession>,
        stub: Arc<StubSession>,
    ) -> tokio::task::JoinHandle<Execution> {
        tokio::spawn(async move {
            let exec = executor();
            let mut ctx = ExecutionContext::new(&workflow, stub);
            ctx.debug = Some(session);
            exec.execute(&workflow, &mut ctx, None).await
        })
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_debug_step_advances_exactly_one_step() {
        let session = Arc::new(DebugSession::paused());
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "click"),
            action_step("c", "extract"),
        ]);
        let stub = Arc::new(StubSession::default());
        let handle = run_debugged(workflow, Arc::clone(&session), Arc::clone(&stub));

        // Held at the first step; nothing ran yet.
        wait_for(|| session.is_paused()).await;
        assert_eq!(session.current_step_index(), 0);
        assert!(session.results().is_empty());

        for expected in 1..=3usize {
            session.step();
            wait_for(|| session.current_step_index() == expected).await;
            assert_eq!(session.results().len(), expected);
            assert_eq!(stub.call_count(), expected);
            if expected < 3 {
                wait_for(|| session.is_paused()).await;
                assert_eq!(session.status(), DebugStatus::Paused);
            }
        }

        let execution = handle.await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(session.status(), DebugStatus::Completed);
        assert_eq!(session.current_step_index(), 3);
    }

    #[tokio::test]
    async fn test_debug_stop_aborts_remaining_steps() {
        let session = Arc::new(DebugSession::paused());
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "click"),
            action_step("c", "extract"),
        ]);
        let stub = Arc::new(StubSession::default());
        let handle = run_debugged(workflow, Arc::clone(&session), Arc::clone(&stub));

        wait_for(|| session.is_paused()).await;
        session.step();
        wait_for(|| session.current_step_index() == 1).await;
        wait_for(|| session.is_paused()).await;

        session.stop();
        let execution = handle.await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!(session.status(), DebugStatus::Stopped);
        // Only the stepped-over action ran; the index stays where it was.
        assert_eq!(stub.call_count(), 1);
        assert_eq!(session.current_step_index(), 1);
    }

    #[tokio::test]
    async fn test_debug_failure_freezes_index() {
        let session = Arc::new(DebugSession::new());
        let workflow = workflow_with(vec![
            action_step("a", "navigate"),
            action_step("b", "click"),
            action_step("c", "extract"),
        ]);
        let stub = Arc::new(StubSession::failing(&["click"], "element not found"));
        let handle = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let exec = executor();
                let mut ctx = ExecutionContext::new(&workflow, stub);
                ctx.continue_on_error = false;
                ctx.debug = Some(session);
                exec.execute(&workflow, &mut ctx, None).await
            })
        };

        let execution = handle.await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(session.status(), DebugStatus::Failed);
        // The failing step never completed, so the index stops after "a".
        assert_eq!(session.current_step_index(), 1);
    }

    // -------------------------------------------------------------------
    // compare_values
    // -------------------------------------------------------------------

    #[test]
    fn test_compare_numeric_coercion() {
        assert!(compare_values(&json!("5"), ComparisonOperator::Eq, &json!(5)));
        assert!(compare_values(&json!(3), ComparisonOperator::Lt, &json!("10")));
        assert!(!compare_values(&json!("abc"), ComparisonOperator::Eq, &json!(5)));
    }

    #[test]
    fn test_compare_string_operators() {
        assert!(compare_values(
            &json!("hello world"),
            ComparisonOperator::Contains,
            &json!("world")
        ));
        assert!(compare_values(
            &json!("hello"),
            ComparisonOperator::StartsWith,
            &json!("he")
        ));
        assert!(compare_values(
            &json!("hello"),
            ComparisonOperator::EndsWith,
            &json!("lo")
        ));
    }

    #[test]
    fn test_compare_array_contains() {
        assert!(compare_values(
            &json!(["a", "b"]),
            ComparisonOperator::Contains,
            &json!("b")
        ));
        assert!(!compare_values(
            &json!(["a", "b"]),
            ComparisonOperator::Contains,
            &json!("c")
        ));
    }
}
