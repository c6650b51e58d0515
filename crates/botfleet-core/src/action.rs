//! The action capability seam.
//!
//! [`ActionSession`] is the opaque handle to one isolated browser session.
//! The step executor dispatches every non-control-flow step through it and
//! asks it page questions (URL, element state) when evaluating conditions
//! and element-count loops. The concrete driver lives outside this crate;
//! implementations register whatever action vocabulary they support and
//! report unknown types as a runtime failure, never a load-time one.

use std::future::Future;
use std::pin::Pin;

use botfleet_types::workflow::ElementState;
use serde_json::{Map, Value};

use crate::workflow::scope::VariableScope;

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// Errors surfaced by the action capability.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The step's action type has no registered implementation.
    #[error("unknown action type '{0}'")]
    UnknownAction(String),

    /// The action ran and failed.
    #[error("action failed: {0}")]
    Failed(String),

    /// The session is gone (closed browser, dead profile).
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Provisioning an isolated session for a profile failed.
    #[error("session provisioning failed: {0}")]
    ProvisioningFailed(String),
}

// ---------------------------------------------------------------------------
// ActionSession
// ---------------------------------------------------------------------------

/// Boxed future alias for the object-safe async methods below.
pub type ActionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ActionError>> + Send + 'a>>;

/// One isolated browser session bound to a profile.
///
/// Object-safe: async methods return pinned boxed futures so the executor
/// can hold `Arc<dyn ActionSession>`. The `scope` argument gives actions
/// the same variable facade the executor uses (get/set/interpolate), so an
/// extract action can store results for later steps.
pub trait ActionSession: Send + Sync {
    /// Execute one action step. `config` has already been interpolated
    /// against the variable scope.
    fn execute<'a>(
        &'a self,
        action: &'a str,
        scope: &'a mut VariableScope,
        config: &'a Map<String, Value>,
    ) -> ActionFuture<'a, Value>;

    /// Whether an action type is registered on this session.
    fn has_action(&self, action: &str) -> bool;

    /// The page's current URL, for `url_contains` conditions.
    fn current_url(&self) -> ActionFuture<'_, String>;

    /// Number of elements matching a selector, for element-count loops.
    fn element_count<'a>(&'a self, selector: &'a str) -> ActionFuture<'a, u32>;

    /// Whether an element is in the given state, for element conditions.
    fn element_state<'a>(
        &'a self,
        selector: &'a str,
        state: ElementState,
    ) -> ActionFuture<'a, bool>;

    /// Tear the session down, releasing the underlying browser resources.
    /// Must be safe to call more than once.
    fn close(&self) -> ActionFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
