//! Workflow interpretation: variable scopes, expressions, the step-tree
//! executor, and the debug controller.

pub mod debug;
pub mod executor;
pub mod expression;
pub mod scope;

pub use executor::{ExecutionContext, StepExecutor, StepFlow};
pub use scope::VariableScope;
