//! JEXL expression evaluator for condition steps and while-loop guards.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//! Evaluation failures never crash the caller: conditions fall back to
//! `false` and the failure is logged, matching the rest of the control-flow
//! design where bad input degrades rather than aborts a run.

use serde_json::{json, Value};

use super::scope::VariableScope;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),
}

// ---------------------------------------------------------------------------
// ScopeEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for:
/// - `Expression` condition specs (e.g. `attempts < 3`)
/// - `While` loop guards
/// - `ForEach` item expressions
pub struct ScopeEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ScopeEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!is_truthy(&val)))
            });

        Self { evaluator }
    }

    /// Evaluate an expression against all variables visible in the scope.
    ///
    /// Placeholders are interpolated textually first, then the result is
    /// evaluated with the flattened scope as context.
    /// Returns `Err` only for reporting; most callers want
    /// [`evaluate_or_false`](Self::evaluate_or_false).
    pub fn evaluate(
        &self,
        expression: &str,
        scope: &VariableScope,
    ) -> Result<Value, ExpressionError> {
        let resolved = scope.interpolate(expression);
        let context = Value::Object(scope.snapshot().into_iter().collect());
        self.evaluator
            .eval_in_context(&resolved, &context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate an expression, falling back to `false` on any failure.
    pub fn evaluate_or_false(&self, expression: &str, scope: &VariableScope) -> Value {
        match self.evaluate(expression, scope) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    expression,
                    error = %e,
                    "expression evaluation failed, falling back to false"
                );
                Value::Bool(false)
            }
        }
    }

    /// Evaluate an expression to a boolean with JS-like truthiness coercion,
    /// falling back to `false` on failure.
    pub fn evaluate_bool(&self, expression: &str, scope: &VariableScope) -> bool {
        is_truthy(&self.evaluate_or_false(expression, scope))
    }
}

impl Default for ScopeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JS-like truthiness for JSON values.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn scope_with(vars: &[(&str, Value)]) -> VariableScope {
        VariableScope::new(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let scope = scope_with(&[("count", json!(4))]);
        let eval = ScopeEvaluator::new();
        assert_eq!(eval.evaluate("count + 1", &scope).unwrap(), json!(5.0));
    }

    #[test]
    fn test_evaluate_comparison() {
        let scope = scope_with(&[("attempts", json!(2))]);
        let eval = ScopeEvaluator::new();
        assert!(eval.evaluate_bool("attempts < 3", &scope));
        assert!(!eval.evaluate_bool("attempts >= 3", &scope));
    }

    #[test]
    fn test_evaluate_placeholder_interpolation() {
        let scope = scope_with(&[("count", json!(10))]);
        let eval = ScopeEvaluator::new();
        assert!(eval.evaluate_bool("{{ count }} > 5", &scope));
    }

    #[test]
    fn test_evaluate_string_transform() {
        let scope = scope_with(&[("status", json!("OK"))]);
        let eval = ScopeEvaluator::new();
        assert!(eval.evaluate_bool("status|lower == 'ok'", &scope));
    }

    #[test]
    fn test_evaluate_length_transform() {
        let scope = scope_with(&[("rows", json!([1, 2, 3]))]);
        let eval = ScopeEvaluator::new();
        assert!(eval.evaluate_bool("rows|length == 3", &scope));
    }

    #[test]
    fn test_evaluate_failure_falls_back_to_false() {
        let scope = scope_with(&[]);
        let eval = ScopeEvaluator::new();
        // Garbage expression must not panic or propagate.
        assert!(!eval.evaluate_bool(")(*&^%", &scope));
        assert_eq!(eval.evaluate_or_false(")(*&^%", &scope), json!(false));
    }

    #[test]
    fn test_loop_scope_variables_visible() {
        let mut scope = scope_with(&[("limit", json!(5))]);
        scope.push_scope(HashMap::from([("index".to_string(), json!(4))]));
        let eval = ScopeEvaluator::new();
        assert!(eval.evaluate_bool("index + 1 >= limit", &scope));
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([])));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
    }
}
