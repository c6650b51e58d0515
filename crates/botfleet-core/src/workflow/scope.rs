//! Variable scope store with loop-local overlays and template interpolation.
//!
//! `VariableScope` is the mutable named-value state for one workflow run: a
//! base map plus a stack of loop-local overlay maps. Lookups search
//! innermost-first; writes land in the innermost overlay when one exists.
//! Template interpolation replaces `{{ name }}` placeholders with
//! stringified lookups and leaves unresolved placeholders as literal text.

use std::collections::HashMap;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// VariableScope
// ---------------------------------------------------------------------------

/// Named values for one workflow run, with a push/pop stack of loop scopes.
#[derive(Debug, Default)]
pub struct VariableScope {
    /// Run-level variables.
    base: HashMap<String, Value>,
    /// Loop-local overlays, innermost last.
    overlays: Vec<HashMap<String, Value>>,
}

impl VariableScope {
    /// Create a scope seeded with a workflow's initial declarations.
    pub fn new(initial: HashMap<String, Value>) -> Self {
        Self {
            base: initial,
            overlays: Vec::new(),
        }
    }

    /// Look a name up, innermost overlay first, then the base map.
    pub fn get(&self, name: &str) -> Option<&Value> {
        for overlay in self.overlays.iter().rev() {
            if let Some(value) = overlay.get(name) {
                return Some(value);
            }
        }
        self.base.get(name)
    }

    /// Write a value into the innermost overlay if one exists, else the base.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        match self.overlays.last_mut() {
            Some(overlay) => {
                overlay.insert(name.into(), value);
            }
            None => {
                self.base.insert(name.into(), value);
            }
        }
    }

    /// Write a value directly into the base map, bypassing overlays.
    ///
    /// Used by debug sessions so a mutation outlives the current loop.
    pub fn set_base(&mut self, name: impl Into<String>, value: Value) {
        self.base.insert(name.into(), value);
    }

    /// Push a loop-local overlay. Must be paired with [`pop_scope`];
    /// the executor pops on every exit path so a failing body cannot
    /// leak a scope.
    ///
    /// [`pop_scope`]: VariableScope::pop_scope
    pub fn push_scope(&mut self, overlay: HashMap<String, Value>) {
        self.overlays.push(overlay);
    }

    /// Pop the innermost loop overlay. Popping with no overlay is a no-op.
    pub fn pop_scope(&mut self) {
        self.overlays.pop();
    }

    /// Current overlay depth.
    pub fn depth(&self) -> usize {
        self.overlays.len()
    }

    /// Flatten all visible variables into one map, innermost winning.
    ///
    /// Used for expression contexts and debug snapshots.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut flat = self.base.clone();
        for overlay in &self.overlays {
            for (name, value) in overlay {
                flat.insert(name.clone(), value.clone());
            }
        }
        flat
    }

    // -----------------------------------------------------------------------
    // Interpolation
    // -----------------------------------------------------------------------

    /// Replace `{{ name }}` placeholders with stringified lookups.
    ///
    /// Whitespace inside the braces is tolerated. Unresolved placeholders
    /// are left as literal text -- not an error.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let name = after[..end].trim();
                    match self.get(name) {
                        Some(value) => out.push_str(&value_to_string(value)),
                        None => {
                            // Leave the placeholder literal.
                            out.push_str(&rest[start..start + 2 + end + 2]);
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    // Unterminated marker; emit the tail verbatim.
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Interpolate every string inside a JSON value, recursively.
    ///
    /// A string that is exactly one placeholder resolves to the variable's
    /// JSON value (preserving arrays/numbers); mixed strings interpolate
    /// textually.
    pub fn interpolate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if let Some(inner) = trimmed
                    .strip_prefix("{{")
                    .and_then(|rest| rest.strip_suffix("}}"))
                {
                    if let Some(resolved) = self.get(inner.trim()) {
                        return resolved.clone();
                    }
                }
                Value::String(self.interpolate(s))
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.interpolate_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Interpolate a step's config map before action dispatch.
    pub fn interpolate_config(&self, config: &HashMap<String, Value>) -> Map<String, Value> {
        config
            .iter()
            .map(|(k, v)| (k.clone(), self.interpolate_value(v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a JSON value to a display string for template interpolation.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects/arrays interpolate as compact JSON.
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
