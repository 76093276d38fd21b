// Optimizer Trace
//
// This module records the decisions taken during subquery optimization as
// JSON events.

use serde_json::{json, Value};

/// Collected trace events. A disabled trace records nothing.
#[derive(Debug, Clone, Default)]
pub struct OptimizerTrace {
    enabled: bool,
    steps: Vec<Value>,
}

impl OptimizerTrace {
    pub fn new(enabled: bool) -> Self {
        OptimizerTrace { enabled, steps: Vec::new() }
    }

    pub fn disabled() -> Self {
        OptimizerTrace::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one event
    pub fn add(&mut self, step: &str, details: Value) {
        if self.enabled {
            self.steps.push(json!({ "step": step, "details": details }));
        }
    }

    pub fn steps(&self) -> &[Value] {
        &self.steps
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.steps.clone())
    }
}
