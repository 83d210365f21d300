use super::runner::StepStatus;
use crate::shared::ids::StepId;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a run and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// Mutable state of one run: interpolation variables, current step, clock and abort flag.
#[derive(Debug)]
pub struct ExecutionContext {
    variables: Map<String, Value>,
    current_step: Option<StepId>,
    started_at: Instant,
    abort: AbortHandle,
}

impl ExecutionContext {
    pub fn new(params: Map<String, Value>, abort: AbortHandle) -> Self {
        let mut variables = params;
        variables.insert("steps".to_string(), Value::Object(Map::new()));
        Self {
            variables,
            current_step: None,
            started_at: Instant::now(),
            abort,
        }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn set_variable(&mut self, key: &str, value: Value) {
        self.variables.insert(key.to_string(), value);
    }

    pub fn remove_variable(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    /// Exposes a finished step as `steps.<id>.status` and `steps.<id>.output`.
    pub fn record_step(&mut self, step_id: &str, status: StepStatus, output: &Value) {
        let entry = serde_json::json!({
            "status": status.as_str(),
            "output": output,
        });
        match self.variables.get_mut("steps") {
            Some(Value::Object(steps)) => {
                steps.insert(step_id.to_string(), entry);
            }
            _ => {
                let mut steps = Map::new();
                steps.insert(step_id.to_string(), entry);
                self.variables
                    .insert("steps".to_string(), Value::Object(steps));
            }
        }
    }

    pub fn current_step(&self) -> Option<&StepId> {
        self.current_step.as_ref()
    }

    pub fn set_current_step(&mut self, step: Option<StepId>) {
        self.current_step = step;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}
