use super::actions::{AgentRef, StepActions};
use super::context::{AbortHandle, ExecutionContext};
use super::error::{ErrorCode, RunError, StepError};
use super::events::RunEvent;
use super::retry::retry_delay;
use crate::shared::duration::parse_time_field;
use crate::shared::logging::{append_log_event, LogLevel};
use crate::template::Interpolator;
use crate::verification::{verify_and_signal, VerificationConfig};
use crate::workflow::{
    LoopCount, RetrySpec, StepAction, SystemDirective, WaitDuration, WorkflowDefinition,
    WorkflowStep, MAX_LOOP_COUNT,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PAUSE_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Idle, RunState::Aborted)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::Failed)
                | (RunState::Running, RunState::Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub key: String,
    pub status: StepStatus,
    pub output: Value,
    pub error: Option<String>,
    pub attempts: u32,
    pub retries: u32,
    pub iteration: Option<u64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub code: ErrorCode,
    pub message: String,
    pub step_id: Option<String>,
}

impl RunFailure {
    fn from_error(err: &RunError) -> Self {
        let step_id = match err {
            RunError::StepFailed { step_id, .. } => Some(step_id.to_string()),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            step_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub workflow_id: String,
    pub state: RunState,
    pub results: BTreeMap<String, StepResult>,
    pub failure: Option<RunFailure>,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
}

impl RunOutcome {
    pub fn result(&self, key: &str) -> Option<&StepResult> {
        self.results.get(key)
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub default_step_timeout: Duration,
    pub default_run_timeout: Duration,
    pub verification: VerificationConfig,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(60),
            default_run_timeout: Duration::from_secs(30 * 60),
            verification: VerificationConfig::default(),
        }
    }
}

/// Executes one validated workflow definition against an agent.
pub struct WorkflowRunner {
    definition: Arc<WorkflowDefinition>,
    actions: Arc<dyn StepActions>,
    interpolator: Interpolator,
    options: RunnerOptions,
    events: Option<Sender<RunEvent>>,
    log_path: Option<PathBuf>,
}

impl WorkflowRunner {
    pub fn new(definition: Arc<WorkflowDefinition>, actions: Arc<dyn StepActions>) -> Self {
        Self {
            definition,
            actions,
            interpolator: Interpolator::new(),
            options: RunnerOptions::default(),
            events: None,
            log_path: None,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_interpolator(mut self, interpolator: Interpolator) -> Self {
        self.interpolator = interpolator;
        self
    }

    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn log(&self, level: LogLevel, event: &str, message: &str, fields: Map<String, Value>) {
        if let Some(path) = &self.log_path {
            append_log_event(path, level, event, message, fields);
        }
    }

    /// Runs the workflow to a terminal state. Never panics on step failures; the outcome
    /// carries the final state, per-step results and the failure, if any.
    pub fn run(&self, agent: &AgentRef, params: Map<String, Value>, abort: &AbortHandle) -> RunOutcome {
        let run_timeout = self
            .definition
            .timeout
            .unwrap_or(self.options.default_run_timeout);
        let mut ctx = ExecutionContext::new(params, abort.clone());
        ctx.set_variable(
            "agent",
            serde_json::json!({"id": agent.agent_id.as_str(), "serial": agent.serial}),
        );
        ctx.set_variable(
            "workflow",
            serde_json::json!({
                "id": self.definition.id.as_str(),
                "version": self.definition.version,
            }),
        );

        let mut run = Run {
            runner: self,
            agent,
            ctx,
            results: BTreeMap::new(),
            warnings: Vec::new(),
            deadline: Instant::now() + run_timeout,
            run_timeout,
            state: RunState::Idle,
        };
        run.transition(RunState::Running);
        self.emit(RunEvent::Start {
            workflow_id: self.definition.id.to_string(),
            version: self.definition.version,
            agent_id: agent.agent_id.to_string(),
            top_level_steps: self.definition.steps.len(),
        });

        let steps = &self.definition.steps;
        let (state, failure) = match run.execute_steps(steps, None) {
            Ok(()) => (RunState::Completed, None),
            Err(err @ RunError::Aborted) => (RunState::Aborted, Some(RunFailure::from_error(&err))),
            Err(err) => {
                run.run_error_handlers(&err);
                (RunState::Failed, Some(RunFailure::from_error(&err)))
            }
        };
        run.transition(state);

        let elapsed_ms = run.ctx.elapsed().as_millis() as u64;
        if state == RunState::Aborted {
            self.emit(RunEvent::Abort {
                step_id: run.ctx.current_step().map(ToString::to_string),
                elapsed_ms,
            });
        } else {
            self.emit(RunEvent::Complete {
                state,
                elapsed_ms,
                error: failure.as_ref().map(|f| f.message.clone()),
            });
        }
        for warning in &run.warnings {
            self.log(
                LogLevel::Warn,
                "run.interpolation.warning",
                warning,
                crate::log_fields! { "workflow_id" => self.definition.id.as_str() },
            );
        }
        self.log(
            if state == RunState::Completed {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            "run.finished",
            &format!("workflow run {state}"),
            crate::log_fields! {
                "workflow_id" => self.definition.id.as_str(),
                "agent_id" => agent.agent_id.as_str(),
                "elapsed_ms" => elapsed_ms,
                "error_code" => failure.as_ref().map(|f| f.code.as_str()),
            },
        );

        RunOutcome {
            workflow_id: self.definition.id.to_string(),
            state,
            results: run.results,
            failure,
            elapsed_ms,
            warnings: run.warnings,
        }
    }
}

struct IterationScope {
    prefix: String,
    index: u64,
}

enum Attempt {
    Failed(StepError),
    Fatal(RunError),
}

impl From<StepError> for Attempt {
    fn from(err: StepError) -> Self {
        Attempt::Failed(err)
    }
}

impl From<crate::template::TemplateError> for Attempt {
    fn from(err: crate::template::TemplateError) -> Self {
        Attempt::Failed(StepError::Template(err))
    }
}

/// A failure escaping a branch or loop body counts as a failed attempt of the enclosing step.
fn nested_failure(err: RunError) -> Attempt {
    match err {
        RunError::StepFailed { step_id, error } => Attempt::Failed(StepError::Nested {
            step_id: step_id.to_string(),
            code: error.code(),
            reason: error.to_string(),
        }),
        other => Attempt::Fatal(other),
    }
}

struct Run<'r> {
    runner: &'r WorkflowRunner,
    agent: &'r AgentRef,
    ctx: ExecutionContext,
    results: BTreeMap<String, StepResult>,
    warnings: Vec<String>,
    deadline: Instant,
    run_timeout: Duration,
    state: RunState,
}

impl Run<'_> {
    fn transition(&mut self, next: RunState) {
        if !self.state.can_transition_to(next) {
            self.runner.log(
                LogLevel::Error,
                "run.transition.invalid",
                &format!("run state transition {} -> {next} is invalid", self.state),
                Map::new(),
            );
        }
        self.state = next;
    }

    fn run_timeout_error(&self) -> RunError {
        RunError::RunTimeout {
            timeout_ms: self.run_timeout.as_millis() as u64,
        }
    }

    /// Abort and deadline check performed between steps and iterations.
    fn checkpoint(&self) -> Result<(), RunError> {
        if self.ctx.is_aborted() {
            return Err(RunError::Aborted);
        }
        if Instant::now() >= self.deadline {
            return Err(self.run_timeout_error());
        }
        Ok(())
    }

    /// Sleeps for `total` without blocking past an abort or the run deadline.
    fn pause(&self, total: Duration) -> Result<(), RunError> {
        let until = Instant::now() + total;
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let slice = (until - now)
                .min(self.deadline.saturating_duration_since(now))
                .min(PAUSE_SLICE);
            thread::sleep(slice);
        }
    }

    fn render(&mut self, template: &str) -> Result<String, Attempt> {
        Ok(self.runner.interpolator.interpolate_with_warnings(
            template,
            self.ctx.variables(),
            &mut self.warnings,
        )?)
    }

    fn render_value(&mut self, value: &Value) -> Result<Value, Attempt> {
        Ok(self.runner.interpolator.interpolate_value_with_warnings(
            value,
            self.ctx.variables(),
            &mut self.warnings,
        )?)
    }

    fn record(&mut self, result: StepResult) {
        self.results.insert(result.key.clone(), result);
    }

    fn execute_steps(
        &mut self,
        steps: &[WorkflowStep],
        scope: Option<&IterationScope>,
    ) -> Result<(), RunError> {
        for step in steps {
            self.checkpoint()?;
            let key = match scope {
                Some(scope) => format!("{}.{}", scope.prefix, step.id),
                None => step.id.to_string(),
            };

            if let Some(missing) = self.unmet_dependency(step, scope) {
                let reason = format!("dependency `{missing}` did not succeed");
                self.record(StepResult {
                    step_id: step.id.to_string(),
                    key: key.clone(),
                    status: StepStatus::Skipped,
                    output: Value::Null,
                    error: Some(reason),
                    attempts: 0,
                    retries: 0,
                    iteration: scope.map(|s| s.index),
                    elapsed_ms: 0,
                });
                self.ctx
                    .record_step(step.id.as_str(), StepStatus::Skipped, &Value::Null);
                self.runner.emit(RunEvent::StepComplete {
                    step_id: step.id.to_string(),
                    key,
                    status: StepStatus::Skipped,
                    top_level: self.is_top_level(step, scope),
                    elapsed_ms: 0,
                });
                continue;
            }

            self.execute_step(step, &key, scope)?;
        }
        Ok(())
    }

    fn is_top_level(&self, step: &WorkflowStep, scope: Option<&IterationScope>) -> bool {
        scope.is_none()
            && self
                .runner
                .definition
                .steps
                .iter()
                .any(|top| top.id == step.id)
    }

    fn unmet_dependency<'s>(
        &self,
        step: &'s WorkflowStep,
        scope: Option<&IterationScope>,
    ) -> Option<&'s crate::shared::ids::StepId> {
        step.depends_on.iter().find(|dep| {
            let scoped = scope.and_then(|s| self.results.get(&format!("{}.{}", s.prefix, dep)));
            let result = scoped.or_else(|| self.results.get(dep.as_str()));
            !matches!(result, Some(r) if r.status == StepStatus::Succeeded)
        })
    }

    fn execute_step(
        &mut self,
        step: &WorkflowStep,
        key: &str,
        scope: Option<&IterationScope>,
    ) -> Result<(), RunError> {
        let retry = step
            .retry
            .or(self.runner.definition.retry_policy)
            .unwrap_or_else(RetrySpec::single_attempt);
        let started = Instant::now();
        let top_level = self.is_top_level(step, scope);
        let mut attempt = 0;

        let failure = loop {
            attempt += 1;
            self.ctx.set_current_step(Some(step.id.clone()));
            self.runner.emit(RunEvent::StepStart {
                step_id: step.id.to_string(),
                key: key.to_string(),
                attempt,
            });

            match self.attempt_step(step, key, scope) {
                Ok(output) => {
                    self.ctx
                        .record_step(step.id.as_str(), StepStatus::Succeeded, &output);
                    self.record(StepResult {
                        step_id: step.id.to_string(),
                        key: key.to_string(),
                        status: StepStatus::Succeeded,
                        output,
                        error: None,
                        attempts: attempt,
                        retries: attempt - 1,
                        iteration: scope.map(|s| s.index),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    self.runner.emit(RunEvent::StepComplete {
                        step_id: step.id.to_string(),
                        key: key.to_string(),
                        status: StepStatus::Succeeded,
                        top_level,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    return Ok(());
                }
                Err(Attempt::Fatal(err)) => {
                    self.record(StepResult {
                        step_id: step.id.to_string(),
                        key: key.to_string(),
                        status: StepStatus::Failed,
                        output: Value::Null,
                        error: Some(err.to_string()),
                        attempts: attempt,
                        retries: attempt - 1,
                        iteration: scope.map(|s| s.index),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    return Err(err);
                }
                Err(Attempt::Failed(err)) if attempt < retry.attempts => {
                    let delay = retry_delay(&retry, attempt);
                    self.runner.emit(RunEvent::StepRetry {
                        step_id: step.id.to_string(),
                        key: key.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                    self.pause(delay)?;
                }
                Err(Attempt::Failed(err)) => break err,
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.ctx
            .record_step(step.id.as_str(), StepStatus::Failed, &Value::Null);
        self.record(StepResult {
            step_id: step.id.to_string(),
            key: key.to_string(),
            status: StepStatus::Failed,
            output: Value::Null,
            error: Some(failure.to_string()),
            attempts: attempt,
            retries: attempt - 1,
            iteration: scope.map(|s| s.index),
            elapsed_ms,
        });
        self.runner.emit(RunEvent::StepError {
            step_id: step.id.to_string(),
            key: key.to_string(),
            code: failure.code(),
            error: failure.to_string(),
            attempts: attempt,
        });

        if step.on_error.halts_run() {
            return Err(RunError::StepFailed {
                step_id: step.id.clone(),
                error: failure,
            });
        }
        self.runner.log(
            LogLevel::Warn,
            "run.step.failed_continue",
            &failure.to_string(),
            crate::log_fields! {
                "step_id" => step.id.as_str(),
                "on_error" => step.on_error.as_str(),
            },
        );
        self.runner.emit(RunEvent::StepComplete {
            step_id: step.id.to_string(),
            key: key.to_string(),
            status: StepStatus::Failed,
            top_level,
            elapsed_ms,
        });
        Ok(())
    }

    fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        step.timeout
            .or(self.runner.definition.step_timeout)
            .unwrap_or(self.runner.options.default_step_timeout)
    }

    fn attempt_step(
        &mut self,
        step: &WorkflowStep,
        key: &str,
        scope: Option<&IterationScope>,
    ) -> Result<Value, Attempt> {
        let timeout = self.step_timeout(step);
        match &step.action {
            StepAction::RemoteCommand { command, args } => {
                let command = self.render(command)?;
                let args = match self.render_value(&Value::Array(args.clone()))? {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                self.call_action(timeout, move |actions, agent, timeout| {
                    actions.remote_command(agent, &command, &args, timeout)
                })
            }
            StepAction::ScriptedAction { script, params } => {
                let script = self.render(script)?;
                let params = match self.render_value(&Value::Object(params.clone()))? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                self.call_action(timeout, move |actions, agent, timeout| {
                    actions.scripted_action(agent, &script, &params, timeout)
                })
            }
            StepAction::Wait { duration } => {
                let duration = match duration {
                    WaitDuration::Fixed(duration) => *duration,
                    WaitDuration::Template(raw) => {
                        let rendered = self.render(raw)?;
                        parse_time_field(&rendered).map_err(|reason| {
                            StepError::Action(format!("invalid wait duration: {reason}"))
                        })?
                    }
                };
                self.pause(duration).map_err(Attempt::Fatal)?;
                Ok(serde_json::json!({ "waited_ms": duration.as_millis() as u64 }))
            }
            StepAction::Conditional {
                condition,
                then_steps,
                else_steps,
            } => {
                let taken = condition.evaluate(self.ctx.variables());
                let branch = if taken { then_steps } else { else_steps };
                self.execute_steps(branch, scope).map_err(nested_failure)?;
                Ok(serde_json::json!({
                    "condition": condition.source(),
                    "result": taken,
                    "branch": if taken { "then" } else { "else" },
                }))
            }
            StepAction::System(directive) => self.run_directive(directive),
            StepAction::Loop { count, body } => {
                let count = self.resolve_count(count)?;
                let saved_index = self.ctx.remove_variable("loop_index");
                let saved_count = self.ctx.remove_variable("loop_count");
                let outcome = self.run_loop(key, count, body);
                for (name, saved) in [("loop_index", saved_index), ("loop_count", saved_count)] {
                    match saved {
                        Some(value) => self.ctx.set_variable(name, value),
                        None => {
                            self.ctx.remove_variable(name);
                        }
                    }
                }
                outcome.map_err(nested_failure)?;
                Ok(serde_json::json!({ "iterations": count }))
            }
        }
    }

    fn run_loop(&mut self, key: &str, count: u64, body: &[WorkflowStep]) -> Result<(), RunError> {
        for index in 0..count {
            self.checkpoint()?;
            self.ctx.set_variable("loop_index", Value::from(index));
            self.ctx.set_variable("loop_count", Value::from(count));
            let scope = IterationScope {
                prefix: format!("{key}[{index}]"),
                index,
            };
            self.execute_steps(body, Some(&scope))?;
        }
        Ok(())
    }

    fn resolve_count(&mut self, count: &LoopCount) -> Result<u64, Attempt> {
        let count = match count {
            LoopCount::Fixed(n) => *n,
            LoopCount::Template(raw) => {
                let rendered = self.render_value(&Value::String(raw.clone()))?;
                match &rendered {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse::<u64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    StepError::Action(format!("loop count `{rendered}` is not a non-negative integer"))
                })?
            }
        };
        if count > MAX_LOOP_COUNT {
            return Err(StepError::Action(format!("loop count {count} exceeds {MAX_LOOP_COUNT}")).into());
        }
        Ok(count)
    }

    fn run_directive(&mut self, directive: &SystemDirective) -> Result<Value, Attempt> {
        match directive {
            SystemDirective::Log { message } => {
                let message = self.render(message)?;
                self.runner.log(
                    LogLevel::Info,
                    "run.directive.log",
                    &message,
                    crate::log_fields! { "agent_id" => self.agent.agent_id.as_str() },
                );
                Ok(serde_json::json!({ "message": message }))
            }
            SystemDirective::Set { vars } => {
                let rendered = match self.render_value(&Value::Object(vars.clone()))? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                for (name, value) in &rendered {
                    self.ctx.set_variable(name, value.clone());
                }
                Ok(Value::Object(rendered))
            }
            SystemDirective::Fail { message } => {
                let message = match message {
                    Some(message) => self.render(message)?,
                    None => "workflow requested failure".to_string(),
                };
                Err(StepError::Directive(message).into())
            }
            SystemDirective::VerifyArtifact { path, marker } => {
                let path = self.render(path)?;
                let marker = marker.as_deref().map(|m| self.render(m)).transpose()?;
                let probe = self.runner.actions.artifact_probe(self.agent);
                let report = verify_and_signal(
                    probe.as_ref(),
                    &path,
                    &self.runner.options.verification,
                    marker.as_deref().map(Path::new),
                    Some(self.ctx.abort_handle().flag()),
                );
                self.checkpoint().map_err(Attempt::Fatal)?;
                if report.ready {
                    Ok(serde_json::to_value(&report).unwrap_or(Value::Null))
                } else {
                    Err(StepError::Verification(report.summary()).into())
                }
            }
        }
    }

    /// Runs a device action on a helper thread so the step timeout and the run deadline hold
    /// even if the action overruns its own timeout.
    fn call_action<F>(&self, step_timeout: Duration, action: F) -> Result<Value, Attempt>
    where
        F: FnOnce(&dyn StepActions, &AgentRef, Duration) -> Result<Value, StepError>
            + Send
            + 'static,
    {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Attempt::Fatal(self.run_timeout_error()));
        }
        let bounded_by_run = remaining < step_timeout;
        let timeout = step_timeout.min(remaining);

        let (tx, rx) = mpsc::channel();
        let actions = Arc::clone(&self.runner.actions);
        let agent = self.agent.clone();
        thread::spawn(move || {
            let _ = tx.send(action(actions.as_ref(), &agent, timeout));
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(StepError::Timeout { .. })) if bounded_by_run => {
                Err(Attempt::Fatal(self.run_timeout_error()))
            }
            Ok(Err(err)) => Err(Attempt::Failed(err)),
            Err(RecvTimeoutError::Timeout) if bounded_by_run => {
                Err(Attempt::Fatal(self.run_timeout_error()))
            }
            Err(RecvTimeoutError::Timeout) => Err(Attempt::Failed(StepError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })),
            Err(RecvTimeoutError::Disconnected) => Err(Attempt::Failed(StepError::Action(
                "step action ended without a result".to_string(),
            ))),
        }
    }

    /// Best-effort side run of the definition's `on_error` steps. Failures are logged only.
    fn run_error_handlers(&mut self, cause: &RunError) {
        let runner = self.runner;
        let handlers = &runner.definition.on_error;
        if handlers.is_empty() {
            return;
        }
        let budget = runner
            .options
            .default_step_timeout
            .saturating_mul(handlers.len() as u32);
        self.deadline = Instant::now() + budget;
        self.ctx.set_variable(
            "error",
            serde_json::json!({ "code": cause.code().as_str(), "message": cause.to_string() }),
        );
        if let Err(err) = self.execute_steps(handlers, None) {
            self.runner.log(
                LogLevel::Warn,
                "run.on_error.failed",
                &err.to_string(),
                crate::log_fields! {
                    "workflow_id" => self.runner.definition.id.as_str(),
                    "cause" => cause.code().as_str(),
                },
            );
        }
    }
}
