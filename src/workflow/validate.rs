use super::definition::{
    LoopCount, ParamSpec, RetrySpec, StepAction, SystemDirective, WaitDuration,
    WorkflowDefinition, WorkflowStep,
};
use super::document::{
    ActionDocument, CountValue, ParamDocument, RetryDocument, StepDocument, WorkflowDocument,
};
use super::params::check_value;
use super::ValidationError;
use crate::shared::duration::TimeValue;
use crate::shared::ids::{validate_identifier_value, StepId, WorkflowId};
use crate::template::Condition;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

pub const MAX_RETRY_ATTEMPTS: u32 = 100;
pub const MAX_LOOP_COUNT: u64 = 10_000;

impl WorkflowDefinition {
    /// Parses a YAML/JSON document and validates it.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let document = WorkflowDocument::parse(raw)?;
        Self::from_document(&document)
    }

    pub fn from_document(document: &WorkflowDocument) -> Result<Self, ValidationError> {
        let raw_id = document.id.trim();
        let id = WorkflowId::parse(raw_id)
            .map_err(|reason| ValidationError::definition(raw_id, reason))?;
        let mut validator = Validator {
            workflow_id: id.as_str().to_string(),
            declared: HashSet::new(),
        };

        let name = document
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(id.as_str())
            .to_string();
        if document.version == 0 {
            return Err(validator.error("`version` must be at least 1"));
        }
        let timeout = validator.optional_time(document.timeout.as_ref(), "timeout")?;
        let step_timeout = validator.optional_time(document.step_timeout.as_ref(), "step_timeout")?;
        let params = validator.params(&document.params)?;
        let retry_policy = document
            .retry_policy
            .as_ref()
            .map(|retry| validator.retry(retry, "retry_policy"))
            .transpose()?;

        if document.steps.is_empty() {
            return Err(validator.error("workflow must declare at least one step"));
        }
        let steps = validator.steps(&document.steps)?;
        let on_error = validator.steps(&document.on_error)?;

        Ok(Self {
            id,
            name,
            version: document.version,
            timeout,
            step_timeout,
            params,
            steps,
            retry_policy,
            on_error,
        })
    }
}

struct Validator {
    workflow_id: String,
    declared: HashSet<String>,
}

impl Validator {
    fn error(&self, reason: impl Into<String>) -> ValidationError {
        ValidationError::definition(&self.workflow_id, reason)
    }

    fn time(&self, value: &TimeValue, field: &str) -> Result<Duration, ValidationError> {
        let duration = value
            .resolve()
            .map_err(|reason| self.error(format!("`{field}`: {reason}")))?;
        if duration.is_zero() {
            return Err(self.error(format!("`{field}` must be greater than zero")));
        }
        Ok(duration)
    }

    fn optional_time(
        &self,
        value: Option<&TimeValue>,
        field: &str,
    ) -> Result<Option<Duration>, ValidationError> {
        value.map(|v| self.time(v, field)).transpose()
    }

    fn params(&self, documents: &[ParamDocument]) -> Result<Vec<ParamSpec>, ValidationError> {
        let mut names = HashSet::new();
        let mut specs = Vec::with_capacity(documents.len());
        for doc in documents {
            let name = doc.name.trim();
            validate_identifier_value("param name", name)
                .map_err(|reason| self.error(reason))?;
            if !names.insert(name.to_string()) {
                return Err(self.error(format!("duplicate param `{name}`")));
            }
            let spec = ParamSpec {
                name: name.to_string(),
                param_type: doc.param_type,
                required: doc.required,
                default: doc.default.clone().filter(|v| !v.is_null()),
                validation: doc.validation.clone().unwrap_or_default(),
            };
            if let Some(default) = &spec.default {
                check_value(&spec, default)
                    .map_err(|reason| self.error(format!("default rejected: {reason}")))?;
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    fn retry(&self, doc: &RetryDocument, field: &str) -> Result<RetrySpec, ValidationError> {
        if doc.attempts == 0 || doc.attempts > MAX_RETRY_ATTEMPTS {
            return Err(self.error(format!(
                "`{field}.attempts` must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }
        let delay = match &doc.delay {
            Some(value) => value
                .resolve()
                .map_err(|reason| self.error(format!("`{field}.delay`: {reason}")))?,
            None => Duration::ZERO,
        };
        Ok(RetrySpec {
            attempts: doc.attempts,
            delay,
            backoff: doc.backoff,
        })
    }

    fn steps(&mut self, documents: &[StepDocument]) -> Result<Vec<WorkflowStep>, ValidationError> {
        documents.iter().map(|doc| self.step(doc)).collect()
    }

    fn step(&mut self, doc: &StepDocument) -> Result<WorkflowStep, ValidationError> {
        let raw_id = doc.id.trim();
        let id = StepId::parse(raw_id).map_err(|reason| self.error(reason))?;
        if self.declared.contains(id.as_str()) {
            return Err(self.error(format!("duplicate step id `{id}`")));
        }

        let mut depends_on = Vec::with_capacity(doc.depends_on.len());
        for dep in &doc.depends_on {
            let dep = dep.trim();
            if dep == id.as_str() {
                return Err(self.error(format!("step `{id}` depends on itself")));
            }
            if !self.declared.contains(dep) {
                return Err(self.error(format!(
                    "step `{id}` depends on `{dep}` which is not declared earlier"
                )));
            }
            depends_on.push(StepId::parse(dep).map_err(|reason| self.error(reason))?);
        }
        self.declared.insert(id.as_str().to_string());

        let field = |name: &str| format!("steps.{id}.{name}");
        let timeout = self.optional_time(doc.timeout.as_ref(), &field("timeout"))?;
        let retry = doc
            .retry
            .as_ref()
            .map(|retry| self.retry(retry, &field("retry")))
            .transpose()?;
        let action = self.action(&id, &doc.action)?;

        Ok(WorkflowStep {
            id,
            action,
            timeout,
            retry,
            on_error: doc.on_error.unwrap_or_default(),
            depends_on,
        })
    }

    fn action(&mut self, id: &StepId, doc: &ActionDocument) -> Result<StepAction, ValidationError> {
        match doc {
            ActionDocument::RemoteCommand { command, args } => {
                if command.trim().is_empty() {
                    return Err(self.error(format!("step `{id}` needs a non-empty `command`")));
                }
                Ok(StepAction::RemoteCommand {
                    command: command.clone(),
                    args: args.clone(),
                })
            }
            ActionDocument::ScriptedAction { script, params } => {
                if script.trim().is_empty() {
                    return Err(self.error(format!("step `{id}` needs a non-empty `script`")));
                }
                Ok(StepAction::ScriptedAction {
                    script: script.clone(),
                    params: params.clone(),
                })
            }
            ActionDocument::Wait { duration } => {
                let duration = if duration.is_template() {
                    match duration {
                        TimeValue::Text(raw) => WaitDuration::Template(raw.clone()),
                        TimeValue::Millis(ms) => WaitDuration::Fixed(Duration::from_millis(*ms)),
                    }
                } else {
                    WaitDuration::Fixed(duration.resolve().map_err(|reason| {
                        self.error(format!("step `{id}` has an invalid `duration`: {reason}"))
                    })?)
                };
                Ok(StepAction::Wait { duration })
            }
            ActionDocument::Conditional {
                condition,
                then_steps,
                else_steps,
            } => {
                let condition = Condition::parse(condition).map_err(|err| {
                    self.error(format!("step `{id}` has an invalid condition: {err}"))
                })?;
                if then_steps.is_empty() && else_steps.is_empty() {
                    return Err(self.error(format!(
                        "conditional step `{id}` needs a `then` or `else` branch"
                    )));
                }
                Ok(StepAction::Conditional {
                    condition,
                    then_steps: self.steps(then_steps)?,
                    else_steps: self.steps(else_steps)?,
                })
            }
            ActionDocument::System { directive, args } => {
                Ok(StepAction::System(self.directive(id, directive, args)?))
            }
            ActionDocument::Loop { count, steps } => {
                let count = match count {
                    CountValue::Fixed(n) => LoopCount::Fixed(*n),
                    CountValue::Template(raw) if raw.contains("{{") => {
                        LoopCount::Template(raw.clone())
                    }
                    CountValue::Template(raw) => LoopCount::Fixed(raw.trim().parse().map_err(
                        |_| self.error(format!("loop step `{id}` has an invalid `count`")),
                    )?),
                };
                if let LoopCount::Fixed(n) = count {
                    if n > MAX_LOOP_COUNT {
                        return Err(self.error(format!(
                            "loop step `{id}` count exceeds {MAX_LOOP_COUNT}"
                        )));
                    }
                }
                if steps.is_empty() {
                    return Err(self.error(format!("loop step `{id}` needs a body")));
                }
                Ok(StepAction::Loop {
                    count,
                    body: self.steps(steps)?,
                })
            }
        }
    }

    fn directive(
        &self,
        id: &StepId,
        directive: &str,
        args: &serde_json::Map<String, Value>,
    ) -> Result<SystemDirective, ValidationError> {
        let text = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
        match directive.trim() {
            "log" => Ok(SystemDirective::Log {
                message: text("message").ok_or_else(|| {
                    self.error(format!("system step `{id}` directive `log` needs `message`"))
                })?,
            }),
            "set" => match args.get("vars") {
                Some(Value::Object(vars)) => Ok(SystemDirective::Set { vars: vars.clone() }),
                _ => Err(self.error(format!(
                    "system step `{id}` directive `set` needs a `vars` map"
                ))),
            },
            "fail" => Ok(SystemDirective::Fail {
                message: text("message"),
            }),
            "verify_artifact" => Ok(SystemDirective::VerifyArtifact {
                path: text("path").ok_or_else(|| {
                    self.error(format!(
                        "system step `{id}` directive `verify_artifact` needs `path`"
                    ))
                })?,
                marker: text("marker"),
            }),
            other => Err(self.error(format!(
                "system step `{id}` has unknown directive `{other}`"
            ))),
        }
    }
}
