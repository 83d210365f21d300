use super::document::{BackoffStrategy, OnErrorPolicy, ParamType, ParamValidation};
use crate::shared::ids::{StepId, WorkflowId};
use crate::template::Condition;
use serde_json::{Map, Value};
use std::time::Duration;

/// Immutable, validated workflow. Built only through [`WorkflowDefinition::parse`] or
/// [`WorkflowDefinition::from_document`].
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub version: u32,
    pub timeout: Option<Duration>,
    pub step_timeout: Option<Duration>,
    pub params: Vec<ParamSpec>,
    pub steps: Vec<WorkflowStep>,
    pub retry_policy: Option<RetrySpec>,
    pub on_error: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub validation: ParamValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySpec {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffStrategy,
}

impl RetrySpec {
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            backoff: BackoffStrategy::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowStep {
    pub id: StepId,
    pub action: StepAction,
    pub timeout: Option<Duration>,
    pub retry: Option<RetrySpec>,
    pub on_error: OnErrorPolicy,
    pub depends_on: Vec<StepId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitDuration {
    Fixed(Duration),
    Template(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCount {
    Fixed(u64),
    Template(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemDirective {
    Log { message: String },
    Set { vars: Map<String, Value> },
    Fail { message: Option<String> },
    VerifyArtifact { path: String, marker: Option<String> },
}

impl SystemDirective {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Set { .. } => "set",
            Self::Fail { .. } => "fail",
            Self::VerifyArtifact { .. } => "verify_artifact",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepAction {
    RemoteCommand {
        command: String,
        args: Vec<Value>,
    },
    ScriptedAction {
        script: String,
        params: Map<String, Value>,
    },
    Wait {
        duration: WaitDuration,
    },
    Conditional {
        condition: Condition,
        then_steps: Vec<WorkflowStep>,
        else_steps: Vec<WorkflowStep>,
    },
    System(SystemDirective),
    Loop {
        count: LoopCount,
        body: Vec<WorkflowStep>,
    },
}

impl StepAction {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RemoteCommand { .. } => "remote_command",
            Self::ScriptedAction { .. } => "scripted_action",
            Self::Wait { .. } => "wait",
            Self::Conditional { .. } => "conditional",
            Self::System(_) => "system",
            Self::Loop { .. } => "loop",
        }
    }
}

impl WorkflowDefinition {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn find_step(&self, id: &str) -> Option<&WorkflowStep> {
        fn walk<'a>(steps: &'a [WorkflowStep], id: &str) -> Option<&'a WorkflowStep> {
            for step in steps {
                if step.id.as_str() == id {
                    return Some(step);
                }
                let nested = match &step.action {
                    StepAction::Conditional {
                        then_steps,
                        else_steps,
                        ..
                    } => walk(then_steps, id).or_else(|| walk(else_steps, id)),
                    StepAction::Loop { body, .. } => walk(body, id),
                    _ => None,
                };
                if nested.is_some() {
                    return nested;
                }
            }
            None
        }
        walk(&self.steps, id).or_else(|| walk(&self.on_error, id))
    }
}
