//! Raw, unvalidated shape of a workflow document as written in YAML or JSON.

use crate::shared::duration::TimeValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowDocument {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub timeout: Option<TimeValue>,
    #[serde(default)]
    pub step_timeout: Option<TimeValue>,
    #[serde(default)]
    pub params: Vec<ParamDocument>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
    #[serde(default)]
    pub retry_policy: Option<RetryDocument>,
    #[serde(default)]
    pub on_error: Vec<StepDocument>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    #[default]
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ParamValidation {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub one_of: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParamDocument {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub validation: Option<ParamValidation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    None,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryDocument {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub delay: Option<TimeValue>,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    #[default]
    Stop,
    Fail,
    Continue,
    Skip,
    Retry,
}

impl OnErrorPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Fail => "fail",
            Self::Continue => "continue",
            Self::Skip => "skip",
            Self::Retry => "retry",
        }
    }

    /// `retry` has already spent its attempts by the time the policy applies, so it halts.
    pub fn halts_run(self) -> bool {
        matches!(self, Self::Stop | Self::Fail | Self::Retry)
    }
}

/// Loop iteration count: a literal or a template resolved at run time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CountValue {
    Fixed(u64),
    Template(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDocument {
    pub id: String,
    #[serde(flatten)]
    pub action: ActionDocument,
    #[serde(default)]
    pub timeout: Option<TimeValue>,
    #[serde(default)]
    pub retry: Option<RetryDocument>,
    #[serde(default)]
    pub on_error: Option<OnErrorPolicy>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionDocument {
    RemoteCommand {
        command: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    ScriptedAction {
        script: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    Wait {
        duration: TimeValue,
    },
    Conditional {
        condition: String,
        #[serde(rename = "then", default)]
        then_steps: Vec<StepDocument>,
        #[serde(rename = "else", default)]
        else_steps: Vec<StepDocument>,
    },
    System {
        directive: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    Loop {
        count: CountValue,
        #[serde(default)]
        steps: Vec<StepDocument>,
    },
}

impl ActionDocument {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RemoteCommand { .. } => "remote_command",
            Self::ScriptedAction { .. } => "scripted_action",
            Self::Wait { .. } => "wait",
            Self::Conditional { .. } => "conditional",
            Self::System { .. } => "system",
            Self::Loop { .. } => "loop",
        }
    }
}

impl WorkflowDocument {
    /// Accepts YAML, which includes JSON documents.
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}
