use super::error::ErrorCode;
use super::runner::{RunState, StepStatus};
use serde::Serialize;

/// Structured run events, serialized with an `event` tag such as `step:retry`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum RunEvent {
    #[serde(rename = "start")]
    Start {
        workflow_id: String,
        version: u32,
        agent_id: String,
        top_level_steps: usize,
    },
    #[serde(rename = "step:start")]
    StepStart {
        step_id: String,
        key: String,
        attempt: u32,
    },
    #[serde(rename = "step:retry")]
    StepRetry {
        step_id: String,
        key: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    #[serde(rename = "step:complete")]
    StepComplete {
        step_id: String,
        key: String,
        status: StepStatus,
        top_level: bool,
        elapsed_ms: u64,
    },
    #[serde(rename = "step:error")]
    StepError {
        step_id: String,
        key: String,
        code: ErrorCode,
        error: String,
        attempts: u32,
    },
    #[serde(rename = "complete")]
    Complete {
        state: RunState,
        elapsed_ms: u64,
        error: Option<String>,
    },
    #[serde(rename = "abort")]
    Abort {
        step_id: Option<String>,
        elapsed_ms: u64,
    },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StepStart { .. } => "step:start",
            Self::StepRetry { .. } => "step:retry",
            Self::StepComplete { .. } => "step:complete",
            Self::StepError { .. } => "step:error",
            Self::Complete { .. } => "complete",
            Self::Abort { .. } => "abort",
        }
    }
}
