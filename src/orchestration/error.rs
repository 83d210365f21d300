use crate::shared::ids::StepId;
use crate::template::TemplateError;
use serde::{Deserialize, Serialize};

/// Machine codes stored on every terminal assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    ClaimConflict,
    StepFailed,
    Timeout,
    VerificationFailed,
    Aborted,
    AgentLost,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ClaimConflict => "claim_conflict",
            Self::StepFailed => "step_failed",
            Self::Timeout => "timeout",
            Self::VerificationFailed => "verification_failed",
            Self::Aborted => "aborted",
            Self::AgentLost => "agent_lost",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "validation" => Ok(Self::Validation),
            "claim_conflict" => Ok(Self::ClaimConflict),
            "step_failed" => Ok(Self::StepFailed),
            "timeout" => Ok(Self::Timeout),
            "verification_failed" => Ok(Self::VerificationFailed),
            "aborted" => Ok(Self::Aborted),
            "agent_lost" => Ok(Self::AgentLost),
            other => Err(format!("unknown error code `{other}`")),
        }
    }

    /// Whether a job failing with this code may be requeued under its retry budget.
    pub fn is_requeueable(self) -> bool {
        matches!(
            self,
            Self::StepFailed | Self::Timeout | Self::VerificationFailed | Self::AgentLost
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single step attempt. Absorbed by retry and `on_error` handling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Action(String),
    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("artifact verification failed: {0}")]
    Verification(String),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("{0}")]
    Directive(String),
    #[error("nested step `{step_id}` failed: {reason}")]
    Nested {
        step_id: String,
        code: ErrorCode,
        reason: String,
    },
}

impl StepError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Verification(_) => ErrorCode::VerificationFailed,
            Self::Nested { code, .. } => *code,
            Self::Action(_) | Self::Template(_) | Self::Directive(_) => ErrorCode::StepFailed,
        }
    }
}

/// Run-terminating outcome.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("step `{step_id}` failed: {error}")]
    StepFailed { step_id: StepId, error: StepError },
    #[error("workflow run timed out after {timeout_ms}ms")]
    RunTimeout { timeout_ms: u64 },
    #[error("workflow run aborted")]
    Aborted,
}

impl RunError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StepFailed { error, .. } => error.code(),
            Self::RunTimeout { .. } => ErrorCode::Timeout,
            Self::Aborted => ErrorCode::Aborted,
        }
    }
}
