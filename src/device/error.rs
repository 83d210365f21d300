use crate::orchestration::StepError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport binary `{binary}` was not found")]
    MissingBinary { binary: String },
    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("`{command}` exited with status {exit_code}: {stderr}")]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported command `{0}`")]
    UnsupportedCommand(String),
    #[error("invalid arguments for `{command}`: {reason}")]
    InvalidArgs { command: String, reason: String },
    #[error("script `{script}` reported failure: {message}")]
    ScriptFailed { script: String, message: String },
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> TransportError {
    TransportError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl From<TransportError> for StepError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout_ms, .. } => StepError::Timeout { timeout_ms },
            other => StepError::Action(other.to_string()),
        }
    }
}
