#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid workflow document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("workflow `{workflow_id}` is invalid: {reason}")]
    Definition { workflow_id: String, reason: String },
    #[error("invalid job params: {0}")]
    Params(String),
}

impl ValidationError {
    pub(crate) fn definition(workflow_id: &str, reason: impl Into<String>) -> Self {
        Self::Definition {
            workflow_id: workflow_id.to_string(),
            reason: reason.into(),
        }
    }
}
