use crate::store::StoreError;
use crate::workflow::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("job `{job_id}` not found")]
    JobNotFound { job_id: String },
    #[error("assignment `{assignment_id}` not found")]
    AssignmentNotFound { assignment_id: String },
    #[error("{subject} cannot move from `{from}` to `{to}`")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },
    #[error("invalid job request: {0}")]
    InvalidRequest(String),
}

impl From<rusqlite::Error> for QueueError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sql { source })
    }
}
