use super::{Job, JobStatus, NewJob, QueueError};
use crate::shared::ids::JobId;
use crate::shared::time::now_millis;
use crate::store::feed::append_job_event;
use crate::store::{JobEventKind, JobStore};
use crate::workflow::resolve_params;
use rusqlite::params;

pub const MAX_JOB_ATTEMPTS: u32 = 100;

/// Validates the request against the pinned workflow version and inserts a `pending` job.
/// Nothing is written when params do not validate.
pub fn submit_job(store: &JobStore, request: NewJob) -> Result<Job, QueueError> {
    if request.max_attempts == 0 || request.max_attempts > MAX_JOB_ATTEMPTS {
        return Err(QueueError::InvalidRequest(format!(
            "max attempts must be between 1 and {MAX_JOB_ATTEMPTS}"
        )));
    }
    let record = match request.workflow_version {
        Some(version) => store.workflow_version(&request.workflow_id, version)?,
        None => store.latest_workflow(&request.workflow_id)?,
    };
    let definition = record.definition()?;
    let params = resolve_params(&definition, &request.params)?;

    let now = now_millis();
    let job = Job {
        job_id: JobId::generate(),
        workflow_id: request.workflow_id,
        workflow_version: record.version,
        params,
        priority: request.priority,
        max_attempts: request.max_attempts,
        attempts: 0,
        status: JobStatus::Pending,
        cancel_requested: false,
        error_code: None,
        error: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    let encoded = serde_json::Value::Object(job.params.clone()).to_string();

    store.write(|tx| -> Result<(), QueueError> {
        tx.execute(
            "INSERT INTO jobs (
                job_id, workflow_id, workflow_version, params, priority, max_attempts,
                attempts, status, cancel_requested, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 'pending', 0, ?7, ?7)",
            params![
                job.job_id.as_str(),
                job.workflow_id.as_str(),
                job.workflow_version,
                encoded,
                job.priority.rank(),
                job.max_attempts,
                now,
            ],
        )?;
        append_job_event(tx, &job.job_id, JobEventKind::Submitted)?;
        Ok(())
    })?;
    Ok(job)
}
