//! Assignment and job transitions after a claim.
//!
//! Every transition is a conditional update on the current status, so a terminal
//! `(status, completed_at)` is written once and later writes are rejected.

use super::{Assignment, AssignmentStatus, Job, JobStatus, QueueError};
use crate::orchestration::ErrorCode;
use crate::shared::ids::{AssignmentId, JobId};
use crate::shared::time::now_millis;
use crate::store::feed::append_job_event;
use crate::store::jobs::{load_active_assignment, load_assignment, load_job};
use crate::store::{JobEventKind, JobStore};
use rusqlite::{params, Connection};

#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Back to `pending` under the retry budget.
    Requeued { attempt: u32, max_attempts: u32 },
    /// Terminal; needs an operator requeue.
    Failed { attempt: u32, max_attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Running jobs are cancelled cooperatively by the host worker.
    Requested,
    AlreadyTerminal(JobStatus),
}

fn required_assignment(conn: &Connection, id: &AssignmentId) -> Result<Assignment, QueueError> {
    load_assignment(conn, id.as_str())?.ok_or_else(|| QueueError::AssignmentNotFound {
        assignment_id: id.to_string(),
    })
}

fn required_job(conn: &Connection, id: &JobId) -> Result<Job, QueueError> {
    load_job(conn, id.as_str())?.ok_or_else(|| QueueError::JobNotFound {
        job_id: id.to_string(),
    })
}

fn rejected(assignment: &Assignment, to: AssignmentStatus) -> QueueError {
    QueueError::InvalidTransition {
        subject: format!("assignment `{}`", assignment.assignment_id),
        from: assignment.status.to_string(),
        to: to.to_string(),
    }
}

pub fn start_assignment(store: &JobStore, id: &AssignmentId) -> Result<Assignment, QueueError> {
    store.write(|tx| -> Result<Assignment, QueueError> {
        let now = now_millis();
        let changed = tx.execute(
            "UPDATE assignments SET status = 'running', started_at = ?1
              WHERE assignment_id = ?2 AND status = 'assigned'",
            params![now, id.as_str()],
        )?;
        let assignment = required_assignment(tx, id)?;
        if changed == 0 {
            return Err(rejected(&assignment, AssignmentStatus::Running));
        }
        tx.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?1
              WHERE job_id = ?2 AND status = 'assigned'",
            params![now, assignment.job_id.as_str()],
        )?;
        Ok(assignment)
    })
}

/// Raises progress, never lowering it. Returns the stored value.
pub fn report_progress(
    store: &JobStore,
    id: &AssignmentId,
    progress: u8,
) -> Result<u8, QueueError> {
    let progress = progress.min(100);
    store.write(|tx| -> Result<u8, QueueError> {
        let changed = tx.execute(
            "UPDATE assignments SET progress = MAX(progress, ?1)
              WHERE assignment_id = ?2 AND status = 'running'",
            params![progress, id.as_str()],
        )?;
        let assignment = required_assignment(tx, id)?;
        if changed == 0 {
            return Err(QueueError::InvalidTransition {
                subject: format!("assignment `{id}`"),
                from: assignment.status.to_string(),
                to: "progress update".to_string(),
            });
        }
        Ok(assignment.progress)
    })
}

pub fn complete_assignment(store: &JobStore, id: &AssignmentId) -> Result<Assignment, QueueError> {
    store.write(|tx| -> Result<Assignment, QueueError> {
        let now = now_millis();
        let changed = tx.execute(
            "UPDATE assignments SET status = 'completed', progress = 100, completed_at = ?1
              WHERE assignment_id = ?2 AND status = 'running'",
            params![now, id.as_str()],
        )?;
        let assignment = required_assignment(tx, id)?;
        if changed == 0 {
            return Err(rejected(&assignment, AssignmentStatus::Completed));
        }
        tx.execute(
            "UPDATE jobs SET status = 'completed', error_code = NULL, error = NULL,
                    updated_at = ?1, completed_at = ?1
              WHERE job_id = ?2 AND status = 'running'",
            params![now, assignment.job_id.as_str()],
        )?;
        Ok(assignment)
    })
}

/// Fails an active assignment and either requeues the job or fails it terminally.
/// Only retryable codes are requeued, and never after a cancel request.
pub fn fail_assignment(
    store: &JobStore,
    id: &AssignmentId,
    code: ErrorCode,
    message: &str,
) -> Result<FailOutcome, QueueError> {
    store.write(|tx| -> Result<FailOutcome, QueueError> {
        let now = now_millis();
        let changed = tx.execute(
            "UPDATE assignments SET status = 'failed', error_code = ?1, error = ?2, completed_at = ?3
              WHERE assignment_id = ?4 AND status IN ('assigned', 'running')",
            params![code.as_str(), message, now, id.as_str()],
        )?;
        let assignment = required_assignment(tx, id)?;
        if changed == 0 {
            return Err(rejected(&assignment, AssignmentStatus::Failed));
        }
        let job = required_job(tx, &assignment.job_id)?;
        let requeue =
            code.is_requeueable() && !job.cancel_requested && job.has_attempts_left();

        if requeue {
            tx.execute(
                "UPDATE jobs SET status = 'pending', error_code = ?1, error = ?2, updated_at = ?3
                  WHERE job_id = ?4 AND status IN ('assigned', 'running')",
                params![code.as_str(), message, now, job.job_id.as_str()],
            )?;
            append_job_event(tx, &job.job_id, JobEventKind::Requeued)?;
            Ok(FailOutcome::Requeued {
                attempt: job.attempts,
                max_attempts: job.max_attempts,
            })
        } else {
            tx.execute(
                "UPDATE jobs SET status = 'failed', error_code = ?1, error = ?2,
                        updated_at = ?3, completed_at = ?3
                  WHERE job_id = ?4 AND status IN ('assigned', 'running')",
                params![code.as_str(), message, now, job.job_id.as_str()],
            )?;
            Ok(FailOutcome::Failed {
                attempt: job.attempts,
                max_attempts: job.max_attempts,
            })
        }
    })
}

pub fn cancel_job(store: &JobStore, job_id: &JobId) -> Result<CancelOutcome, QueueError> {
    store.write(|tx| -> Result<CancelOutcome, QueueError> {
        let job = required_job(tx, job_id)?;
        let now = now_millis();
        match job.status {
            JobStatus::Pending | JobStatus::Assigned => {
                tx.execute(
                    "UPDATE assignments SET status = 'cancelled', error_code = ?1,
                            error = 'cancelled by operator', completed_at = ?2
                      WHERE job_id = ?3 AND status = 'assigned'",
                    params![ErrorCode::Aborted.as_str(), now, job_id.as_str()],
                )?;
                tx.execute(
                    "UPDATE jobs SET status = 'cancelled', cancel_requested = 1,
                            updated_at = ?1, completed_at = ?1
                      WHERE job_id = ?2 AND status IN ('pending', 'assigned')",
                    params![now, job_id.as_str()],
                )?;
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Running => {
                tx.execute(
                    "UPDATE jobs SET cancel_requested = 1, updated_at = ?1 WHERE job_id = ?2",
                    params![now, job_id.as_str()],
                )?;
                Ok(CancelOutcome::Requested)
            }
            status => Ok(CancelOutcome::AlreadyTerminal(status)),
        }
    })
}

pub fn cancel_requested(store: &JobStore, job_id: &JobId) -> Result<bool, QueueError> {
    store.read(|conn| -> Result<bool, QueueError> { Ok(required_job(conn, job_id)?.cancel_requested) })
}

/// Operator requeue of a terminally failed job. Grants one attempt beyond those used.
pub fn requeue_job(store: &JobStore, job_id: &JobId) -> Result<Job, QueueError> {
    store.write(|tx| -> Result<Job, QueueError> {
        let job = required_job(tx, job_id)?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidTransition {
                subject: format!("job `{job_id}`"),
                from: job.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        if let Some(active) = load_active_assignment(tx, job_id.as_str())? {
            return Err(QueueError::InvalidTransition {
                subject: format!("job `{job_id}`"),
                from: format!("failed with active assignment `{}`", active.assignment_id),
                to: JobStatus::Pending.to_string(),
            });
        }
        tx.execute(
            "UPDATE jobs SET status = 'pending', cancel_requested = 0,
                    max_attempts = MAX(max_attempts, attempts + 1),
                    completed_at = NULL, updated_at = ?1
              WHERE job_id = ?2 AND status = 'failed'",
            params![now_millis(), job_id.as_str()],
        )?;
        append_job_event(tx, job_id, JobEventKind::Requeued)?;
        required_job(tx, job_id)
    })
}
