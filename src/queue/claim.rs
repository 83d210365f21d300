//! Claim protocol.
//!
//! Pull (`claim_next`) and push (`claim_job`) both move a job out of `pending` with one
//! conditional `UPDATE ... WHERE status = 'pending'`. Zero rows affected means another caller
//! won; the caller gets `Conflict` and moves on. When a push and a pull race for the same job,
//! whichever update the database serializes first wins; the order is not fixed.

use super::{Assignment, AssignmentStatus, QueueError};
use crate::fleet::{classify_liveness, Liveness, LivenessThresholds};
use crate::shared::ids::{AgentId, AssignmentId, JobId};
use crate::shared::time::now_millis;
use crate::store::agents::load_agent;
use crate::store::JobStore;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Assignment),
    /// Another caller moved the job out of `pending` first.
    Conflict,
    NoPendingJob,
    AgentUnavailable { reason: String },
}

impl ClaimOutcome {
    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            ClaimOutcome::Claimed(assignment) => Some(assignment),
            _ => None,
        }
    }
}

/// Pull: the agent takes the highest-priority, oldest pending job.
pub fn claim_next(
    store: &JobStore,
    agent_id: &AgentId,
    thresholds: &LivenessThresholds,
) -> Result<ClaimOutcome, QueueError> {
    store.write(|tx| -> Result<ClaimOutcome, QueueError> {
        if let Some(reason) = agent_unavailable(tx, agent_id, thresholds)? {
            return Ok(ClaimOutcome::AgentUnavailable { reason });
        }
        let now = now_millis();
        let claimed: Option<(String, u32)> = tx
            .query_row(
                "UPDATE jobs
                    SET status = 'assigned', attempts = attempts + 1, updated_at = ?1
                  WHERE job_id = (
                        SELECT job_id FROM jobs
                         WHERE status = 'pending' AND cancel_requested = 0
                         ORDER BY priority DESC, created_at ASC, rowid ASC
                         LIMIT 1)
                    AND status = 'pending'
                 RETURNING job_id, attempts",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((job_id, attempt)) = claimed else {
            return Ok(ClaimOutcome::NoPendingJob);
        };
        let job_id = JobId::parse(&job_id).map_err(QueueError::InvalidRequest)?;
        Ok(ClaimOutcome::Claimed(insert_assignment(
            tx, &job_id, agent_id, attempt, now,
        )?))
    })
}

/// Push: a dispatcher offers a specific pending job to a specific agent.
pub fn claim_job(
    store: &JobStore,
    job_id: &JobId,
    agent_id: &AgentId,
    thresholds: &LivenessThresholds,
) -> Result<ClaimOutcome, QueueError> {
    store.write(|tx| -> Result<ClaimOutcome, QueueError> {
        if let Some(reason) = agent_unavailable(tx, agent_id, thresholds)? {
            return Ok(ClaimOutcome::AgentUnavailable { reason });
        }
        let now = now_millis();
        let attempt: Option<u32> = tx
            .query_row(
                "UPDATE jobs
                    SET status = 'assigned', attempts = attempts + 1, updated_at = ?1
                  WHERE job_id = ?2 AND status = 'pending' AND cancel_requested = 0
                 RETURNING attempts",
                params![now, job_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match attempt {
            Some(attempt) => Ok(ClaimOutcome::Claimed(insert_assignment(
                tx, job_id, agent_id, attempt, now,
            )?)),
            None if job_exists(tx, job_id)? => Ok(ClaimOutcome::Conflict),
            None => Err(QueueError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    })
}

fn job_exists(conn: &Connection, job_id: &JobId) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM jobs WHERE job_id = ?1",
            params![job_id.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// A claim needs the agent registered, online and without an active assignment.
fn agent_unavailable(
    conn: &Connection,
    agent_id: &AgentId,
    thresholds: &LivenessThresholds,
) -> rusqlite::Result<Option<String>> {
    let Some(agent) = load_agent(conn, agent_id.as_str())? else {
        return Ok(Some(format!("agent `{agent_id}` is not registered")));
    };
    let liveness = classify_liveness(
        agent.last_heartbeat_at,
        agent.responsive,
        now_millis(),
        thresholds,
    );
    if liveness != Liveness::Online {
        return Ok(Some(format!("agent `{agent_id}` is {liveness}")));
    }
    if let Some(current) = agent.current_assignment {
        return Ok(Some(format!(
            "agent `{agent_id}` is busy with assignment `{current}`"
        )));
    }
    Ok(None)
}

fn insert_assignment(
    conn: &Connection,
    job_id: &JobId,
    agent_id: &AgentId,
    attempt: u32,
    now: i64,
) -> Result<Assignment, QueueError> {
    let node_id: String = conn.query_row(
        "SELECT node_id FROM agents WHERE agent_id = ?1",
        params![agent_id.as_str()],
        |row| row.get(0),
    )?;
    let assignment = Assignment {
        assignment_id: AssignmentId::generate(),
        job_id: job_id.clone(),
        agent_id: agent_id.clone(),
        node_id: crate::shared::ids::NodeId::parse(&node_id).map_err(QueueError::InvalidRequest)?,
        attempt,
        status: AssignmentStatus::Assigned,
        progress: 0,
        error_code: None,
        error: None,
        assigned_at: now,
        started_at: None,
        completed_at: None,
    };
    conn.execute(
        "INSERT INTO assignments (
            assignment_id, job_id, agent_id, node_id, attempt, status, progress, assigned_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, 'assigned', 0, ?6)",
        params![
            assignment.assignment_id.as_str(),
            assignment.job_id.as_str(),
            assignment.agent_id.as_str(),
            assignment.node_id.as_str(),
            assignment.attempt,
            now,
        ],
    )?;
    Ok(assignment)
}
