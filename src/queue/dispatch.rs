use super::claim::{claim_job, ClaimOutcome};
use super::{Assignment, QueueError};
use crate::fleet::LivenessThresholds;
use crate::shared::ids::{AgentId, JobId};
use crate::store::JobStore;
use rusqlite::params;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub assigned: Vec<Assignment>,
    pub conflicts: Vec<JobId>,
    pub skipped_agents: Vec<(AgentId, String)>,
}

/// Pending job ids in claim order.
pub fn pending_job_ids(store: &JobStore, limit: usize) -> Result<Vec<JobId>, QueueError> {
    store.read(|conn| -> Result<Vec<JobId>, QueueError> {
        let mut stmt = conn.prepare(
            "SELECT job_id FROM jobs WHERE status = 'pending' AND cancel_requested = 0
              ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|id| JobId::parse(id).map_err(QueueError::InvalidRequest))
            .collect()
    })
}

/// Push dispatch: pairs pending jobs with the given idle agents. Each pairing goes through
/// the same conditional claim as a pull, so a lost race only costs that job.
pub fn dispatch_pending(
    store: &JobStore,
    idle_agents: &[AgentId],
    thresholds: &LivenessThresholds,
) -> Result<DispatchReport, QueueError> {
    let mut report = DispatchReport::default();
    if idle_agents.is_empty() {
        return Ok(report);
    }
    let mut agents = idle_agents.iter();
    let mut agent = agents.next();
    for job_id in pending_job_ids(store, idle_agents.len() * 2)? {
        while let Some(current) = agent {
            match claim_job(store, &job_id, current, thresholds)? {
                ClaimOutcome::Claimed(assignment) => {
                    report.assigned.push(assignment);
                    agent = agents.next();
                    break;
                }
                ClaimOutcome::Conflict | ClaimOutcome::NoPendingJob => {
                    report.conflicts.push(job_id.clone());
                    break;
                }
                ClaimOutcome::AgentUnavailable { reason } => {
                    report.skipped_agents.push((current.clone(), reason));
                    agent = agents.next();
                }
            }
        }
        if agent.is_none() {
            break;
        }
    }
    Ok(report)
}
