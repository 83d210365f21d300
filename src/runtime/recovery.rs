use super::RuntimeError;
use crate::fleet::FleetRegistry;
use crate::orchestration::ErrorCode;
use crate::queue::{fail_assignment, Assignment, FailOutcome, QueueError};
use crate::shared::ids::AssignmentId;
use crate::store::JobStore;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredAssignment {
    pub assignment: Assignment,
    pub reason: String,
    pub outcome: FailOutcome,
}

/// Fails active assignments nobody will finish with `agent_lost`, which requeues them under
/// the normal retry budget. An assignment is orphaned when its agent is offline, or when it
/// belongs to this node and is not in `live` (the assignments this process is running).
pub fn recover_orphaned_assignments(
    store: &JobStore,
    registry: &FleetRegistry,
    live: &BTreeSet<AssignmentId>,
) -> Result<Vec<RecoveredAssignment>, RuntimeError> {
    let offline = registry
        .offline_agents()?
        .into_iter()
        .map(|agent| agent.agent_id)
        .collect::<BTreeSet<_>>();
    let agents = store
        .list_agents(None)?
        .into_iter()
        .map(|agent| (agent.agent_id.clone(), agent))
        .collect::<BTreeMap<_, _>>();

    let mut recovered = Vec::new();
    for assignment in store.active_assignments(None)? {
        let reason = if offline.contains(&assignment.agent_id) {
            format!("agent `{}` went offline", assignment.agent_id)
        } else if !agents.contains_key(&assignment.agent_id) {
            format!("agent `{}` is not registered", assignment.agent_id)
        } else if &assignment.node_id == registry.node_id()
            && !live.contains(&assignment.assignment_id)
        {
            format!(
                "node `{}` has no live runner for this assignment",
                assignment.node_id
            )
        } else {
            continue;
        };

        match fail_assignment(store, &assignment.assignment_id, ErrorCode::AgentLost, &reason) {
            Ok(outcome) => recovered.push(RecoveredAssignment {
                assignment,
                reason,
                outcome,
            }),
            // Finished between the scan and the update.
            Err(QueueError::InvalidTransition { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(recovered)
}

