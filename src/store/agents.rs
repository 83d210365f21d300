use super::{parse_column, JobStore, StoreError};
use crate::shared::ids::{AgentId, AssignmentId, NodeId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub node_id: NodeId,
    pub fingerprint: String,
    pub serial: String,
    pub model: Option<String>,
    pub slot: u32,
    pub responsive: bool,
    pub last_heartbeat_at: i64,
    pub registered_at: i64,
    pub current_assignment: Option<AssignmentId>,
}

const AGENT_SELECT: &str = "
    SELECT a.agent_id, a.node_id, a.fingerprint, a.serial, a.model, a.slot, a.responsive,
           a.last_heartbeat_at, a.registered_at,
           (SELECT s.assignment_id FROM assignments s
             WHERE s.agent_id = a.agent_id AND s.status IN ('assigned', 'running'))
      FROM agents a";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentRecord> {
    let current: Option<String> = row.get(9)?;
    Ok(AgentRecord {
        agent_id: parse_column(0, &row.get::<_, String>(0)?, AgentId::parse)?,
        node_id: parse_column(1, &row.get::<_, String>(1)?, NodeId::parse)?,
        fingerprint: row.get(2)?,
        serial: row.get(3)?,
        model: row.get(4)?,
        slot: row.get(5)?,
        responsive: row.get(6)?,
        last_heartbeat_at: row.get(7)?,
        registered_at: row.get(8)?,
        current_assignment: current
            .map(|raw| parse_column(9, &raw, AssignmentId::parse))
            .transpose()?,
    })
}

pub(crate) fn load_agent(conn: &Connection, agent_id: &str) -> rusqlite::Result<Option<AgentRecord>> {
    conn.query_row(
        &format!("{AGENT_SELECT} WHERE a.agent_id = ?1"),
        params![agent_id],
        agent_from_row,
    )
    .optional()
}

/// One heartbeat observation for an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHeartbeat {
    pub agent_id: AgentId,
    pub node_id: NodeId,
    pub fingerprint: String,
    pub serial: String,
    pub model: Option<String>,
    pub slot: u32,
    pub responsive: bool,
    pub observed_at: i64,
}

impl JobStore {
    pub fn get_agent(&self, agent_id: &AgentId) -> Result<Option<AgentRecord>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> { Ok(load_agent(conn, agent_id.as_str())?) })
    }

    pub fn agent_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<AgentRecord>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            Ok(conn
                .query_row(
                    &format!("{AGENT_SELECT} WHERE a.fingerprint = ?1"),
                    params![fingerprint],
                    agent_from_row,
                )
                .optional()?)
        })
    }

    /// Inserts the agent on first sight, otherwise refreshes its liveness fields.
    /// Returns `true` when the row was created.
    pub fn record_heartbeat(&self, heartbeat: &AgentHeartbeat) -> Result<bool, StoreError> {
        self.write(|tx| -> Result<bool, StoreError> {
            let existed = tx
                .query_row(
                    "SELECT 1 FROM agents WHERE agent_id = ?1",
                    params![heartbeat.agent_id.as_str()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            tx.execute(
                "INSERT INTO agents (
                    agent_id, node_id, fingerprint, serial, model, slot, responsive,
                    last_heartbeat_at, registered_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    node_id = excluded.node_id,
                    serial = excluded.serial,
                    model = excluded.model,
                    slot = excluded.slot,
                    responsive = excluded.responsive,
                    last_heartbeat_at = MAX(agents.last_heartbeat_at, excluded.last_heartbeat_at)",
                params![
                    heartbeat.agent_id.as_str(),
                    heartbeat.node_id.as_str(),
                    heartbeat.fingerprint,
                    heartbeat.serial,
                    heartbeat.model,
                    heartbeat.slot,
                    heartbeat.responsive,
                    heartbeat.observed_at,
                ],
            )?;
            Ok(!existed)
        })
    }

    /// Flags this node's agents that were not in the latest discovery as non-responsive.
    pub fn mark_unresponsive_except(
        &self,
        node_id: &NodeId,
        seen: &[AgentId],
    ) -> Result<usize, StoreError> {
        self.write(|tx| -> Result<usize, StoreError> {
            let mut stmt =
                tx.prepare("SELECT agent_id FROM agents WHERE node_id = ?1 AND responsive = 1")?;
            let ids = stmt
                .query_map(params![node_id.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut changed = 0;
            for id in ids.iter().filter(|id| !seen.iter().any(|s| s.as_str() == id.as_str())) {
                changed += tx.execute(
                    "UPDATE agents SET responsive = 0 WHERE agent_id = ?1",
                    params![id],
                )?;
            }
            Ok(changed)
        })
    }

    /// Deletes the agent unless it holds an active assignment. Returns `false` when nothing
    /// was deleted.
    pub fn remove_idle_agent(&self, agent_id: &AgentId) -> Result<bool, StoreError> {
        self.write(|tx| -> Result<bool, StoreError> {
            let removed = tx.execute(
                "DELETE FROM agents
                  WHERE agent_id = ?1
                    AND NOT EXISTS (
                        SELECT 1 FROM assignments
                         WHERE agent_id = ?1 AND status IN ('assigned', 'running'))",
                params![agent_id.as_str()],
            )?;
            Ok(removed == 1)
        })
    }

    /// All agents, optionally limited to one node, ordered by node then slot.
    pub fn list_agents(&self, node_id: Option<&NodeId>) -> Result<Vec<AgentRecord>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let mut stmt = conn.prepare(&format!(
                "{AGENT_SELECT} WHERE (?1 IS NULL OR a.node_id = ?1) ORDER BY a.node_id, a.slot"
            ))?;
            let rows = stmt.query_map(params![node_id.map(|n| n.as_str())], agent_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
