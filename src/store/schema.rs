use super::StoreError;
use rusqlite::Connection;

/// At most one active assignment per job and per agent is enforced by partial unique indexes
/// in addition to the conditional claim update.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        workflow_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        name TEXT,
        document TEXT NOT NULL,
        step_count INTEGER NOT NULL,
        deployed_at INTEGER NOT NULL,
        PRIMARY KEY (workflow_id, version)
    );

    CREATE TABLE IF NOT EXISTS jobs (
        job_id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        workflow_version INTEGER NOT NULL,
        params TEXT NOT NULL,
        priority INTEGER NOT NULL,
        max_attempts INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        cancel_requested INTEGER NOT NULL DEFAULT 0,
        error_code TEXT,
        error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER,
        FOREIGN KEY (workflow_id, workflow_version)
            REFERENCES workflows(workflow_id, version)
    );

    CREATE TABLE IF NOT EXISTS assignments (
        assignment_id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(job_id),
        agent_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        status TEXT NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        error_code TEXT,
        error TEXT,
        assigned_at INTEGER NOT NULL,
        started_at INTEGER,
        completed_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        node_id TEXT NOT NULL,
        fingerprint TEXT NOT NULL UNIQUE,
        serial TEXT NOT NULL,
        model TEXT,
        slot INTEGER NOT NULL,
        responsive INTEGER NOT NULL,
        last_heartbeat_at INTEGER NOT NULL,
        registered_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS job_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_claim_order
        ON jobs(status, priority DESC, created_at ASC);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_active_job
        ON assignments(job_id) WHERE status IN ('assigned', 'running');
    CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_active_agent
        ON assignments(agent_id) WHERE status IN ('assigned', 'running');
    CREATE INDEX IF NOT EXISTS idx_assignments_job
        ON assignments(job_id, assigned_at);
    CREATE INDEX IF NOT EXISTS idx_agents_node
        ON agents(node_id, slot);
";

pub fn ensure_schema(connection: &Connection) -> Result<(), StoreError> {
    connection.execute_batch(SCHEMA)?;
    Ok(())
}
