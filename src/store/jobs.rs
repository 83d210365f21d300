use super::{parse_column, JobStore, StoreError};
use crate::orchestration::ErrorCode;
use crate::queue::{Assignment, AssignmentStatus, Job, JobStatus, Priority};
use crate::shared::ids::{AgentId, AssignmentId, JobId, NodeId, WorkflowId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

pub(crate) const JOB_COLUMNS: &str = "job_id, workflow_id, workflow_version, params, priority, \
     max_attempts, attempts, status, cancel_requested, error_code, error, created_at, \
     updated_at, completed_at";

pub(crate) const ASSIGNMENT_COLUMNS: &str = "assignment_id, job_id, agent_id, node_id, attempt, \
     status, progress, error_code, error, assigned_at, started_at, completed_at";

fn optional_code(index: usize, raw: Option<String>) -> rusqlite::Result<Option<ErrorCode>> {
    raw.map(|raw| parse_column(index, &raw, ErrorCode::parse))
        .transpose()
}

pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let params_raw: String = row.get(3)?;
    let params: Map<String, Value> = parse_column(3, &params_raw, |raw| {
        serde_json::from_str(raw).map_err(|err| err.to_string())
    })?;
    Ok(Job {
        job_id: parse_column(0, &row.get::<_, String>(0)?, JobId::parse)?,
        workflow_id: parse_column(1, &row.get::<_, String>(1)?, WorkflowId::parse)?,
        workflow_version: row.get(2)?,
        params,
        priority: Priority::from_rank(row.get(4)?).map_err(|reason| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Integer,
                Box::new(std::io::Error::other(reason)),
            )
        })?,
        max_attempts: row.get(5)?,
        attempts: row.get(6)?,
        status: parse_column(7, &row.get::<_, String>(7)?, JobStatus::parse)?,
        cancel_requested: row.get(8)?,
        error_code: optional_code(9, row.get(9)?)?,
        error: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

pub(crate) fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        assignment_id: parse_column(0, &row.get::<_, String>(0)?, AssignmentId::parse)?,
        job_id: parse_column(1, &row.get::<_, String>(1)?, JobId::parse)?,
        agent_id: parse_column(2, &row.get::<_, String>(2)?, AgentId::parse)?,
        node_id: parse_column(3, &row.get::<_, String>(3)?, NodeId::parse)?,
        attempt: row.get(4)?,
        status: parse_column(5, &row.get::<_, String>(5)?, AssignmentStatus::parse)?,
        progress: row.get(6)?,
        error_code: optional_code(7, row.get(7)?)?,
        error: row.get(8)?,
        assigned_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

pub(crate) fn load_job(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1"),
        params![job_id],
        job_from_row,
    )
    .optional()
}

pub(crate) fn load_assignment(
    conn: &Connection,
    assignment_id: &str,
) -> rusqlite::Result<Option<Assignment>> {
    conn.query_row(
        &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE assignment_id = ?1"),
        params![assignment_id],
        assignment_from_row,
    )
    .optional()
}

pub(crate) fn load_active_assignment(
    conn: &Connection,
    job_id: &str,
) -> rusqlite::Result<Option<Assignment>> {
    conn.query_row(
        &format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
             WHERE job_id = ?1 AND status IN ('assigned', 'running')"
        ),
        params![job_id],
        assignment_from_row,
    )
    .optional()
}

impl JobStore {
    pub fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> { Ok(load_job(conn, job_id.as_str())?) })
    }

    /// Newest first.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let limit = limit.min(i64::MAX as usize) as i64;
            let jobs = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(params![status.as_str(), limit], job_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                    ))?;
                    let rows = stmt.query_map(params![limit], job_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(jobs)
        })
    }

    pub fn get_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> Result<Option<Assignment>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            Ok(load_assignment(conn, assignment_id.as_str())?)
        })
    }

    pub fn active_assignment_for_job(
        &self,
        job_id: &JobId,
    ) -> Result<Option<Assignment>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            Ok(load_active_assignment(conn, job_id.as_str())?)
        })
    }

    /// Every attempt of a job, oldest first.
    pub fn assignments_for_job(&self, job_id: &JobId) -> Result<Vec<Assignment>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE job_id = ?1
                 ORDER BY attempt ASC, assigned_at ASC"
            ))?;
            let rows = stmt.query_map(params![job_id.as_str()], assignment_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Active assignments, optionally limited to one node.
    pub fn active_assignments(
        &self,
        node_id: Option<&NodeId>,
    ) -> Result<Vec<Assignment>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                 WHERE status IN ('assigned', 'running') AND (?1 IS NULL OR node_id = ?1)
                 ORDER BY assigned_at ASC"
            ))?;
            let rows = stmt.query_map(
                params![node_id.map(|node| node.as_str())],
                assignment_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}
