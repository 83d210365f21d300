use super::{parse_column, JobStore, StoreError};
use crate::shared::ids::JobId;
use crate::shared::time::now_millis;
use rusqlite::{params, Connection};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Submitted,
    Requeued,
}

impl JobEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Requeued => "requeued",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "submitted" => Ok(Self::Submitted),
            "requeued" => Ok(Self::Requeued),
            other => Err(format!("unknown job event `{other}`")),
        }
    }
}

/// A job entering `pending`. Consumers tail the feed by `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    pub seq: i64,
    pub job_id: JobId,
    pub kind: JobEventKind,
    pub created_at: i64,
}

/// Appends within the caller's transaction so the event commits with the status change.
pub(crate) fn append_job_event(
    conn: &Connection,
    job_id: &JobId,
    kind: JobEventKind,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO job_events (job_id, kind, created_at) VALUES (?1, ?2, ?3)",
        params![job_id.as_str(), kind.as_str(), now_millis()],
    )?;
    Ok(conn.last_insert_rowid())
}

impl JobStore {
    /// Events with `seq > cursor`, oldest first.
    pub fn job_events_after(&self, cursor: i64, limit: usize) -> Result<Vec<JobEvent>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let mut stmt = conn.prepare(
                "SELECT seq, job_id, kind, created_at FROM job_events
                 WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![cursor, limit as i64], |row| {
                Ok(JobEvent {
                    seq: row.get(0)?,
                    job_id: parse_column(1, &row.get::<_, String>(1)?, JobId::parse)?,
                    kind: parse_column(2, &row.get::<_, String>(2)?, JobEventKind::parse)?,
                    created_at: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Cursor positioned after the newest event; listeners start here.
    pub fn latest_event_seq(&self) -> Result<i64, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            Ok(conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM job_events", [], |row| {
                row.get(0)
            })?)
        })
    }
}
