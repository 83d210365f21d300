//! SQLite-backed job store.
//!
//! Every operation opens its own connection so concurrent callers (threads or processes)
//! contend at the database, where conditional updates decide races. Writes run inside
//! `BEGIN IMMEDIATE` transactions.

pub mod agents;
pub mod feed;
pub mod jobs;
pub mod schema;
pub mod workflows;

pub use agents::{AgentHeartbeat, AgentRecord};
pub use feed::{JobEvent, JobEventKind};
pub use workflows::WorkflowRecord;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create job store parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
    #[error("workflow `{workflow_id}` version {version} is already deployed")]
    WorkflowExists { workflow_id: String, version: u32 },
    #[error("workflow `{workflow_id}` is not deployed")]
    WorkflowNotFound { workflow_id: String },
    #[error("workflow `{workflow_id}` version {version} is not deployed")]
    WorkflowVersionNotFound { workflow_id: String, version: u32 },
    #[error("stored workflow `{workflow_id}` version {version} no longer validates: {reason}")]
    InvalidStoredWorkflow {
        workflow_id: String,
        version: u32,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct JobStore {
    db_path: PathBuf,
}

impl JobStore {
    /// Opens (creating if needed) the database and applies the schema.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let connection = store.connect()?;
        schema::ensure_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(connection)
    }

    /// Runs `f` in an immediate write transaction, committing on `Ok`.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        let connection = self.connect()?;
        f(&connection)
    }
}

/// Maps a stored text value through a parser, surfacing failures as column conversion errors.
pub(crate) fn parse_column<T>(
    index: usize,
    raw: &str,
    parser: impl FnOnce(&str) -> Result<T, String>,
) -> rusqlite::Result<T> {
    parser(raw).map_err(|reason| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(reason)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_parent_and_schema() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("farm.db");
        let store = JobStore::open(&path).expect("open");
        assert!(path.exists());

        let tables: Vec<String> = store
            .read(|conn| -> Result<Vec<String>, StoreError> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .expect("tables");
        assert_eq!(
            tables,
            vec!["agents", "assignments", "job_events", "jobs", "workflows"]
        );
    }

    #[test]
    fn reopening_keeps_existing_schema() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("farm.db");
        JobStore::open(&path).expect("first open");
        JobStore::open(&path).expect("second open");
    }
}
