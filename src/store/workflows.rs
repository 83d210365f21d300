use super::{JobStore, StoreError};
use crate::shared::ids::WorkflowId;
use crate::shared::time::now_millis;
use crate::workflow::WorkflowDefinition;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

/// A deployed workflow document, stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub version: u32,
    pub name: Option<String>,
    pub document: String,
    pub step_count: u32,
    pub deployed_at: i64,
}

impl WorkflowRecord {
    /// Re-validates the stored document.
    pub fn definition(&self) -> Result<WorkflowDefinition, StoreError> {
        WorkflowDefinition::parse(&self.document).map_err(|err| {
            StoreError::InvalidStoredWorkflow {
                workflow_id: self.workflow_id.clone(),
                version: self.version,
                reason: err.to_string(),
            }
        })
    }
}

const WORKFLOW_COLUMNS: &str = "workflow_id, version, name, document, step_count, deployed_at";

fn workflow_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRecord> {
    Ok(WorkflowRecord {
        workflow_id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        document: row.get(3)?,
        step_count: row.get(4)?,
        deployed_at: row.get(5)?,
    })
}

impl JobStore {
    /// Stores a validated document. An existing `(id, version)` pair is never overwritten.
    pub fn deploy_workflow(
        &self,
        definition: &WorkflowDefinition,
        document: &str,
    ) -> Result<WorkflowRecord, StoreError> {
        let record = WorkflowRecord {
            workflow_id: definition.id.to_string(),
            version: definition.version,
            name: Some(definition.name.clone()).filter(|name| !name.is_empty()),
            document: document.to_string(),
            step_count: definition.step_count() as u32,
            deployed_at: now_millis(),
        };
        self.write(|tx| -> Result<(), StoreError> {
            let inserted = tx.execute(
                "INSERT INTO workflows (workflow_id, version, name, document, step_count, deployed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(workflow_id, version) DO NOTHING",
                params![
                    record.workflow_id,
                    record.version,
                    record.name,
                    record.document,
                    record.step_count,
                    record.deployed_at,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::WorkflowExists {
                    workflow_id: record.workflow_id.clone(),
                    version: record.version,
                });
            }
            Ok(())
        })?;
        Ok(record)
    }

    pub fn latest_workflow(&self, workflow_id: &WorkflowId) -> Result<WorkflowRecord, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            conn.query_row(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = ?1
                     ORDER BY version DESC LIMIT 1"
                ),
                params![workflow_id.as_str()],
                workflow_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
        })
    }

    pub fn workflow_version(
        &self,
        workflow_id: &WorkflowId,
        version: u32,
    ) -> Result<WorkflowRecord, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            conn.query_row(
                &format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE workflow_id = ?1 AND version = ?2"
                ),
                params![workflow_id.as_str(), version],
                workflow_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::WorkflowVersionNotFound {
                workflow_id: workflow_id.to_string(),
                version,
            })
        })
    }

    /// All deployed versions, newest version first within each workflow id.
    pub fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, StoreError> {
        self.read(|conn| -> Result<_, StoreError> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY workflow_id ASC, version DESC"
            ))?;
            let rows = stmt.query_map([], workflow_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn load_definition(
        &self,
        workflow_id: &WorkflowId,
        version: u32,
    ) -> Result<WorkflowDefinition, StoreError> {
        self.workflow_version(workflow_id, version)?.definition()
    }
}
