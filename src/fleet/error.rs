use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("fleet io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid slot map at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out waiting for slot map lock {path}")]
    LockTimeout { path: String },
    #[error("slot map update lost {attempts} consecutive races")]
    Contention { attempts: u32 },
    #[error("agent `{agent_id}` disappeared after its heartbeat was recorded")]
    AgentMissing { agent_id: String },
    #[error("agent `{agent_id}` belongs to node `{node_id}`")]
    ForeignAgent { agent_id: String, node_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> FleetError {
    FleetError::Io {
        path: path.display().to_string(),
        source,
    }
}
