#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to create runtime path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read runtime state {path}: {source}")]
    ReadState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write runtime state {path}: {source}")]
    WriteState {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host worker is already running with pid {pid}")]
    AlreadyRunning { pid: u32 },
    #[error("host worker is not running")]
    NotRunning,
    #[error("host worker pid {pid} is still alive after TERM/KILL")]
    StopFailedAlive { pid: u32 },
    #[error("device transport failed: {0}")]
    Transport(#[from] crate::device::TransportError),
    #[error("failed to read worker lock {path}: {source}")]
    ReadLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write worker lock {path}: {source}")]
    WriteLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),
    #[error(transparent)]
    Fleet(#[from] crate::fleet::FleetError),
}
