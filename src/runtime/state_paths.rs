use super::RuntimeError;
use crate::config::SETTINGS_FILE_NAME;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("logs"),
            self.root.join("fleet"),
            self.worker_dir(),
            self.root.join("exchange"),
        ]
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE_NAME)
    }

    pub fn worker_dir(&self) -> PathBuf {
        self.root.join("worker")
    }

    pub fn worker_state_path(&self) -> PathBuf {
        self.worker_dir().join("status.json")
    }

    pub fn worker_lock_path(&self) -> PathBuf {
        self.worker_dir().join("worker.lock")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.worker_dir().join("stop")
    }

    pub fn runtime_log_path(&self) -> PathBuf {
        self.root.join("logs/runtime.log")
    }

    pub fn runs_log_path(&self) -> PathBuf {
        self.root.join("logs/runs.log")
    }

    pub fn slot_map_path(&self) -> PathBuf {
        self.root.join("fleet/slots.json")
    }
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), RuntimeError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| RuntimeError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
