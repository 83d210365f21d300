use super::ConfigError;
use crate::shared::duration::{deserialize_duration, serialize_duration};
use crate::shared::ids::NodeId;
use crate::verification::VerificationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub fleet: FleetSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetSettings {
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: u32,
    #[serde(
        default = "default_heartbeat_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub heartbeat_interval: Duration,
    #[serde(
        default = "default_online_threshold",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub online_threshold: Duration,
    #[serde(
        default = "default_offline_threshold",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub offline_threshold: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(
        default = "default_notify_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub notify_interval: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerSettings {
    #[serde(
        default = "default_step_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub step_timeout: Duration,
    #[serde(
        default = "default_run_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub run_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSettings {
    #[serde(default = "default_adb_binary")]
    pub adb_binary: String,
    #[serde(
        default = "default_command_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub command_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_dir: Option<PathBuf>,
}

fn default_node_id() -> NodeId {
    NodeId::local()
}

fn default_slot_capacity() -> u32 {
    20
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_online_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_offline_threshold() -> Duration {
    Duration::from_secs(120)
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_notify_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_adb_binary() -> String {
    "adb".to_string()
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            slot_capacity: default_slot_capacity(),
            heartbeat_interval: default_heartbeat_interval(),
            online_threshold: default_online_threshold(),
            offline_threshold: default_offline_threshold(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval: default_poll_interval(),
            notify_interval: default_notify_interval(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            step_timeout: default_step_timeout(),
            run_timeout: default_run_timeout(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            adb_binary: default_adb_binary(),
            command_timeout: default_command_timeout(),
            exchange_dir: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            database: None,
            fleet: FleetSettings::default(),
            worker: WorkerSettings::default(),
            runner: RunnerSettings::default(),
            verification: VerificationConfig::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let encoded = serde_yaml::to_string(self).map_err(|source| ConfigError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
        crate::shared::fs_atomic::atomic_write_file(path, encoded.as_bytes()).map_err(|source| {
            ConfigError::Write {
                path: path.display().to_string(),
                source,
            }
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet.slot_capacity == 0 {
            return Err(ConfigError::Settings(
                "`fleet.slot_capacity` must be greater than zero".to_string(),
            ));
        }
        if self.fleet.heartbeat_interval.is_zero() {
            return Err(ConfigError::Settings(
                "`fleet.heartbeat_interval` must be greater than zero".to_string(),
            ));
        }
        if self.fleet.offline_threshold <= self.fleet.online_threshold {
            return Err(ConfigError::Settings(
                "`fleet.offline_threshold` must be greater than `fleet.online_threshold`"
                    .to_string(),
            ));
        }
        if self.worker.max_concurrent_jobs == 0 {
            return Err(ConfigError::Settings(
                "`worker.max_concurrent_jobs` must be greater than zero".to_string(),
            ));
        }
        if self.worker.poll_interval.is_zero() || self.worker.notify_interval.is_zero() {
            return Err(ConfigError::Settings(
                "`worker.poll_interval` and `worker.notify_interval` must be greater than zero"
                    .to_string(),
            ));
        }
        if self.runner.step_timeout.is_zero() || self.runner.run_timeout.is_zero() {
            return Err(ConfigError::Settings(
                "`runner` timeouts must be greater than zero".to_string(),
            ));
        }
        if self.transport.adb_binary.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`transport.adb_binary` must be non-empty".to_string(),
            ));
        }
        self.verification.validate().map_err(ConfigError::Settings)?;
        Ok(())
    }

    pub fn database_path(&self, state_root: &Path) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| state_root.join("farm.db"))
    }

    pub fn exchange_dir(&self, state_root: &Path) -> PathBuf {
        self.transport
            .exchange_dir
            .clone()
            .unwrap_or_else(|| state_root.join("exchange"))
    }
}
