pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::load_settings;
pub use paths::{default_state_root, GLOBAL_STATE_DIR, SETTINGS_FILE_NAME, STATE_ROOT_ENV};
pub use settings::{FleetSettings, RunnerSettings, Settings, TransportSettings, WorkerSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let settings = load_settings(dir.path()).expect("defaults");
        assert_eq!(settings.node_id.as_str(), "local");
        assert_eq!(settings.fleet.slot_capacity, 20);
        assert_eq!(settings.worker.max_concurrent_jobs, 4);
        assert_eq!(settings.database_path(dir.path()), dir.path().join("farm.db"));
    }

    #[test]
    fn durations_accept_suffixed_and_bare_values() {
        let settings: Settings = serde_yaml::from_str(
            r#"
node_id: host-07
fleet:
  slot_capacity: 8
  heartbeat_interval: 2s
  online_threshold: 15000
  offline_threshold: 1m
worker:
  poll_interval: 500ms
verification:
  stable_polls: 4
"#,
        )
        .expect("parse settings");
        assert_eq!(settings.node_id.as_str(), "host-07");
        assert_eq!(settings.fleet.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(settings.fleet.online_threshold, Duration::from_secs(15));
        assert_eq!(settings.fleet.offline_threshold, Duration::from_secs(60));
        assert_eq!(settings.worker.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.verification.stable_polls, 4);
        settings.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_inverted_liveness_thresholds() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "fleet:\n  online_threshold: 2m\n  offline_threshold: 1m\n",
        )
        .expect("write settings");
        let err = load_settings(dir.path()).expect_err("must reject");
        assert!(err.to_string().contains("offline_threshold"));
    }

    #[test]
    fn save_round_trips_through_yaml() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let mut settings = Settings::default();
        settings.fleet.slot_capacity = 5;
        settings.save(&path).expect("save");
        let loaded = Settings::from_path(&path).expect("load");
        assert_eq!(loaded.fleet.slot_capacity, 5);
        assert_eq!(loaded.runner.run_timeout, Duration::from_secs(1800));
    }
}
