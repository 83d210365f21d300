use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".farmctl";
pub const SETTINGS_FILE_NAME: &str = "farm.yaml";
pub const STATE_ROOT_ENV: &str = "FARMCTL_HOME";

/// `$FARMCTL_HOME` when set, else `$HOME/.farmctl`.
pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    if let Some(root) = std::env::var_os(STATE_ROOT_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(GLOBAL_STATE_DIR))
}
