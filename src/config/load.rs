use super::{ConfigError, Settings, SETTINGS_FILE_NAME};
use std::path::Path;

/// Loads `<state_root>/farm.yaml`, falling back to defaults when the file is absent.
pub fn load_settings(state_root: &Path) -> Result<Settings, ConfigError> {
    let path = state_root.join(SETTINGS_FILE_NAME);
    let settings = if path.exists() {
        Settings::from_path(&path)?
    } else {
        Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}
