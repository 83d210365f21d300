use crate::app::command_support::{ensure_runtime_root, CliContext};
use crate::config::Settings;
use std::path::PathBuf;

/// Creates the state layout, a default `farm.yaml` when none exists, and the job store schema.
pub fn cmd_setup(state_root: Option<PathBuf>) -> Result<String, String> {
    let paths = ensure_runtime_root(state_root)?;
    let settings_path = paths.settings_file();
    let created = !settings_path.exists();
    if created {
        Settings::default()
            .save(&settings_path)
            .map_err(|e| e.to_string())?;
    }
    let context = CliContext::load(Some(paths.root.clone()))?;
    let store = context.open_store()?;
    Ok(format!(
        "setup complete\nstate_root={}\nsettings={}\nsettings_created={}\ndatabase={}\nnode_id={}",
        paths.root.display(),
        settings_path.display(),
        created,
        store.path().display(),
        context.settings.node_id
    ))
}
