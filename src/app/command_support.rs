use crate::config::{default_state_root, load_settings as load_settings_file, Settings};
use crate::runtime::{bootstrap_state_root, StatePaths};
use crate::store::JobStore;
use chrono::{TimeZone, Utc};
use std::path::PathBuf;

/// Everything a handler needs, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub paths: StatePaths,
    pub settings: Settings,
}

impl CliContext {
    pub fn load(state_root: Option<PathBuf>) -> Result<Self, String> {
        let paths = ensure_runtime_root(state_root)?;
        let settings = load_settings_file(&paths.root).map_err(|e| e.to_string())?;
        Ok(Self { paths, settings })
    }

    pub fn open_store(&self) -> Result<JobStore, String> {
        JobStore::open(&self.settings.database_path(&self.paths.root)).map_err(|e| e.to_string())
    }
}

pub fn resolve_state_root(state_root: Option<PathBuf>) -> Result<PathBuf, String> {
    match state_root {
        Some(root) => Ok(root),
        None => default_state_root().map_err(|e| e.to_string()),
    }
}

pub fn ensure_runtime_root(state_root: Option<PathBuf>) -> Result<StatePaths, String> {
    let paths = StatePaths::new(resolve_state_root(state_root)?);
    bootstrap_state_root(&paths).map_err(|e| e.to_string())?;
    Ok(paths)
}

/// Removes `--state-root DIR` (or `--state-root=DIR`) from anywhere in `args`.
pub fn split_state_root(args: Vec<String>) -> Result<(Option<PathBuf>, Vec<String>), String> {
    let mut root = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--state-root" {
            let value = iter
                .next()
                .ok_or_else(|| "--state-root requires a directory".to_string())?;
            root = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--state-root=") {
            root = Some(PathBuf::from(value));
        } else {
            rest.push(arg);
        }
    }
    Ok((root, rest))
}

/// Pulls the value of a single-use `--name value` flag out of `args`.
pub fn take_flag(args: &mut Vec<String>, name: &str) -> Result<Option<String>, String> {
    let values = take_repeated_flag(args, name)?;
    if values.len() > 1 {
        return Err(format!("`{name}` may only be given once"));
    }
    Ok(values.into_iter().next())
}

pub fn take_repeated_flag(args: &mut Vec<String>, name: &str) -> Result<Vec<String>, String> {
    let mut values = Vec::new();
    let mut index = 0;
    while index < args.len() {
        if args[index] == name {
            if index + 1 >= args.len() {
                return Err(format!("`{name}` requires a value"));
            }
            values.push(args.remove(index + 1));
            args.remove(index);
        } else {
            index += 1;
        }
    }
    Ok(values)
}

pub fn reject_unknown_flags(args: &[String]) -> Result<(), String> {
    match args.iter().find(|arg| arg.starts_with("--")) {
        Some(flag) => Err(format!("unknown flag `{flag}`")),
        None => Ok(()),
    }
}

pub fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("`{name}` expects a number, got `{raw}`"))
}

pub fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|at| at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

pub fn format_optional_millis(millis: Option<i64>) -> String {
    millis.map(format_millis).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn state_root_is_extracted_from_any_position() {
        let (root, rest) =
            split_state_root(strings(&["job", "--state-root", "/tmp/x", "list"])).expect("split");
        assert_eq!(root, Some(PathBuf::from("/tmp/x")));
        assert_eq!(rest, strings(&["job", "list"]));

        let (root, _) = split_state_root(strings(&["--state-root=/srv/farm", "setup"])).expect("split");
        assert_eq!(root, Some(PathBuf::from("/srv/farm")));
    }

    #[test]
    fn repeated_flags_are_collected_in_order() {
        let mut args = strings(&["wf", "--param", "a=1", "--priority", "high", "--param", "b=2"]);
        assert_eq!(
            take_repeated_flag(&mut args, "--param").expect("params"),
            strings(&["a=1", "b=2"])
        );
        assert_eq!(take_flag(&mut args, "--priority").expect("priority"), Some("high".to_string()));
        assert_eq!(args, strings(&["wf"]));
    }

    #[test]
    fn flag_without_value_is_rejected() {
        let mut args = strings(&["--attempts"]);
        assert!(take_flag(&mut args, "--attempts").is_err());
    }

    #[test]
    fn millis_render_as_rfc3339() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_optional_millis(None), "none");
    }
}
