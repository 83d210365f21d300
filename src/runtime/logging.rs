use super::StatePaths;
use crate::shared::logging::{append_log_event, LogLevel};
use serde_json::{Map, Value};

pub fn append_runtime_log(
    paths: &StatePaths,
    level: LogLevel,
    event: &str,
    message: &str,
    fields: Map<String, Value>,
) {
    append_log_event(&paths.runtime_log_path(), level, event, message, fields);
}
