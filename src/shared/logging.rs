use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Appends one JSON object per line. Failures are swallowed so logging never fails a caller.
pub fn append_log_event(
    path: &Path,
    level: LogLevel,
    event: &str,
    message: &str,
    fields: Map<String, Value>,
) {
    let mut payload = serde_json::json!({
        "timestamp": super::time::now_millis(),
        "level": level.as_str(),
        "event": event,
        "message": message,
    });
    if !fields.is_empty() {
        payload["fields"] = Value::Object(fields);
    }

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

#[macro_export]
macro_rules! log_fields {
    () => { serde_json::Map::new() };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut fields = serde_json::Map::new();
        $(fields.insert($key.to_string(), serde_json::json!($value));)+
        fields
    }};
}
