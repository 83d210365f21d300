use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// A time field as written in documents: bare milliseconds or a suffixed string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimeValue {
    Millis(u64),
    Text(String),
}

impl TimeValue {
    pub fn resolve(&self) -> Result<Duration, String> {
        match self {
            Self::Millis(ms) => Ok(Duration::from_millis(*ms)),
            Self::Text(raw) => parse_time_field(raw),
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Self::Text(raw) if raw.contains("{{"))
    }
}

/// Parses `"1500"`, `"250ms"`, `"30s"`, `"1.5s"`, `"5m"` or `"1h"`.
pub fn parse_time_field(raw: &str) -> Result<Duration, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("time value must be non-empty".to_string());
    }
    let split = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(format!("time value `{trimmed}` must start with a number"));
    }
    let factor_ms = match unit.trim() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => {
            return Err(format!(
                "time value `{trimmed}` has unknown unit `{other}` (expected ms, s, m or h)"
            ))
        }
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("time value `{trimmed}` has an invalid number"))?;
    let millis = value * factor_ms;
    if !millis.is_finite() || millis < 0.0 {
        return Err(format!("time value `{trimmed}` is out of range"));
    }
    Ok(Duration::from_millis(millis.round() as u64))
}

pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis() as u64;
    if ms != 0 && ms % 3_600_000 == 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms != 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms != 0 && ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = TimeValue::deserialize(deserializer)?;
    value
        .resolve()
        .map_err(|err| D::Error::custom(format!("invalid duration: {err}")))
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}
