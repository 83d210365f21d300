use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value.len() > 128 {
        return Err(format!("{kind} must be at most 128 characters"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-' or '_'"
    ))
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                validate_identifier_value($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(|err| {
                    D::Error::custom(format!("invalid {} `{}`: {}", $kind, raw, err))
                })
            }
        }
    };
}

define_id_type!(WorkflowId, "workflow id");
define_id_type!(StepId, "step id");
define_id_type!(AgentId, "agent id");
define_id_type!(NodeId, "node id");
define_id_type!(JobId, "job id");
define_id_type!(AssignmentId, "assignment id");

/// Time-ordered id of the form `{prefix}-{base36 millis}-{4 random base36 chars}`.
pub fn generate_compact_id(prefix: &str) -> String {
    let millis = super::time::now_millis().max(0) as u64;
    let mut bytes = [0_u8; 4];
    let suffix = if getrandom::getrandom(&mut bytes).is_ok() {
        bytes
            .iter()
            .map(|b| base36_digit(u64::from(*b) % 36))
            .collect::<String>()
    } else {
        let nanos = super::time::now_nanos();
        to_base36(nanos % (36 * 36 * 36 * 36))
    };
    format!("{prefix}-{}-{suffix}", to_base36(millis))
}

fn base36_digit(value: u64) -> char {
    char::from_digit(value as u32, 36).unwrap_or('0')
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(base36_digit(value % 36));
        value /= 36;
    }
    digits.iter().rev().collect()
}

impl JobId {
    pub fn generate() -> Self {
        Self(generate_compact_id("job"))
    }
}

impl AssignmentId {
    pub fn generate() -> Self {
        Self(generate_compact_id("asg"))
    }
}

impl NodeId {
    pub fn local() -> Self {
        Self("local".to_string())
    }
}

impl AgentId {
    /// Stable agent identity derived from the owning node and its allocated slot.
    pub fn for_slot(node: &NodeId, slot: u32) -> Self {
        Self(format!("{}-slot{:02}", node.as_str(), slot))
    }
}
