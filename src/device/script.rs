//! Parameter handoff for on-device scripts.
//!
//! The host writes `params.json` into a per-run exchange directory and pushes it to the device.
//! The script reads it, does its work and writes a completion marker, a small JSON document
//! with `status` plus either `artifact`/`output` or `message`.

use super::error::{io_error, TransportError};
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::ids::{generate_compact_id, AgentId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const REMOTE_EXCHANGE_DIR: &str = "/data/local/tmp/farmctl";
pub const REMOTE_SCRIPT_DIR: &str = "/data/local/tmp/farmctl/scripts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffFiles {
    pub token: String,
    pub local_dir: PathBuf,
    pub local_params: PathBuf,
    pub remote_dir: String,
    pub remote_params: String,
    pub remote_marker: String,
    pub script_path: String,
}

#[derive(Debug, Serialize)]
struct HandoffPayload<'a> {
    token: &'a str,
    agent_id: &'a str,
    script: &'a str,
    marker: &'a str,
    params: &'a Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletionMarker {
    pub status: MarkerStatus,
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Value,
}

impl CompletionMarker {
    pub fn parse(script: &str, raw: &str) -> Result<Self, TransportError> {
        serde_json::from_str(raw.trim()).map_err(|err| TransportError::ScriptFailed {
            script: script.to_string(),
            message: format!("unreadable completion marker: {err}"),
        })
    }

    pub fn into_output(self, script: &str) -> Result<Value, TransportError> {
        match self.status {
            MarkerStatus::Ok => Ok(serde_json::json!({
                "artifact": self.artifact,
                "output": self.output,
            })),
            MarkerStatus::Error => Err(TransportError::ScriptFailed {
                script: script.to_string(),
                message: self
                    .message
                    .unwrap_or_else(|| "script reported an error".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptHandoff {
    exchange_dir: PathBuf,
}

impl ScriptHandoff {
    pub fn new(exchange_dir: impl Into<PathBuf>) -> Self {
        Self {
            exchange_dir: exchange_dir.into(),
        }
    }

    pub fn exchange_dir(&self) -> &Path {
        &self.exchange_dir
    }

    /// Writes the local parameter file for one scripted action.
    pub fn prepare(
        &self,
        agent: &AgentId,
        script: &str,
        params: &Map<String, Value>,
    ) -> Result<HandoffFiles, TransportError> {
        let script_path = resolve_script_path(script)?;
        let token = generate_compact_id("run");
        let local_dir = self.exchange_dir.join(agent.as_str()).join(&token);
        fs::create_dir_all(&local_dir).map_err(|e| io_error(&local_dir, e))?;
        let remote_dir = format!("{REMOTE_EXCHANGE_DIR}/{token}");
        let files = HandoffFiles {
            local_params: local_dir.join("params.json"),
            remote_params: format!("{remote_dir}/params.json"),
            remote_marker: format!("{remote_dir}/done.json"),
            local_dir,
            remote_dir,
            script_path,
            token,
        };
        let payload = HandoffPayload {
            token: &files.token,
            agent_id: agent.as_str(),
            script,
            marker: &files.remote_marker,
            params,
        };
        atomic_write_json(&files.local_params, &payload)
            .map_err(|e| io_error(&files.local_params, e))?;
        Ok(files)
    }

    pub fn cleanup(&self, files: &HandoffFiles) {
        let _ = fs::remove_dir_all(&files.local_dir);
    }
}

/// Bare names resolve under the device script directory; absolute paths are used as given.
fn resolve_script_path(script: &str) -> Result<String, TransportError> {
    let script = script.trim();
    let invalid = |reason: &str| TransportError::InvalidArgs {
        command: "scripted_action".to_string(),
        reason: format!("script `{script}` {reason}"),
    };
    if script.is_empty() {
        return Err(invalid("is empty"));
    }
    if script.split('/').any(|part| part == "..") {
        return Err(invalid("must not contain `..`"));
    }
    if script.starts_with('/') {
        return Ok(script.to_string());
    }
    if script.contains('/') {
        return Err(invalid("must be a bare name or an absolute path"));
    }
    if script.ends_with(".sh") {
        Ok(format!("{REMOTE_SCRIPT_DIR}/{script}"))
    } else {
        Ok(format!("{REMOTE_SCRIPT_DIR}/{script}.sh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prepare_writes_params_file_with_marker_location() {
        let dir = tempdir().expect("tempdir");
        let handoff = ScriptHandoff::new(dir.path());
        let agent = AgentId::parse("host-01-slot01").expect("agent");
        let mut params = Map::new();
        params.insert("account".to_string(), Value::from("alice"));

        let files = handoff.prepare(&agent, "post_story", &params).expect("prepare");
        assert_eq!(files.script_path, "/data/local/tmp/farmctl/scripts/post_story.sh");
        assert!(files.remote_marker.ends_with("/done.json"));

        let raw = fs::read_to_string(&files.local_params).expect("read params");
        let payload: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(payload["params"]["account"], "alice");
        assert_eq!(payload["marker"], files.remote_marker.as_str());

        handoff.cleanup(&files);
        assert!(!files.local_dir.exists());
    }

    #[test]
    fn script_paths_reject_traversal() {
        assert!(resolve_script_path("../evil").is_err());
        assert!(resolve_script_path("dir/name").is_err());
        assert_eq!(
            resolve_script_path("/sdcard/run.sh").expect("absolute"),
            "/sdcard/run.sh"
        );
    }

    #[test]
    fn marker_status_maps_to_output_or_failure() {
        let ok = CompletionMarker::parse("s", r#"{"status":"ok","artifact":"/sdcard/a.png"}"#)
            .expect("parse");
        let output = ok.into_output("s").expect("ok");
        assert_eq!(output["artifact"], "/sdcard/a.png");

        let failed = CompletionMarker::parse("s", r#"{"status":"error","message":"login wall"}"#)
            .expect("parse");
        let err = failed.into_output("s").expect_err("error");
        assert!(err.to_string().contains("login wall"));
    }
}
