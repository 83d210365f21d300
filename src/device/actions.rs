use super::adb::{AdbArtifactProbe, AdbTransport};
use super::error::TransportError;
use super::process::ProcessOutput;
use super::script::{CompletionMarker, ScriptHandoff};
use crate::orchestration::{AgentRef, StepActions, StepError};
use crate::verification::ArtifactProbe;
use serde_json::{Map, Value};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `StepActions` backed by adb and the on-device script handoff.
#[derive(Debug, Clone)]
pub struct DeviceStepActions {
    transport: AdbTransport,
    handoff: ScriptHandoff,
}

impl DeviceStepActions {
    pub fn new(transport: AdbTransport, handoff: ScriptHandoff) -> Self {
        Self { transport, handoff }
    }

    fn checked_shell(
        &self,
        agent: &AgentRef,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<ProcessOutput, TransportError> {
        let output = self.transport.shell(&agent.serial, &args, timeout)?;
        if !output.success() {
            return Err(TransportError::NonZeroExit {
                command: args.join(" "),
                exit_code: output.exit_code.unwrap_or(-1),
                stderr: first_non_empty(&output.stderr, &output.stdout),
            });
        }
        Ok(output)
    }

    fn run_command(
        &self,
        agent: &AgentRef,
        command: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let shell_args = match command {
            "shell" => {
                if args.is_empty() {
                    return Err(invalid(command, "expects a command line"));
                }
                args.to_vec()
            }
            "tap" => {
                expect_numbers(command, args, 2, 2)?;
                input("tap", args)
            }
            "swipe" => {
                expect_numbers(command, args, 4, 5)?;
                input("swipe", args)
            }
            "text" => {
                let [text] = args else {
                    return Err(invalid(command, "expects exactly one argument"));
                };
                input("text", &[text.replace(' ', "%s")])
            }
            "key" => {
                let [code] = args else {
                    return Err(invalid(command, "expects exactly one key code"));
                };
                input("keyevent", &[code.clone()])
            }
            "screencap" => {
                let [path] = args else {
                    return Err(invalid(command, "expects a device output path"));
                };
                vec!["screencap".to_string(), "-p".to_string(), path.clone()]
            }
            "push" => {
                let [local, remote] = args else {
                    return Err(invalid(command, "expects a local and a device path"));
                };
                self.transport
                    .push(&agent.serial, Path::new(local), remote, timeout)?;
                return Ok(serde_json::json!({ "command": command, "remote": remote }));
            }
            "pull" => {
                let [remote, local] = args else {
                    return Err(invalid(command, "expects a device and a local path"));
                };
                self.transport
                    .pull(&agent.serial, remote, Path::new(local), timeout)?;
                return Ok(serde_json::json!({ "command": command, "local": local }));
            }
            other => return Err(TransportError::UnsupportedCommand(other.to_string())),
        };

        let output = self.checked_shell(agent, shell_args, timeout)?;
        Ok(serde_json::json!({
            "command": command,
            "stdout": output.stdout.trim_end(),
            "exit_code": output.exit_code,
        }))
    }

    fn run_script(
        &self,
        agent: &AgentRef,
        script: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let deadline = Instant::now() + timeout;
        let remaining = |deadline: Instant| -> Result<Duration, TransportError> {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(TransportError::Timeout {
                    command: format!("scripted_action {script}"),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(left)
        };

        let files = self.handoff.prepare(&agent.agent_id, script, params)?;
        let result = (|| -> Result<Value, TransportError> {
            self.checked_shell(
                agent,
                vec!["mkdir".to_string(), "-p".to_string(), files.remote_dir.clone()],
                remaining(deadline)?,
            )?;
            self.transport.push(
                &agent.serial,
                &files.local_params,
                &files.remote_params,
                remaining(deadline)?,
            )?;
            self.checked_shell(
                agent,
                vec![
                    "sh".to_string(),
                    files.script_path.clone(),
                    files.remote_params.clone(),
                ],
                remaining(deadline)?,
            )?;

            loop {
                let output = self.transport.shell(
                    &agent.serial,
                    &["cat".to_string(), files.remote_marker.clone()],
                    remaining(deadline)?,
                )?;
                if output.success() && !output.stdout.trim().is_empty() {
                    return CompletionMarker::parse(script, &output.stdout)?.into_output(script);
                }
                thread::sleep(MARKER_POLL_INTERVAL.min(remaining(deadline)?));
            }
        })();

        let _ = self.transport.shell(
            &agent.serial,
            &["rm".to_string(), "-rf".to_string(), files.remote_dir.clone()],
            self.transport.command_timeout(),
        );
        self.handoff.cleanup(&files);
        result
    }
}

impl StepActions for DeviceStepActions {
    fn remote_command(
        &self,
        agent: &AgentRef,
        command: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value, StepError> {
        let args: Vec<String> = args.iter().map(arg_text).collect();
        Ok(self.run_command(agent, command.trim(), &args, timeout)?)
    }

    fn scripted_action(
        &self,
        agent: &AgentRef,
        script: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, StepError> {
        Ok(self.run_script(agent, script, params, timeout)?)
    }

    fn artifact_probe(&self, agent: &AgentRef) -> Box<dyn ArtifactProbe> {
        Box::new(AdbArtifactProbe::new(
            self.transport.clone(),
            agent.serial.clone(),
        ))
    }
}

fn arg_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn input(kind: &str, args: &[String]) -> Vec<String> {
    let mut out = vec!["input".to_string(), kind.to_string()];
    out.extend(args.iter().cloned());
    out
}

fn invalid(command: &str, reason: &str) -> TransportError {
    TransportError::InvalidArgs {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn expect_numbers(
    command: &str,
    args: &[String],
    min: usize,
    max: usize,
) -> Result<(), TransportError> {
    if args.len() < min || args.len() > max {
        return Err(invalid(
            command,
            &format!("expects {min}..={max} numeric arguments, got {}", args.len()),
        ));
    }
    if let Some(bad) = args.iter().find(|arg| arg.trim().parse::<f64>().is_err()) {
        return Err(invalid(command, &format!("`{bad}` is not a number")));
    }
    Ok(())
}

fn first_non_empty(primary: &str, fallback: &str) -> String {
    let primary = primary.trim();
    if primary.is_empty() {
        fallback.trim().to_string()
    } else {
        primary.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::AgentId;
    use tempfile::tempdir;

    fn actions() -> (tempfile::TempDir, DeviceStepActions) {
        let dir = tempdir().expect("tempdir");
        let actions = DeviceStepActions::new(
            AdbTransport::new("farmctl-missing-adb", Duration::from_secs(1)),
            ScriptHandoff::new(dir.path()),
        );
        (dir, actions)
    }

    fn agent() -> AgentRef {
        AgentRef {
            agent_id: AgentId::parse("local-slot01").expect("agent"),
            serial: "emulator-5554".to_string(),
        }
    }

    #[test]
    fn argument_shape_is_checked_before_the_transport_runs() {
        let (_dir, actions) = actions();
        let err = actions
            .remote_command(&agent(), "tap", &[Value::from(10)], Duration::from_secs(1))
            .expect_err("tap needs two coordinates");
        assert!(err.to_string().contains("tap"));

        let err = actions
            .remote_command(&agent(), "teleport", &[], Duration::from_secs(1))
            .expect_err("unknown command");
        assert!(err.to_string().contains("unsupported command"));
    }

    #[test]
    fn missing_transport_binary_is_a_step_failure() {
        let (_dir, actions) = actions();
        let err = actions
            .remote_command(
                &agent(),
                "tap",
                &[Value::from(10), Value::from(20)],
                Duration::from_secs(1),
            )
            .expect_err("no adb");
        assert!(matches!(err, StepError::Action(_)));
    }
}
