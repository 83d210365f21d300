use super::error::TransportError;
use crate::shared::logging::{append_log_event, LogLevel};
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs `binary args...` in its own process group. On timeout the whole group is killed so
/// helpers spawned by the transport do not outlive the call.
pub fn run_with_timeout(
    binary: &str,
    args: &[String],
    timeout: Duration,
) -> Result<ProcessOutput, TransportError> {
    run_with_timeout_logged(binary, args, timeout, None)
}

/// [`run_with_timeout`] that records a failed group kill in `log_path`.
pub fn run_with_timeout_logged(
    binary: &str,
    args: &[String],
    timeout: Duration,
    log_path: Option<&Path>,
) -> Result<ProcessOutput, TransportError> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransportError::MissingBinary {
                binary: binary.to_string(),
            })
        }
        Err(source) => {
            return Err(TransportError::Spawn {
                binary: binary.to_string(),
                source,
            })
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let start = Instant::now();
    let status: ExitStatus = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    if let Err(reason) = kill_process_group(child.id()) {
                        if let Some(path) = log_path {
                            append_log_event(
                                path,
                                LogLevel::Warn,
                                "transport.kill_group_failed",
                                &reason,
                                crate::log_fields! {
                                    "command" => command_form(binary, args),
                                    "pgid" => child.id(),
                                },
                            );
                        }
                    }
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(TransportError::Timeout {
                        command: command_form(binary, args),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(source) => {
                return Err(TransportError::Spawn {
                    binary: binary.to_string(),
                    source,
                })
            }
        }
    };

    Ok(ProcessOutput {
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
        exit_code: status.code(),
    })
}

/// Like [`run_with_timeout`] but maps a non-zero exit to `NonZeroExit`.
pub fn run_checked(
    binary: &str,
    args: &[String],
    timeout: Duration,
    log_path: Option<&Path>,
) -> Result<ProcessOutput, TransportError> {
    let output = run_with_timeout_logged(binary, args, timeout, log_path)?;
    if !output.success() {
        return Err(TransportError::NonZeroExit {
            command: command_form(binary, args),
            exit_code: output.exit_code.unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(pipe) = pipe {
        let _ = BufReader::new(pipe).read_to_string(&mut buf);
    }
    buf
}

pub(crate) fn command_form(binary: &str, args: &[String]) -> String {
    if args.is_empty() {
        return binary.to_string();
    }
    format!("{binary} {}", args.join(" "))
}

/// Sends KILL to the process group led by `pid`. The `--` keeps `kill` from reading the
/// negative pgid as an option.
fn kill_process_group(pid: u32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let status = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| format!("failed to run kill for pgid {pid}: {err}"))?;
        if !status.success() {
            return Err(format!("kill for pgid {pid} exited with {status}"));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let output = run_with_timeout("sh", &sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5))
            .expect("run");
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let start = Instant::now();
        let err = run_with_timeout("sh", &sh("sleep 5 & sleep 5; wait"), Duration::from_millis(100))
            .expect_err("should time out");
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn timeout_leaves_no_grandchildren_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("bg.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let log_path = dir.path().join("runtime.log");
        let err = run_with_timeout_logged("sh", &sh(&script), Duration::from_millis(300), Some(&log_path))
            .expect_err("should time out");
        assert!(matches!(err, TransportError::Timeout { .. }));

        let raw = std::fs::read_to_string(&pid_file).expect("background pid");
        let bg_pid = raw.trim().to_string();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut alive = true;
        while alive && Instant::now() < deadline {
            alive = Command::new("kill")
                .arg("-0")
                .arg(&bg_pid)
                .stderr(Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false);
            if alive {
                thread::sleep(Duration::from_millis(20));
            }
        }
        assert!(!alive, "background sleep {bg_pid} survived the timeout");
        assert!(!log_path.exists(), "group kill should succeed without a warning");
    }

    #[test]
    fn killing_a_missing_group_reports_failure() {
        let err = kill_process_group(4_000_000).expect_err("no such group");
        assert!(err.contains("4000000"));
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = run_with_timeout("farmctl-no-such-binary", &[], Duration::from_secs(1))
            .expect_err("missing");
        assert!(matches!(err, TransportError::MissingBinary { .. }));
    }

    #[test]
    fn run_checked_rejects_non_zero_exit() {
        let err = run_checked("sh", &sh("echo bad >&2; exit 1"), Duration::from_secs(5), None)
            .expect_err("non-zero");
        match err {
            TransportError::NonZeroExit { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "bad");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
