use super::host_worker::{load_worker_status, save_worker_status};
use super::{append_runtime_log, RuntimeError, StatePaths};
use crate::shared::logging::LogLevel;
use crate::shared::time::now_millis;
use std::fs;
use std::io::Write;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipState {
    NotRunning,
    Running { pid: u32 },
    Stale,
}

#[derive(Debug, Clone)]
pub struct StopResult {
    pub pid: u32,
    pub forced: bool,
}

pub fn worker_ownership_state(paths: &StatePaths) -> Result<OwnershipState, RuntimeError> {
    if let Some(pid) = read_lock_pid(paths)? {
        if is_process_alive(pid) {
            return Ok(OwnershipState::Running { pid });
        }
        return Ok(OwnershipState::Stale);
    }
    let status = load_worker_status(paths)?;
    if status.running {
        return Ok(OwnershipState::Stale);
    }
    Ok(OwnershipState::NotRunning)
}

pub fn cleanup_stale_worker(paths: &StatePaths) -> Result<(), RuntimeError> {
    let _ = fs::remove_file(paths.worker_lock_path());
    let _ = fs::remove_file(paths.stop_signal_path());
    let mut status = load_worker_status(paths)?;
    if status.running || status.pid.is_some() {
        status.running = false;
        status.pid = None;
        status.stopped_at = Some(now_millis());
        save_worker_status(paths, &status)?;
    }
    Ok(())
}

/// Takes the single-worker lock for this state root, recording our pid in it.
/// A stale lock left by a dead process is reclaimed once.
pub fn reserve_start_lock(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.worker_lock_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| RuntimeError::CreateDir {
            path: parent.display().to_string(),
            source,
        })?;
    }
    match worker_ownership_state(paths)? {
        OwnershipState::Running { pid } => return Err(RuntimeError::AlreadyRunning { pid }),
        OwnershipState::Stale => cleanup_stale_worker(paths)?,
        OwnershipState::NotRunning => {}
    }
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(std::process::id().to_string().as_bytes()))
        .map_err(|source| RuntimeError::WriteLock {
            path: path.display().to_string(),
            source,
        })
}

pub fn clear_start_lock(paths: &StatePaths) {
    let _ = fs::remove_file(paths.worker_lock_path());
}

pub fn signal_stop(paths: &StatePaths) -> Result<(), RuntimeError> {
    let path = paths.stop_signal_path();
    fs::write(&path, b"stop").map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

pub fn stop_signal_requested(paths: &StatePaths) -> bool {
    paths.stop_signal_path().exists()
}

/// Asks the running host worker to stop, escalating to TERM and KILL after `timeout`.
pub fn stop_active_worker(paths: &StatePaths, timeout: Duration) -> Result<StopResult, RuntimeError> {
    let pid = match worker_ownership_state(paths)? {
        OwnershipState::Running { pid } => pid,
        OwnershipState::Stale => {
            cleanup_stale_worker(paths)?;
            return Err(RuntimeError::NotRunning);
        }
        OwnershipState::NotRunning => return Err(RuntimeError::NotRunning),
    };

    signal_stop(paths)?;
    append_runtime_log(
        paths,
        LogLevel::Info,
        "worker.stop.requested",
        "stop signal written",
        crate::log_fields! { "pid" => pid },
    );

    let mut forced = false;
    if !wait_for_exit(pid, timeout) {
        send_signal(pid, "-TERM");
        if !wait_for_exit(pid, Duration::from_secs(2)) {
            forced = true;
            append_runtime_log(
                paths,
                LogLevel::Warn,
                "worker.stop.force_kill",
                "worker ignored stop signal and TERM",
                crate::log_fields! { "pid" => pid },
            );
            send_signal(pid, "-KILL");
            if !wait_for_exit(pid, Duration::from_secs(2)) {
                return Err(RuntimeError::StopFailedAlive { pid });
            }
        }
    }

    cleanup_stale_worker(paths)?;
    Ok(StopResult { pid, forced })
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while is_process_alive(pid) && start.elapsed() < timeout {
        thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}

fn read_lock_pid(paths: &StatePaths) -> Result<Option<u32>, RuntimeError> {
    let path = paths.worker_lock_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadLock {
        path: path.display().to_string(),
        source,
    })?;
    Ok(raw.trim().parse::<u32>().ok())
}

pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

fn send_signal(pid: u32, signal: &str) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg(signal)
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}
