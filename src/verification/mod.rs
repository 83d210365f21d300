//! Proves a produced artifact is fully written before a ready signal goes out.
//!
//! Stage one polls quickly until the file exists with a non-zero size. Stage two polls more
//! slowly until the size is unchanged across `stable_polls` consecutive polls. Stage three
//! re-reads the size immediately before the signal and rejects the artifact if it moved or
//! vanished.

pub mod probe;

pub use probe::{ArtifactProbe, LocalFsProbe};

use crate::shared::duration::{deserialize_duration, serialize_duration};
use crate::shared::fs_atomic::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VerificationConfig {
    #[serde(
        default = "default_existence_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub existence_poll_interval: Duration,
    #[serde(
        default = "default_existence_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub existence_timeout: Duration,
    #[serde(
        default = "default_stability_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub stability_poll_interval: Duration,
    #[serde(
        default = "default_stability_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub stability_timeout: Duration,
    #[serde(default = "default_stable_polls")]
    pub stable_polls: u32,
}

fn default_existence_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_existence_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_stability_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_stability_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_stable_polls() -> u32 {
    3
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            existence_poll_interval: default_existence_poll_interval(),
            existence_timeout: default_existence_timeout(),
            stability_poll_interval: default_stability_poll_interval(),
            stability_timeout: default_stability_timeout(),
            stable_polls: default_stable_polls(),
        }
    }
}

impl VerificationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.existence_poll_interval.is_zero() || self.stability_poll_interval.is_zero() {
            return Err("verification poll intervals must be greater than zero".to_string());
        }
        if self.existence_timeout < self.existence_poll_interval {
            return Err(
                "`verification.existence_timeout` must be at least one poll interval".to_string(),
            );
        }
        if self.stability_timeout < self.stability_poll_interval {
            return Err(
                "`verification.stability_timeout` must be at least one poll interval".to_string(),
            );
        }
        if self.stable_polls == 0 {
            return Err("`verification.stable_polls` must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    Existence,
    Stability,
    FinalCheck,
    Signal,
}

impl VerificationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Existence => "existence",
            Self::Stability => "stability",
            Self::FinalCheck => "final_check",
            Self::Signal => "signal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: VerificationStage,
    pub ok: bool,
    pub elapsed_ms: u64,
    pub polls: u32,
    pub size: Option<u64>,
    pub detail: Option<String>,
}

/// Ready-signal payload. Records every stage that ran, including the failing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub path: String,
    pub ready: bool,
    pub stages: Vec<StageReport>,
    pub failed_stage: Option<VerificationStage>,
    pub final_size: Option<u64>,
    pub total_elapsed_ms: u64,
}

impl VerificationReport {
    pub fn stage(&self, stage: VerificationStage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn summary(&self) -> String {
        if self.ready {
            return format!(
                "artifact `{}` ready with {} bytes after {}ms",
                self.path,
                self.final_size.unwrap_or_default(),
                self.total_elapsed_ms
            );
        }
        let failed = self
            .failed_stage
            .and_then(|stage| self.stage(stage))
            .map(|s| {
                format!(
                    "stage `{}` failed after {}ms: {}",
                    s.stage.as_str(),
                    s.elapsed_ms,
                    s.detail.as_deref().unwrap_or("no detail")
                )
            })
            .unwrap_or_else(|| "unknown stage failed".to_string());
        format!("artifact `{}` not ready: {failed}", self.path)
    }
}

fn stopped(stop: Option<&AtomicBool>) -> bool {
    stop.is_some_and(|flag| flag.load(Ordering::SeqCst))
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

struct Poll {
    polls: u32,
    last_error: Option<String>,
}

impl Poll {
    fn read(&mut self, probe: &dyn ArtifactProbe, path: &str) -> Option<u64> {
        self.polls += 1;
        match probe.size_of(path) {
            Ok(size) => size,
            Err(err) => {
                self.last_error = Some(err.to_string());
                None
            }
        }
    }
}

fn existence_stage(
    probe: &dyn ArtifactProbe,
    path: &str,
    config: &VerificationConfig,
    stop: Option<&AtomicBool>,
) -> StageReport {
    let started = Instant::now();
    let mut poll = Poll {
        polls: 0,
        last_error: None,
    };
    let mut last_seen = None;
    loop {
        let size = poll.read(probe, path);
        if let Some(size) = size.filter(|s| *s > 0) {
            return StageReport {
                stage: VerificationStage::Existence,
                ok: true,
                elapsed_ms: elapsed_ms(started),
                polls: poll.polls,
                size: Some(size),
                detail: None,
            };
        }
        last_seen = size.or(last_seen);
        let detail = if stopped(stop) {
            Some("aborted".to_string())
        } else if started.elapsed() >= config.existence_timeout {
            Some(match (last_seen, &poll.last_error) {
                (Some(_), _) => "artifact stayed empty".to_string(),
                (None, Some(err)) => format!("artifact never appeared: {err}"),
                (None, None) => "artifact never appeared".to_string(),
            })
        } else {
            None
        };
        if detail.is_some() {
            return StageReport {
                stage: VerificationStage::Existence,
                ok: false,
                elapsed_ms: elapsed_ms(started),
                polls: poll.polls,
                size: last_seen,
                detail,
            };
        }
        let remaining = config.existence_timeout.saturating_sub(started.elapsed());
        thread::sleep(config.existence_poll_interval.min(remaining));
    }
}

fn stability_stage(
    probe: &dyn ArtifactProbe,
    path: &str,
    config: &VerificationConfig,
    initial_size: u64,
    stop: Option<&AtomicBool>,
) -> StageReport {
    let started = Instant::now();
    let mut poll = Poll {
        polls: 0,
        last_error: None,
    };
    let mut last = initial_size;
    let mut matching = 0_u32;
    loop {
        let failure = if stopped(stop) {
            Some("aborted".to_string())
        } else if started.elapsed() >= config.stability_timeout {
            Some(format!(
                "size did not hold for {} consecutive polls (last {} bytes)",
                config.stable_polls, last
            ))
        } else {
            None
        };
        if failure.is_some() {
            return StageReport {
                stage: VerificationStage::Stability,
                ok: false,
                elapsed_ms: elapsed_ms(started),
                polls: poll.polls,
                size: Some(last),
                detail: failure,
            };
        }

        thread::sleep(config.stability_poll_interval);
        match poll.read(probe, path) {
            Some(size) if size > 0 && size == last => matching += 1,
            Some(size) => {
                last = size;
                matching = 0;
            }
            None => {
                last = 0;
                matching = 0;
            }
        }
        if last > 0 && matching >= config.stable_polls {
            return StageReport {
                stage: VerificationStage::Stability,
                ok: true,
                elapsed_ms: elapsed_ms(started),
                polls: poll.polls,
                size: Some(last),
                detail: None,
            };
        }
    }
}

fn final_check(probe: &dyn ArtifactProbe, path: &str, stable_size: u64) -> StageReport {
    let started = Instant::now();
    let (ok, size, detail) = match probe.size_of(path) {
        Ok(Some(size)) if size == stable_size => (true, Some(size), None),
        Ok(Some(size)) => (
            false,
            Some(size),
            Some(format!("size changed from {stable_size} to {size} bytes")),
        ),
        Ok(None) => (false, None, Some("artifact vanished".to_string())),
        Err(err) => (false, None, Some(format!("final read failed: {err}"))),
    };
    StageReport {
        stage: VerificationStage::FinalCheck,
        ok,
        elapsed_ms: elapsed_ms(started),
        polls: 1,
        size,
        detail,
    }
}

/// Runs all three stages without writing a ready marker.
pub fn verify_artifact(
    probe: &dyn ArtifactProbe,
    path: &str,
    config: &VerificationConfig,
    stop: Option<&AtomicBool>,
) -> VerificationReport {
    verify_and_signal(probe, path, config, None, stop)
}

/// Runs all three stages and, when `marker` is given, writes the report there as the ready
/// signal right after the final size check. The marker is written on failure too, with
/// `ready: false`.
pub fn verify_and_signal(
    probe: &dyn ArtifactProbe,
    path: &str,
    config: &VerificationConfig,
    marker: Option<&Path>,
    stop: Option<&AtomicBool>,
) -> VerificationReport {
    let started = Instant::now();
    let mut report = VerificationReport {
        path: path.to_string(),
        ready: false,
        stages: Vec::with_capacity(3),
        failed_stage: None,
        final_size: None,
        total_elapsed_ms: 0,
    };

    let existence = existence_stage(probe, path, config, stop);
    let mut next_size = existence.size.filter(|_| existence.ok);
    report.stages.push(existence);

    if let Some(size) = next_size.take() {
        let stability = stability_stage(probe, path, config, size, stop);
        next_size = stability.size.filter(|_| stability.ok);
        report.stages.push(stability);
    }

    if let Some(stable_size) = next_size {
        let check = final_check(probe, path, stable_size);
        report.ready = check.ok;
        report.final_size = check.size;
        report.stages.push(check);
    }

    report.failed_stage = report.stages.iter().find(|s| !s.ok).map(|s| s.stage);
    report.total_elapsed_ms = elapsed_ms(started);

    if let Some(marker) = marker {
        if let Err(err) = write_marker(marker, &report) {
            report.ready = false;
            report.failed_stage = Some(VerificationStage::Signal);
            report.stages.push(StageReport {
                stage: VerificationStage::Signal,
                ok: false,
                elapsed_ms: 0,
                polls: 0,
                size: report.final_size,
                detail: Some(format!("failed to write ready marker: {err}")),
            });
        }
    }
    report
}

fn write_marker(marker: &Path, report: &VerificationReport) -> std::io::Result<()> {
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    atomic_write_json(marker, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;

    /// Replays scripted sizes; repeats the last one when the script runs out.
    struct ScriptedProbe {
        sizes: RefCell<VecDeque<Option<u64>>>,
        last: RefCell<Option<u64>>,
    }

    impl ScriptedProbe {
        fn new(sizes: &[Option<u64>]) -> Self {
            Self {
                sizes: RefCell::new(sizes.iter().copied().collect()),
                last: RefCell::new(None),
            }
        }
    }

    impl ArtifactProbe for ScriptedProbe {
        fn size_of(&self, _path: &str) -> io::Result<Option<u64>> {
            if let Some(next) = self.sizes.borrow_mut().pop_front() {
                *self.last.borrow_mut() = next;
            }
            Ok(*self.last.borrow())
        }
    }

    fn fast_config() -> VerificationConfig {
        VerificationConfig {
            existence_poll_interval: Duration::from_millis(1),
            existence_timeout: Duration::from_millis(30),
            stability_poll_interval: Duration::from_millis(1),
            stability_timeout: Duration::from_millis(200),
            stable_polls: 2,
        }
    }

    #[test]
    fn growing_file_becomes_ready_at_final_size() {
        let probe = ScriptedProbe::new(&[None, Some(0), Some(10), Some(20), Some(30), Some(30), Some(30), Some(30)]);
        let report = verify_artifact(&probe, "/sdcard/shot.png", &fast_config(), None);
        assert!(report.ready, "{}", report.summary());
        assert_eq!(report.final_size, Some(30));
        assert_eq!(report.stages.len(), 3);
        assert!(report.stages.iter().all(|s| s.ok));
    }

    #[test]
    fn missing_file_fails_existence_stage() {
        let probe = ScriptedProbe::new(&[None]);
        let report = verify_artifact(&probe, "/sdcard/none.png", &fast_config(), None);
        assert!(!report.ready);
        assert_eq!(report.failed_stage, Some(VerificationStage::Existence));
        assert_eq!(report.stages.len(), 1);
    }

    #[test]
    fn size_change_before_signal_fails_final_check() {
        let probe = ScriptedProbe::new(&[Some(5), Some(5), Some(5), Some(9)]);
        let report = verify_artifact(&probe, "/sdcard/shot.png", &fast_config(), None);
        assert!(!report.ready);
        assert_eq!(report.failed_stage, Some(VerificationStage::FinalCheck));
        assert!(report.summary().contains("size changed from 5 to 9"));
    }

    #[test]
    fn vanished_file_fails_final_check() {
        let probe = ScriptedProbe::new(&[Some(5), Some(5), Some(5), None]);
        let report = verify_artifact(&probe, "/sdcard/shot.png", &fast_config(), None);
        assert_eq!(report.failed_stage, Some(VerificationStage::FinalCheck));
        assert!(report.summary().contains("vanished"));
    }

    #[test]
    fn never_stable_fails_stability_stage() {
        let sizes: Vec<Option<u64>> = (1..=1000).map(Some).collect();
        let probe = ScriptedProbe::new(&sizes);
        let mut config = fast_config();
        config.stability_timeout = Duration::from_millis(20);
        let report = verify_artifact(&probe, "/sdcard/shot.png", &config, None);
        assert_eq!(report.failed_stage, Some(VerificationStage::Stability));
    }
}
