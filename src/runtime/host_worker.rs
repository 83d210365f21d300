//! Long-lived host worker.
//!
//! One loop thread owns the timers: a heartbeat tick (discovery, liveness, orphan recovery),
//! a notification tick that tails the pending-job feed and pushes work to idle local agents,
//! and a slower poll tick that pulls as the baseline. Each claimed assignment runs on its own
//! thread, bounded by `max_concurrent_jobs`; completions come back over a channel.

use super::job_executor::{runner_options, ExecutionOutcome, JobExecutor};
use super::ownership_lock::{clear_start_lock, reserve_start_lock, stop_signal_requested};
use super::recovery::recover_orphaned_assignments;
use super::worker_primitives::sleep_with_stop;
use super::{append_runtime_log, bootstrap_state_root, RuntimeError, StatePaths};
use crate::config::Settings;
use crate::device::{AdbTransport, DeviceDiscovery, DeviceStepActions, ScriptHandoff};
use crate::fleet::{FleetRegistry, LivenessThresholds, SlotMap, SyncReport};
use crate::orchestration::AbortHandle;
use crate::queue::{
    cancel_requested, claim_next, dispatch_pending, Assignment, ClaimOutcome, FailOutcome,
};
use crate::shared::fs_atomic::atomic_write_json;
use crate::shared::ids::{AssignmentId, JobId};
use crate::shared::logging::LogLevel;
use crate::shared::time::now_millis;
use crate::store::JobStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FEED_BATCH: usize = 100;
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkerStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub node_id: Option<String>,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    #[serde(default)]
    pub in_flight: usize,
    #[serde(default)]
    pub agents: usize,
    pub last_heartbeat_at: Option<i64>,
    pub last_error: Option<String>,
}

pub fn load_worker_status(paths: &StatePaths) -> Result<WorkerStatus, RuntimeError> {
    let path = paths.worker_state_path();
    if !path.exists() {
        return Ok(WorkerStatus::default());
    }
    let raw = fs::read_to_string(&path).map_err(|source| RuntimeError::ReadState {
        path: path.display().to_string(),
        source,
    })?;
    // A torn or foreign file is treated as "no status" rather than failing every command.
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

pub fn save_worker_status(paths: &StatePaths, status: &WorkerStatus) -> Result<(), RuntimeError> {
    let path = paths.worker_state_path();
    atomic_write_json(&path, status).map_err(|source| RuntimeError::WriteState {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWorkerConfig {
    pub max_concurrent_jobs: usize,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub notify_interval: Duration,
}

impl HostWorkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent_jobs: settings.worker.max_concurrent_jobs.max(1),
            heartbeat_interval: settings.fleet.heartbeat_interval,
            poll_interval: settings.worker.poll_interval,
            notify_interval: settings.worker.notify_interval,
        }
    }

    fn tick(&self) -> Duration {
        self.heartbeat_interval
            .min(self.poll_interval)
            .min(self.notify_interval)
            .min(MAX_IDLE_SLEEP)
    }
}

struct InFlightRun {
    job_id: JobId,
    abort: AbortHandle,
    cancel_forwarded: bool,
}

struct RunCompletion {
    assignment: Assignment,
    result: Result<ExecutionOutcome, String>,
}

pub struct HostWorker {
    paths: StatePaths,
    store: JobStore,
    registry: FleetRegistry,
    discovery: Box<dyn DeviceDiscovery>,
    executor: Arc<JobExecutor>,
    config: HostWorkerConfig,
    in_flight: BTreeMap<AssignmentId, InFlightRun>,
    completions_tx: Sender<RunCompletion>,
    completions_rx: Receiver<RunCompletion>,
    feed_cursor: i64,
    agents_seen: usize,
    last_error: Option<String>,
}

impl HostWorker {
    pub fn new(
        paths: StatePaths,
        store: JobStore,
        registry: FleetRegistry,
        discovery: Box<dyn DeviceDiscovery>,
        executor: JobExecutor,
        config: HostWorkerConfig,
    ) -> Result<Self, RuntimeError> {
        let feed_cursor = store.latest_event_seq()?;
        let (completions_tx, completions_rx) = mpsc::channel();
        Ok(Self {
            paths,
            store,
            registry,
            discovery,
            executor: Arc::new(executor),
            config,
            in_flight: BTreeMap::new(),
            completions_tx,
            completions_rx,
            feed_cursor,
            agents_seen: 0,
            last_error: None,
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn capacity(&self) -> usize {
        self.config
            .max_concurrent_jobs
            .saturating_sub(self.in_flight.len())
    }

    fn log(&self, level: LogLevel, event: &str, message: &str, fields: Map<String, Value>) {
        append_runtime_log(&self.paths, level, event, message, fields);
    }

    /// Discovery pass, liveness refresh and orphan recovery.
    pub fn heartbeat_tick(&mut self) -> Result<SyncReport, RuntimeError> {
        let devices = self.discovery.discover()?;
        let report = self.registry.sync_discovery(&devices)?;
        self.agents_seen = devices.len();
        for agent_id in &report.registered {
            self.log(
                LogLevel::Info,
                "fleet.registered",
                "new device registered",
                crate::log_fields! { "agent_id" => agent_id.as_str() },
            );
        }
        for fingerprint in &report.exhausted {
            self.log(
                LogLevel::Warn,
                "fleet.pool_exhausted",
                "no free slot for device",
                crate::log_fields! { "fingerprint" => fingerprint },
            );
        }

        let live = self.in_flight.keys().cloned().collect::<BTreeSet<_>>();
        for recovered in recover_orphaned_assignments(&self.store, &self.registry, &live)? {
            let requeued = matches!(recovered.outcome, FailOutcome::Requeued { .. });
            self.log(
                LogLevel::Warn,
                "recovery.orphan",
                &recovered.reason,
                crate::log_fields! {
                    "assignment_id" => recovered.assignment.assignment_id.as_str(),
                    "job_id" => recovered.assignment.job_id.as_str(),
                    "requeued" => requeued,
                },
            );
        }
        Ok(report)
    }

    /// Tails the pending-job feed; new entries trigger push dispatch to idle local agents.
    pub fn notification_tick(&mut self) -> Result<usize, RuntimeError> {
        let events = self.store.job_events_after(self.feed_cursor, FEED_BATCH)?;
        let Some(last) = events.last() else {
            return Ok(0);
        };
        self.feed_cursor = last.seq;
        if self.capacity() == 0 {
            return Ok(0);
        }
        let idle = self
            .registry
            .idle_online_agents()?
            .into_iter()
            .take(self.capacity())
            .map(|agent| agent.agent_id)
            .collect::<Vec<_>>();
        let report = dispatch_pending(&self.store, &idle, self.registry.thresholds())?;
        for job_id in &report.conflicts {
            self.log(
                LogLevel::Debug,
                "claim.conflict",
                "push claim lost the race",
                crate::log_fields! { "job_id" => job_id.as_str() },
            );
        }
        let started = report.assigned.len();
        for assignment in report.assigned {
            self.spawn_run(assignment, "push");
        }
        Ok(started)
    }

    /// Baseline pull: each idle local agent claims the next pending job.
    pub fn poll_tick(&mut self) -> Result<usize, RuntimeError> {
        let mut started = 0;
        for agent in self.registry.idle_online_agents()? {
            if self.capacity() == 0 {
                break;
            }
            match claim_next(&self.store, &agent.agent_id, self.registry.thresholds())? {
                ClaimOutcome::Claimed(assignment) => {
                    self.spawn_run(assignment, "pull");
                    started += 1;
                }
                ClaimOutcome::Conflict => self.log(
                    LogLevel::Debug,
                    "claim.conflict",
                    "pull claim lost the race",
                    crate::log_fields! { "agent_id" => agent.agent_id.as_str() },
                ),
                ClaimOutcome::NoPendingJob => break,
                ClaimOutcome::AgentUnavailable { reason } => self.log(
                    LogLevel::Debug,
                    "claim.agent_unavailable",
                    &reason,
                    crate::log_fields! { "agent_id" => agent.agent_id.as_str() },
                ),
            }
        }
        Ok(started)
    }

    /// Turns stored cancel requests into aborts of the matching local runs.
    pub fn forward_cancellations(&mut self) -> Result<usize, RuntimeError> {
        let mut forwarded = 0;
        for (assignment_id, run) in self.in_flight.iter_mut() {
            if run.cancel_forwarded || !cancel_requested(&self.store, &run.job_id)? {
                continue;
            }
            run.abort.abort();
            run.cancel_forwarded = true;
            forwarded += 1;
            append_runtime_log(
                &self.paths,
                LogLevel::Info,
                "job.cancel.forwarded",
                "abort requested for running job",
                crate::log_fields! {
                    "assignment_id" => assignment_id.as_str(),
                    "job_id" => run.job_id.as_str(),
                },
            );
        }
        Ok(forwarded)
    }

    /// Collects finished runs without blocking.
    pub fn reap_completions(&mut self) -> usize {
        let mut reaped = 0;
        while let Ok(done) = self.completions_rx.try_recv() {
            self.finish(done);
            reaped += 1;
        }
        reaped
    }

    /// Blocks until every in-flight run finished or `timeout` elapsed. Returns the runs left.
    pub fn drain_in_flight(&mut self, timeout: Option<Duration>) -> usize {
        let start = Instant::now();
        while !self.in_flight.is_empty() {
            let wait = match timeout {
                Some(limit) => match limit.checked_sub(start.elapsed()) {
                    Some(remaining) => remaining.min(MAX_IDLE_SLEEP),
                    None => break,
                },
                None => MAX_IDLE_SLEEP,
            };
            match self.completions_rx.recv_timeout(wait) {
                Ok(done) => self.finish(done),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.in_flight.len()
    }

    fn spawn_run(&mut self, assignment: Assignment, via: &str) {
        self.log(
            LogLevel::Info,
            "claim.ok",
            "assignment claimed",
            crate::log_fields! {
                "assignment_id" => assignment.assignment_id.as_str(),
                "job_id" => assignment.job_id.as_str(),
                "agent_id" => assignment.agent_id.as_str(),
                "attempt" => assignment.attempt,
                "via" => via,
            },
        );
        let abort = AbortHandle::new();
        self.in_flight.insert(
            assignment.assignment_id.clone(),
            InFlightRun {
                job_id: assignment.job_id.clone(),
                abort: abort.clone(),
                cancel_forwarded: false,
            },
        );
        let executor = self.executor.clone();
        let tx = self.completions_tx.clone();
        thread::spawn(move || {
            let result = executor
                .execute(&assignment, &abort)
                .map_err(|err| err.to_string());
            let _ = tx.send(RunCompletion { assignment, result });
        });
    }

    fn finish(&mut self, done: RunCompletion) {
        let assignment = &done.assignment;
        self.in_flight.remove(&assignment.assignment_id);
        let ids = || {
            crate::log_fields! {
                "assignment_id" => assignment.assignment_id.as_str(),
                "job_id" => assignment.job_id.as_str(),
            }
        };
        match done.result {
            Ok(ExecutionOutcome::Completed { elapsed_ms }) => {
                let mut fields = ids();
                fields.insert("elapsed_ms".to_string(), elapsed_ms.into());
                self.log(LogLevel::Info, "job.completed", "assignment completed", fields);
            }
            Ok(ExecutionOutcome::Failed {
                code,
                message,
                outcome,
            }) => {
                let mut fields = ids();
                fields.insert("error_code".to_string(), code.as_str().into());
                fields.insert(
                    "requeued".to_string(),
                    matches!(outcome, FailOutcome::Requeued { .. }).into(),
                );
                self.log(LogLevel::Warn, "job.failed", &message, fields);
            }
            Ok(ExecutionOutcome::Superseded { reason }) => {
                self.log(LogLevel::Info, "job.superseded", &reason, ids());
            }
            Err(message) => {
                self.log(LogLevel::Error, "job.executor.error", &message, ids());
                self.last_error = Some(message);
            }
        }
    }

    fn record_error(&mut self, tick: &str, err: RuntimeError) {
        let message = err.to_string();
        self.log(
            LogLevel::Error,
            "worker.tick.error",
            &message,
            crate::log_fields! { "tick" => tick },
        );
        self.last_error = Some(message);
    }

    fn status(&self, running: bool) -> WorkerStatus {
        WorkerStatus {
            running,
            pid: running.then(std::process::id),
            node_id: Some(self.registry.node_id().to_string()),
            started_at: None,
            stopped_at: (!running).then(now_millis),
            in_flight: self.in_flight.len(),
            agents: self.agents_seen,
            last_heartbeat_at: Some(now_millis()),
            last_error: self.last_error.clone(),
        }
    }

    /// Runs until `stop` is set or the stop file appears, then waits for in-flight runs.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), RuntimeError> {
        let started_at = now_millis();
        let tick = self.config.tick();
        let mut last_heartbeat: Option<Instant> = None;
        let mut last_notify = Instant::now();
        let mut last_poll: Option<Instant> = None;

        loop {
            if stop.load(Ordering::Relaxed) || stop_signal_requested(&self.paths) {
                stop.store(true, Ordering::Relaxed);
                break;
            }
            self.reap_completions();

            if last_heartbeat.map_or(true, |at| at.elapsed() >= self.config.heartbeat_interval) {
                last_heartbeat = Some(Instant::now());
                if let Err(err) = self.heartbeat_tick() {
                    self.record_error("heartbeat", err);
                }
                let mut status = self.status(true);
                status.started_at = Some(started_at);
                save_worker_status(&self.paths, &status)?;
            }
            if last_notify.elapsed() >= self.config.notify_interval {
                last_notify = Instant::now();
                if let Err(err) = self.notification_tick() {
                    self.record_error("notification", err);
                }
            }
            if last_poll.map_or(true, |at| at.elapsed() >= self.config.poll_interval) {
                last_poll = Some(Instant::now());
                if let Err(err) = self.poll_tick() {
                    self.record_error("poll", err);
                }
            }
            if let Err(err) = self.forward_cancellations() {
                self.record_error("cancellation", err);
            }

            if self.in_flight.is_empty() {
                if !sleep_with_stop(stop, tick) {
                    break;
                }
            } else {
                match self.completions_rx.recv_timeout(tick) {
                    Ok(done) => self.finish(done),
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
                }
            }
        }

        self.log(
            LogLevel::Info,
            "worker.stopping",
            "waiting for in-flight runs",
            crate::log_fields! { "in_flight" => self.in_flight.len() },
        );
        self.drain_in_flight(None);
        let mut status = self.status(false);
        status.started_at = Some(started_at);
        save_worker_status(&self.paths, &status)
    }
}

/// Entry point for `farmctl worker run`: takes the start lock, wires the adb transport and
/// runs the host worker in the foreground until stopped.
pub fn run_host_worker(state_root: &Path, settings: Settings) -> Result<(), RuntimeError> {
    let paths = StatePaths::new(state_root);
    bootstrap_state_root(&paths)?;
    reserve_start_lock(&paths)?;
    let _ = fs::remove_file(paths.stop_signal_path());

    let result = run_locked(&paths, &settings);
    if let Err(err) = &result {
        append_runtime_log(
            &paths,
            LogLevel::Error,
            "worker.failed",
            &err.to_string(),
            crate::log_fields! {},
        );
    }
    clear_start_lock(&paths);
    let _ = fs::remove_file(paths.stop_signal_path());
    result
}

fn run_locked(paths: &StatePaths, settings: &Settings) -> Result<(), RuntimeError> {
    let store = JobStore::open(&settings.database_path(&paths.root))?;
    let thresholds = LivenessThresholds::from_settings(&settings.fleet);
    let registry = FleetRegistry::new(
        store.clone(),
        SlotMap::new(paths.slot_map_path(), settings.fleet.slot_capacity),
        settings.node_id.clone(),
        thresholds,
    )
    .with_log_path(paths.runtime_log_path());
    let transport =
        AdbTransport::from_settings(&settings.transport).with_log_path(paths.runtime_log_path());
    let actions = DeviceStepActions::new(
        transport.clone(),
        ScriptHandoff::new(settings.exchange_dir(&paths.root)),
    );
    let executor = JobExecutor::new(store.clone(), Arc::new(actions))
        .with_options(runner_options(settings))
        .with_runs_log(paths.runs_log_path());
    let config = HostWorkerConfig::from_settings(settings);

    let mut worker = HostWorker::new(
        paths.clone(),
        store,
        registry,
        Box::new(transport),
        executor,
        config,
    )?;
    save_worker_status(
        paths,
        &WorkerStatus {
            running: true,
            pid: Some(std::process::id()),
            node_id: Some(settings.node_id.to_string()),
            started_at: Some(now_millis()),
            ..WorkerStatus::default()
        },
    )?;
    append_runtime_log(
        paths,
        LogLevel::Info,
        "worker.started",
        "host worker started",
        crate::log_fields! {
            "pid" => std::process::id(),
            "node_id" => settings.node_id.as_str(),
            "max_concurrent_jobs" => config.max_concurrent_jobs,
        },
    );

    let stop = AtomicBool::new(false);
    worker.run(&stop)?;
    append_runtime_log(
        paths,
        LogLevel::Info,
        "worker.stopped",
        "host worker stopped",
        crate::log_fields! {},
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TransportError;
    use crate::fleet::DiscoveredDevice;
    use crate::orchestration::{AgentRef, StepActions, StepError};
    use crate::queue::{cancel_job, submit_job, JobStatus, NewJob};
    use crate::shared::ids::{NodeId, WorkflowId};
    use crate::store::StoreError;
    use crate::verification::{ArtifactProbe, LocalFsProbe};
    use crate::workflow::WorkflowDefinition;
    use tempfile::tempdir;

    struct FixedDiscovery(Vec<DiscoveredDevice>);

    impl DeviceDiscovery for FixedDiscovery {
        fn discover(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
            Ok(self.0.clone())
        }
    }

    struct EchoActions;

    impl StepActions for EchoActions {
        fn remote_command(
            &self,
            _agent: &AgentRef,
            command: &str,
            _args: &[Value],
            _timeout: Duration,
        ) -> Result<Value, StepError> {
            Ok(serde_json::json!({ "command": command }))
        }

        fn scripted_action(
            &self,
            _agent: &AgentRef,
            script: &str,
            _params: &Map<String, Value>,
            _timeout: Duration,
        ) -> Result<Value, StepError> {
            Ok(serde_json::json!({ "script": script }))
        }

        fn artifact_probe(&self, _agent: &AgentRef) -> Box<dyn ArtifactProbe> {
            Box::new(LocalFsProbe::new())
        }
    }

    const QUICK: &str = "id: quick\nversion: 1\nsteps:\n  - id: tap\n    action: remote_command\n    command: tap\n    args: [1, 2]\n  - id: pause\n    action: wait\n    duration: 10ms\n";
    const SLOW: &str = "id: slow\nversion: 1\nsteps:\n  - id: pause\n    action: wait\n    duration: 5s\n";

    fn device(serial: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            fingerprint: format!("fp-{serial}"),
            serial: serial.to_string(),
            model: Some("Pixel".to_string()),
            responsive: true,
        }
    }

    fn worker(root: &Path, devices: Vec<DiscoveredDevice>) -> (HostWorker, JobStore) {
        let paths = StatePaths::new(root);
        bootstrap_state_root(&paths).expect("bootstrap");
        let store = JobStore::open(&root.join("farm.db")).expect("store");
        for doc in [QUICK, SLOW] {
            let definition = WorkflowDefinition::parse(doc).expect("definition");
            match store.deploy_workflow(&definition, doc) {
                Ok(_) | Err(StoreError::WorkflowExists { .. }) => {}
                Err(err) => panic!("deploy: {err}"),
            }
        }
        let registry = FleetRegistry::new(
            store.clone(),
            SlotMap::new(paths.slot_map_path(), 4),
            NodeId::parse("host-a").expect("node"),
            LivenessThresholds::default(),
        );
        let executor = JobExecutor::new(store.clone(), Arc::new(EchoActions))
            .with_runs_log(paths.runs_log_path());
        let config = HostWorkerConfig {
            max_concurrent_jobs: 2,
            heartbeat_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
            notify_interval: Duration::from_millis(20),
        };
        let worker = HostWorker::new(
            paths,
            store.clone(),
            registry,
            Box::new(FixedDiscovery(devices)),
            executor,
            config,
        )
        .expect("worker");
        (worker, store)
    }

    fn workflow(id: &str) -> WorkflowId {
        WorkflowId::parse(id).expect("workflow id")
    }

    #[test]
    fn pull_claim_runs_job_to_completion() {
        let dir = tempdir().expect("tempdir");
        let (mut worker, store) = worker(dir.path(), vec![device("A1")]);
        let report = worker.heartbeat_tick().expect("heartbeat");
        assert_eq!(report.registered.len(), 1);

        let job = submit_job(&store, NewJob::new(workflow("quick"))).expect("submit");
        assert_eq!(worker.poll_tick().expect("poll"), 1);
        assert_eq!(worker.drain_in_flight(Some(Duration::from_secs(5))), 0);

        let stored = store.get_job(&job.job_id).expect("get").expect("job");
        assert_eq!(stored.status, JobStatus::Completed);
        let assignments = store.assignments_for_job(&job.job_id).expect("assignments");
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].progress, 100);
    }

    #[test]
    fn notification_feed_pushes_to_idle_agents() {
        let dir = tempdir().expect("tempdir");
        let (mut worker, store) = worker(dir.path(), vec![device("A1"), device("A2")]);
        worker.heartbeat_tick().expect("heartbeat");
        assert_eq!(worker.notification_tick().expect("empty feed"), 0);

        submit_job(&store, NewJob::new(workflow("quick"))).expect("first");
        submit_job(&store, NewJob::new(workflow("quick"))).expect("second");
        assert_eq!(worker.notification_tick().expect("notify"), 2);
        assert_eq!(worker.in_flight(), 2);
        assert_eq!(worker.drain_in_flight(Some(Duration::from_secs(5))), 0);
        let completed = store
            .list_jobs(Some(JobStatus::Completed), 10)
            .expect("list");
        assert_eq!(completed.len(), 2);
    }

    #[test]
    fn cancel_of_running_job_aborts_without_requeue() {
        let dir = tempdir().expect("tempdir");
        let (mut worker, store) = worker(dir.path(), vec![device("A1")]);
        worker.heartbeat_tick().expect("heartbeat");
        let job = submit_job(&store, NewJob::new(workflow("slow")).max_attempts(3)).expect("submit");
        assert_eq!(worker.poll_tick().expect("poll"), 1);

        let deadline = Instant::now() + Duration::from_secs(3);
        while store.get_job(&job.job_id).expect("get").expect("job").status != JobStatus::Running {
            assert!(Instant::now() < deadline, "job never started");
            thread::sleep(Duration::from_millis(10));
        }
        cancel_job(&store, &job.job_id).expect("cancel");
        assert_eq!(worker.forward_cancellations().expect("forward"), 1);
        assert_eq!(worker.drain_in_flight(Some(Duration::from_secs(3))), 0);

        let stored = store.get_job(&job.job_id).expect("get").expect("job");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_code, Some(crate::orchestration::ErrorCode::Aborted));
    }

    #[test]
    fn restart_recovers_assignments_without_live_runner() {
        let dir = tempdir().expect("tempdir");
        let (mut first, store) = worker(dir.path(), vec![device("A1")]);
        first.heartbeat_tick().expect("heartbeat");
        let job = submit_job(&store, NewJob::new(workflow("quick")).max_attempts(2)).expect("submit");
        let agent = store.list_agents(None).expect("agents").remove(0);
        let claimed = claim_next(&store, &agent.agent_id, &LivenessThresholds::default())
            .expect("claim");
        assert!(claimed.assignment().is_some());

        let assignment_id = claimed.assignment().expect("assignment").assignment_id.clone();
        drop(first);

        let (mut second, reopened) = worker(dir.path(), vec![device("A1")]);
        assert_eq!(reopened.list_workflows().expect("workflows").len(), 2);
        second.heartbeat_tick().expect("recovery heartbeat");
        let stored = store.get_job(&job.job_id).expect("get").expect("job");
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.error_code, Some(crate::orchestration::ErrorCode::AgentLost));
        let history = store.assignments_for_job(&job.job_id).expect("assignments");
        let lost = history
            .iter()
            .find(|entry| entry.assignment_id == assignment_id)
            .expect("recovered assignment");
        assert_eq!(lost.error_code, Some(crate::orchestration::ErrorCode::AgentLost));
    }

    #[test]
    fn run_loop_stops_on_stop_file() {
        let dir = tempdir().expect("tempdir");
        let (mut worker, _store) = worker(dir.path(), vec![device("A1")]);
        let paths = StatePaths::new(dir.path());
        let handle = thread::spawn(move || {
            let stop = AtomicBool::new(false);
            worker.run(&stop)
        });
        thread::sleep(Duration::from_millis(100));
        crate::runtime::signal_stop(&paths).expect("signal");
        handle.join().expect("join").expect("run");

        let status = load_worker_status(&paths).expect("status");
        assert!(!status.running);
        assert_eq!(status.agents, 1);
        assert_eq!(status.node_id.as_deref(), Some("host-a"));
    }
}
