use farmctl::fleet::{DiscoveredDevice, FleetRegistry, LivenessThresholds, SlotMap};
use farmctl::orchestration::{AbortHandle, AgentRef, ErrorCode, StepActions, StepError};
use farmctl::queue::{
    claim_next, start_assignment, submit_job, Assignment, ClaimOutcome, FailOutcome, JobStatus,
    NewJob,
};
use farmctl::runtime::{recover_orphaned_assignments, ExecutionOutcome, JobExecutor};
use farmctl::shared::ids::{NodeId, WorkflowId};
use farmctl::store::JobStore;
use farmctl::verification::{ArtifactProbe, LocalFsProbe};
use farmctl::workflow::WorkflowDefinition;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const TAP: &str = "id: tap\nsteps:\n  - id: one\n    action: remote_command\n    command: input tap 1 1\n  - id: two\n    action: remote_command\n    command: input tap 2 2\n";
const BROKEN: &str = "id: broken\nsteps:\n  - id: boom\n    action: system\n    directive: fail\n    args:\n      message: device rejected input\n";

struct EchoActions;

impl StepActions for EchoActions {
    fn remote_command(
        &self,
        _agent: &AgentRef,
        command: &str,
        _args: &[Value],
        _timeout: Duration,
    ) -> Result<Value, StepError> {
        Ok(json!({ "command": command }))
    }

    fn scripted_action(
        &self,
        _agent: &AgentRef,
        _script: &str,
        params: &Map<String, Value>,
        _timeout: Duration,
    ) -> Result<Value, StepError> {
        Ok(Value::Object(params.clone()))
    }

    fn artifact_probe(&self, _agent: &AgentRef) -> Box<dyn ArtifactProbe> {
        Box::new(LocalFsProbe::new())
    }
}

fn open_store(root: &Path) -> JobStore {
    let store = JobStore::open(&root.join("farm.db")).expect("store");
    for doc in [TAP, BROKEN] {
        let definition = WorkflowDefinition::parse(doc).expect("definition");
        store.deploy_workflow(&definition, doc).expect("deploy");
    }
    store
}

fn registry(root: &Path, store: &JobStore, node: &str, thresholds: LivenessThresholds) -> FleetRegistry {
    FleetRegistry::new(
        store.clone(),
        SlotMap::new(root.join(format!("{node}.slots.json")), 4),
        NodeId::parse(node).expect("node"),
        thresholds,
    )
}

fn register(registry: &FleetRegistry, fingerprint: &str) -> farmctl::shared::ids::AgentId {
    registry
        .heartbeat(&DiscoveredDevice {
            fingerprint: fingerprint.to_string(),
            serial: fingerprint.to_uppercase(),
            model: None,
            responsive: true,
        })
        .expect("heartbeat")
        .agent()
        .expect("registered")
        .agent_id
        .clone()
}

fn claim(store: &JobStore, registry: &FleetRegistry, agent: &farmctl::shared::ids::AgentId) -> Assignment {
    match claim_next(store, agent, registry.thresholds()).expect("claim") {
        ClaimOutcome::Claimed(assignment) => assignment,
        other => panic!("expected claim, got {other:?}"),
    }
}

fn workflow(id: &str) -> WorkflowId {
    WorkflowId::parse(id).expect("workflow id")
}

#[test]
fn assignments_of_offline_agents_are_requeued() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let remote = registry(dir.path(), &store, "host-b", LivenessThresholds::default());
    let remote_agent = register(&remote, "fp-remote");
    let job = submit_job(&store, NewJob::new(workflow("tap")).max_attempts(2)).expect("submit");
    let assignment = claim(&store, &remote, &remote_agent);
    start_assignment(&store, &assignment.assignment_id).expect("start");

    let impatient = LivenessThresholds {
        online: Duration::from_millis(5),
        offline: Duration::from_millis(20),
    };
    let local = registry(dir.path(), &store, "host-a", impatient);
    thread::sleep(Duration::from_millis(60));

    let recovered = recover_orphaned_assignments(&store, &local, &BTreeSet::new()).expect("recover");
    assert_eq!(recovered.len(), 1);
    assert!(recovered[0].reason.contains("went offline"));
    assert_eq!(
        recovered[0].outcome,
        FailOutcome::Requeued {
            attempt: 1,
            max_attempts: 2
        }
    );

    let stored = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.error_code, Some(ErrorCode::AgentLost));
    assert!(recover_orphaned_assignments(&store, &local, &BTreeSet::new())
        .expect("second pass")
        .is_empty());
}

#[test]
fn only_local_assignments_without_a_live_runner_are_recovered() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let local = registry(dir.path(), &store, "host-a", LivenessThresholds::default());
    let remote = registry(dir.path(), &store, "host-b", LivenessThresholds::default());
    let live_agent = register(&local, "fp-live");
    let orphan_agent = register(&local, "fp-orphan");
    let remote_agent = register(&remote, "fp-remote");

    for _ in 0..3 {
        submit_job(&store, NewJob::new(workflow("tap")).max_attempts(3)).expect("submit");
    }
    let live = claim(&store, &local, &live_agent);
    let orphan = claim(&store, &local, &orphan_agent);
    let remote_running = claim(&store, &remote, &remote_agent);

    let running: BTreeSet<_> = [live.assignment_id.clone()].into_iter().collect();
    let recovered = recover_orphaned_assignments(&store, &local, &running).expect("recover");
    let ids: Vec<_> = recovered
        .iter()
        .map(|r| r.assignment.assignment_id.clone())
        .collect();
    assert_eq!(ids, vec![orphan.assignment_id.clone()]);

    let active: Vec<_> = store
        .active_assignments(None)
        .expect("active")
        .into_iter()
        .map(|a| a.assignment_id)
        .collect();
    assert!(active.contains(&live.assignment_id));
    assert!(active.contains(&remote_running.assignment_id));
    assert!(!active.contains(&orphan.assignment_id));
}

#[test]
fn executor_completes_and_fails_claimed_assignments() {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path());
    let local = registry(dir.path(), &store, "host-a", LivenessThresholds::default());
    let agent = register(&local, "fp-1");
    let executor = JobExecutor::new(store.clone(), Arc::new(EchoActions))
        .with_runs_log(dir.path().join("logs").join("runs.log"));

    let ok_job = submit_job(&store, NewJob::new(workflow("tap"))).expect("submit");
    let assignment = claim(&store, &local, &agent);
    let outcome = executor
        .execute(&assignment, &AbortHandle::new())
        .expect("execute");
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));
    let done = store.get_job(&ok_job.job_id).expect("get").expect("job");
    assert_eq!(done.status, JobStatus::Completed);
    assert!(dir.path().join("logs").join("runs.log").exists());

    let bad_job = submit_job(&store, NewJob::new(workflow("broken")).max_attempts(1)).expect("submit");
    let assignment = claim(&store, &local, &agent);
    match executor
        .execute(&assignment, &AbortHandle::new())
        .expect("execute")
    {
        ExecutionOutcome::Failed { code, message, outcome } => {
            assert_eq!(code, ErrorCode::StepFailed);
            assert!(message.contains("device rejected input"));
            assert!(matches!(outcome, FailOutcome::Failed { .. }));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    let failed = store.get_job(&bad_job.job_id).expect("get").expect("job");
    assert_eq!(failed.status, JobStatus::Failed);

    let rerun = executor
        .execute(&assignment, &AbortHandle::new())
        .expect("execute again");
    assert!(matches!(rerun, ExecutionOutcome::Superseded { .. }));
}
