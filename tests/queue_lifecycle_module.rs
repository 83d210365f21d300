use farmctl::fleet::{DiscoveredDevice, FleetRegistry, LivenessThresholds, SlotMap};
use farmctl::orchestration::ErrorCode;
use farmctl::queue::{
    cancel_job, claim_next, complete_assignment, fail_assignment, report_progress, requeue_job,
    start_assignment, submit_job, AssignmentStatus, CancelOutcome, ClaimOutcome, FailOutcome,
    JobStatus, NewJob, Priority, QueueError,
};
use farmctl::shared::ids::{AgentId, NodeId, WorkflowId};
use farmctl::store::JobStore;
use farmctl::workflow::WorkflowDefinition;
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;

const INSTALL: &str = r#"
id: install
params:
  - name: apk
    type: string
    required: true
steps:
  - id: push
    action: remote_command
    command: "install {{apk}}"
"#;

fn setup(root: &Path) -> (JobStore, AgentId) {
    let store = JobStore::open(&root.join("farm.db")).expect("store");
    let definition = WorkflowDefinition::parse(INSTALL).expect("definition");
    store.deploy_workflow(&definition, INSTALL).expect("deploy");
    let registry = FleetRegistry::new(
        store.clone(),
        SlotMap::new(root.join("slots.json"), 4),
        NodeId::parse("host-a").expect("node"),
        LivenessThresholds::default(),
    );
    let agent = registry
        .heartbeat(&DiscoveredDevice {
            fingerprint: "fp-1".to_string(),
            serial: "SER1".to_string(),
            model: Some("Pixel 8".to_string()),
            responsive: true,
        })
        .expect("heartbeat")
        .agent()
        .expect("registered")
        .agent_id
        .clone();
    (store, agent)
}

fn install() -> WorkflowId {
    WorkflowId::parse("install").expect("workflow id")
}

fn claim(store: &JobStore, agent: &AgentId) -> farmctl::queue::Assignment {
    match claim_next(store, agent, &LivenessThresholds::default()).expect("claim") {
        ClaimOutcome::Claimed(assignment) => assignment,
        other => panic!("expected a claim, got {other:?}"),
    }
}

#[test]
fn submit_validates_params_before_writing() {
    let dir = tempdir().expect("tempdir");
    let (store, _) = setup(dir.path());
    let err = submit_job(&store, NewJob::new(install())).expect_err("apk is required");
    assert!(matches!(err, QueueError::Validation(_)));
    assert!(store.list_jobs(None, 10).expect("list").is_empty());

    let err = submit_job(&store, NewJob::new(install()).param("apk", json!("a.apk")).max_attempts(0))
        .expect_err("zero attempts");
    assert!(matches!(err, QueueError::InvalidRequest(_)));

    let missing = WorkflowId::parse("nope").expect("workflow id");
    assert!(submit_job(&store, NewJob::new(missing)).is_err());
}

#[test]
fn retry_budget_requeues_then_fails_and_operator_requeue_completes() {
    let dir = tempdir().expect("tempdir");
    let (store, agent) = setup(dir.path());
    let job = submit_job(
        &store,
        NewJob::new(install())
            .param("apk", json!("maps.apk"))
            .priority(Priority::High)
            .max_attempts(2),
    )
    .expect("submit");
    assert_eq!(job.workflow_version, 1);
    assert_eq!(job.params.get("apk"), Some(&json!("maps.apk")));

    let first = claim(&store, &agent);
    start_assignment(&store, &first.assignment_id).expect("start");
    assert_eq!(
        fail_assignment(&store, &first.assignment_id, ErrorCode::StepFailed, "adb exited 1")
            .expect("fail"),
        FailOutcome::Requeued {
            attempt: 1,
            max_attempts: 2
        }
    );
    let requeued = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.error_code, Some(ErrorCode::StepFailed));

    let second = claim(&store, &agent);
    assert_eq!(second.attempt, 2);
    start_assignment(&store, &second.assignment_id).expect("start");
    assert_eq!(
        fail_assignment(&store, &second.assignment_id, ErrorCode::Timeout, "step timed out")
            .expect("fail"),
        FailOutcome::Failed {
            attempt: 2,
            max_attempts: 2
        }
    );
    let failed = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());

    let revived = requeue_job(&store, &job.job_id).expect("requeue");
    assert_eq!(revived.status, JobStatus::Pending);
    assert_eq!(revived.max_attempts, 3);
    assert_eq!(revived.completed_at, None);

    let third = claim(&store, &agent);
    assert_eq!(third.attempt, 3);
    start_assignment(&store, &third.assignment_id).expect("start");
    assert_eq!(report_progress(&store, &third.assignment_id, 40).expect("progress"), 40);
    assert_eq!(report_progress(&store, &third.assignment_id, 10).expect("progress"), 40);
    let done = complete_assignment(&store, &third.assignment_id).expect("complete");
    assert_eq!(done.status, AssignmentStatus::Completed);
    assert_eq!(done.progress, 100);

    let completed = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.error_code, None);
    let history = store.assignments_for_job(&job.job_id).expect("history");
    assert_eq!(history.len(), 3);
}

#[test]
fn terminal_assignments_reject_later_transitions() {
    let dir = tempdir().expect("tempdir");
    let (store, agent) = setup(dir.path());
    submit_job(&store, NewJob::new(install()).param("apk", json!("a.apk"))).expect("submit");
    let assignment = claim(&store, &agent);

    assert!(matches!(
        complete_assignment(&store, &assignment.assignment_id),
        Err(QueueError::InvalidTransition { .. })
    ));
    start_assignment(&store, &assignment.assignment_id).expect("start");
    complete_assignment(&store, &assignment.assignment_id).expect("complete");
    assert!(matches!(
        fail_assignment(&store, &assignment.assignment_id, ErrorCode::StepFailed, "late"),
        Err(QueueError::InvalidTransition { .. })
    ));
    assert!(matches!(
        start_assignment(&store, &assignment.assignment_id),
        Err(QueueError::InvalidTransition { .. })
    ));
}

#[test]
fn validation_failures_are_not_requeued() {
    let dir = tempdir().expect("tempdir");
    let (store, agent) = setup(dir.path());
    let job = submit_job(
        &store,
        NewJob::new(install()).param("apk", json!("a.apk")).max_attempts(5),
    )
    .expect("submit");
    let assignment = claim(&store, &agent);
    let outcome =
        fail_assignment(&store, &assignment.assignment_id, ErrorCode::Validation, "bad params")
            .expect("fail");
    assert!(matches!(outcome, FailOutcome::Failed { attempt: 1, .. }));
    let stored = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(stored.status, JobStatus::Failed);
}

#[test]
fn cancel_depends_on_job_state() {
    let dir = tempdir().expect("tempdir");
    let (store, agent) = setup(dir.path());
    let pending = submit_job(&store, NewJob::new(install()).param("apk", json!("a.apk")))
        .expect("pending");
    assert_eq!(cancel_job(&store, &pending.job_id).expect("cancel"), CancelOutcome::Cancelled);
    assert_eq!(
        cancel_job(&store, &pending.job_id).expect("again"),
        CancelOutcome::AlreadyTerminal(JobStatus::Cancelled)
    );
    assert!(requeue_job(&store, &pending.job_id).is_err());

    let running = submit_job(
        &store,
        NewJob::new(install()).param("apk", json!("b.apk")).max_attempts(3),
    )
    .expect("running");
    let assignment = claim(&store, &agent);
    start_assignment(&store, &assignment.assignment_id).expect("start");
    assert_eq!(cancel_job(&store, &running.job_id).expect("cancel"), CancelOutcome::Requested);
    let outcome =
        fail_assignment(&store, &assignment.assignment_id, ErrorCode::StepFailed, "interrupted")
            .expect("fail");
    assert!(matches!(outcome, FailOutcome::Failed { .. }));
}
