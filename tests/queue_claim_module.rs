use farmctl::fleet::{DiscoveredDevice, FleetRegistry, LivenessThresholds, SlotMap};
use farmctl::queue::{
    claim_job, claim_next, dispatch_pending, submit_job, ClaimOutcome, JobStatus, NewJob,
    Priority,
};
use farmctl::shared::ids::{AgentId, NodeId, WorkflowId};
use farmctl::store::JobStore;
use farmctl::workflow::WorkflowDefinition;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

const SMOKE: &str = "id: smoke\nsteps:\n  - id: tap\n    action: remote_command\n    command: input tap 1 1\n";

fn store_with_agents(root: &Path, count: usize) -> (JobStore, Vec<AgentId>) {
    let store = JobStore::open(&root.join("farm.db")).expect("store");
    let definition = WorkflowDefinition::parse(SMOKE).expect("definition");
    store.deploy_workflow(&definition, SMOKE).expect("deploy");
    let registry = FleetRegistry::new(
        store.clone(),
        SlotMap::new(root.join("slots.json"), 64),
        NodeId::parse("host-a").expect("node"),
        LivenessThresholds::default(),
    );
    let agents = (0..count)
        .map(|i| {
            let device = DiscoveredDevice {
                fingerprint: format!("fp-{i}"),
                serial: format!("SER{i}"),
                model: None,
                responsive: true,
            };
            registry
                .heartbeat(&device)
                .expect("heartbeat")
                .agent()
                .expect("registered")
                .agent_id
                .clone()
        })
        .collect();
    (store, agents)
}

fn smoke() -> WorkflowId {
    WorkflowId::parse("smoke").expect("workflow id")
}

#[test]
fn concurrent_pulls_claim_a_job_exactly_once() {
    const CONTENDERS: usize = 8;
    let dir = tempdir().expect("tempdir");
    let (store, agents) = store_with_agents(dir.path(), CONTENDERS);
    let job = submit_job(&store, NewJob::new(smoke())).expect("submit");

    let barrier = Arc::new(Barrier::new(CONTENDERS));
    let handles: Vec<_> = agents
        .into_iter()
        .map(|agent| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                claim_next(&store, &agent, &LivenessThresholds::default()).expect("claim")
            })
        })
        .collect();
    let outcomes: Vec<ClaimOutcome> = handles
        .into_iter()
        .map(|h| h.join().expect("claimer"))
        .collect();

    let claimed: Vec<_> = outcomes.iter().filter_map(ClaimOutcome::assignment).collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job_id, job.job_id);
    assert_eq!(claimed[0].attempt, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ClaimOutcome::Claimed(_) | ClaimOutcome::NoPendingJob)));

    let stored = store.get_job(&job.job_id).expect("get").expect("job");
    assert_eq!(stored.status, JobStatus::Assigned);
    assert_eq!(stored.attempts, 1);
    assert_eq!(store.assignments_for_job(&job.job_id).expect("assignments").len(), 1);
}

#[test]
fn push_and_pull_racing_for_one_job_yield_one_assignment() {
    let dir = tempdir().expect("tempdir");
    let (store, agents) = store_with_agents(dir.path(), 2);
    let job = submit_job(&store, NewJob::new(smoke())).expect("submit");

    let barrier = Arc::new(Barrier::new(2));
    let pusher = {
        let (store, barrier, agent, job_id) =
            (store.clone(), Arc::clone(&barrier), agents[0].clone(), job.job_id.clone());
        thread::spawn(move || {
            barrier.wait();
            claim_job(&store, &job_id, &agent, &LivenessThresholds::default()).expect("push")
        })
    };
    let puller = {
        let (store, barrier, agent) = (store.clone(), Arc::clone(&barrier), agents[1].clone());
        thread::spawn(move || {
            barrier.wait();
            claim_next(&store, &agent, &LivenessThresholds::default()).expect("pull")
        })
    };
    let push = pusher.join().expect("pusher");
    let pull = puller.join().expect("puller");

    let winners = [&push, &pull]
        .iter()
        .filter(|o| o.assignment().is_some())
        .count();
    assert_eq!(winners, 1);
    assert!(matches!(push, ClaimOutcome::Claimed(_) | ClaimOutcome::Conflict));
    assert!(matches!(pull, ClaimOutcome::Claimed(_) | ClaimOutcome::NoPendingJob));
    assert_eq!(store.assignments_for_job(&job.job_id).expect("assignments").len(), 1);
}

#[test]
fn pull_prefers_priority_then_age() {
    let dir = tempdir().expect("tempdir");
    let (store, agents) = store_with_agents(dir.path(), 3);
    let low = submit_job(&store, NewJob::new(smoke()).priority(Priority::Low)).expect("low");
    let first_normal = submit_job(&store, NewJob::new(smoke())).expect("normal");
    let urgent = submit_job(&store, NewJob::new(smoke()).priority(Priority::Urgent)).expect("urgent");
    let _second_normal = submit_job(&store, NewJob::new(smoke())).expect("normal 2");

    let thresholds = LivenessThresholds::default();
    let order: Vec<_> = agents
        .iter()
        .map(|agent| {
            claim_next(&store, agent, &thresholds)
                .expect("claim")
                .assignment()
                .expect("claimed")
                .job_id
                .clone()
        })
        .collect();
    assert_eq!(order[0], urgent.job_id);
    assert_eq!(order[1], first_normal.job_id);
    assert_ne!(order[2], low.job_id);
}

#[test]
fn busy_or_unknown_agents_cannot_claim() {
    let dir = tempdir().expect("tempdir");
    let (store, agents) = store_with_agents(dir.path(), 1);
    let thresholds = LivenessThresholds::default();
    submit_job(&store, NewJob::new(smoke())).expect("first");
    let second = submit_job(&store, NewJob::new(smoke())).expect("second");

    assert!(claim_next(&store, &agents[0], &thresholds)
        .expect("claim")
        .assignment()
        .is_some());
    assert!(matches!(
        claim_job(&store, &second.job_id, &agents[0], &thresholds).expect("busy"),
        ClaimOutcome::AgentUnavailable { reason } if reason.contains("busy")
    ));

    let ghost = AgentId::parse("host-z-slot09").expect("agent id");
    assert!(matches!(
        claim_next(&store, &ghost, &thresholds).expect("ghost"),
        ClaimOutcome::AgentUnavailable { reason } if reason.contains("not registered")
    ));
    let pending = store.get_job(&second.job_id).expect("get").expect("job");
    assert_eq!(pending.status, JobStatus::Pending);
}

#[test]
fn dispatch_pairs_pending_jobs_with_idle_agents() {
    let dir = tempdir().expect("tempdir");
    let (store, agents) = store_with_agents(dir.path(), 2);
    for _ in 0..3 {
        submit_job(&store, NewJob::new(smoke())).expect("submit");
    }
    let report = dispatch_pending(&store, &agents, &LivenessThresholds::default()).expect("dispatch");
    assert_eq!(report.assigned.len(), 2);
    let owners: Vec<_> = report.assigned.iter().map(|a| a.agent_id.clone()).collect();
    assert!(owners.contains(&agents[0]) && owners.contains(&agents[1]));
    assert_eq!(
        store
            .list_jobs(Some(JobStatus::Pending), 10)
            .expect("pending")
            .len(),
        1
    );
}
