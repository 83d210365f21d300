//! Runs one claimed assignment to a terminal assignment status.

use super::RuntimeError;
use crate::config::Settings;
use crate::orchestration::{
    AbortHandle, AgentRef, ErrorCode, RunEvent, RunOutcome, RunState, RunnerOptions, StepActions,
    WorkflowRunner,
};
use crate::queue::{
    complete_assignment, fail_assignment, report_progress, start_assignment, Assignment,
    FailOutcome, QueueError,
};
use crate::store::{JobStore, StoreError};
use crate::workflow::{resolve_params, WorkflowDefinition};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed { elapsed_ms: u64 },
    Failed {
        code: ErrorCode,
        message: String,
        outcome: FailOutcome,
    },
    /// Someone else already moved the assignment on (recovery, a cancel, a duplicate runner).
    Superseded { reason: String },
}

pub struct JobExecutor {
    store: JobStore,
    actions: Arc<dyn StepActions>,
    options: RunnerOptions,
    runs_log: Option<PathBuf>,
}

impl JobExecutor {
    pub fn new(store: JobStore, actions: Arc<dyn StepActions>) -> Self {
        Self {
            store,
            actions,
            options: RunnerOptions::default(),
            runs_log: None,
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_runs_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.runs_log = Some(path.into());
        self
    }

    pub fn execute(
        &self,
        assignment: &Assignment,
        abort: &AbortHandle,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let job = self
            .store
            .get_job(&assignment.job_id)?
            .ok_or_else(|| QueueError::JobNotFound {
                job_id: assignment.job_id.to_string(),
            })?;

        let definition = match self
            .store
            .load_definition(&job.workflow_id, job.workflow_version)
        {
            Ok(definition) => definition,
            Err(
                err @ (StoreError::InvalidStoredWorkflow { .. }
                | StoreError::WorkflowVersionNotFound { .. }),
            ) => return self.fail(assignment, ErrorCode::Validation, &err.to_string()),
            Err(err) => return Err(err.into()),
        };
        let params = match resolve_params(&definition, &job.params) {
            Ok(params) => params,
            Err(err) => return self.fail(assignment, ErrorCode::Validation, &err.to_string()),
        };

        match start_assignment(&self.store, &assignment.assignment_id) {
            Ok(_) => {}
            Err(QueueError::InvalidTransition { from, .. }) => {
                return Ok(ExecutionOutcome::Superseded {
                    reason: format!("assignment was already {from}"),
                })
            }
            Err(err) => return Err(err.into()),
        }

        let Some(agent) = self.store.get_agent(&assignment.agent_id)? else {
            return self.fail(
                assignment,
                ErrorCode::AgentLost,
                &format!("agent `{}` is not registered", assignment.agent_id),
            );
        };
        let agent = AgentRef {
            agent_id: agent.agent_id,
            serial: agent.serial,
        };

        let outcome = self.run(definition, assignment, &agent, params, abort);
        match outcome.state {
            RunState::Completed => match complete_assignment(&self.store, &assignment.assignment_id)
            {
                Ok(_) => Ok(ExecutionOutcome::Completed {
                    elapsed_ms: outcome.elapsed_ms,
                }),
                Err(QueueError::InvalidTransition { from, .. }) => Ok(ExecutionOutcome::Superseded {
                    reason: format!("assignment became {from} while running"),
                }),
                Err(err) => Err(err.into()),
            },
            state => {
                let (code, message) = match outcome.failure {
                    Some(failure) => (failure.code, failure.message),
                    None if state == RunState::Aborted => {
                        (ErrorCode::Aborted, "workflow run aborted".to_string())
                    }
                    None => (ErrorCode::StepFailed, format!("workflow run {state}")),
                };
                self.fail(assignment, code, &message)
            }
        }
    }

    fn run(
        &self,
        definition: WorkflowDefinition,
        assignment: &Assignment,
        agent: &AgentRef,
        params: serde_json::Map<String, serde_json::Value>,
        abort: &AbortHandle,
    ) -> RunOutcome {
        let (events_tx, events_rx) = mpsc::channel::<RunEvent>();
        let progress = {
            let store = self.store.clone();
            let assignment_id = assignment.assignment_id.clone();
            thread::spawn(move || {
                let mut total = 0usize;
                let mut done = 0usize;
                for event in events_rx {
                    match event {
                        RunEvent::Start {
                            top_level_steps, ..
                        } => total = top_level_steps,
                        RunEvent::StepComplete {
                            top_level: true, ..
                        } if total > 0 => {
                            done += 1;
                            let percent = ((done * 100) / total).min(99) as u8;
                            // A rejected update means the assignment is no longer running.
                            let _ = report_progress(&store, &assignment_id, percent);
                        }
                        _ => {}
                    }
                }
            })
        };

        let mut runner = WorkflowRunner::new(Arc::new(definition), self.actions.clone())
            .with_options(self.options.clone())
            .with_events(events_tx);
        if let Some(path) = &self.runs_log {
            runner = runner.with_log_path(path);
        }
        let outcome = runner.run(agent, params, abort);
        drop(runner);
        let _ = progress.join();
        outcome
    }

    fn fail(
        &self,
        assignment: &Assignment,
        code: ErrorCode,
        message: &str,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        match fail_assignment(&self.store, &assignment.assignment_id, code, message) {
            Ok(outcome) => Ok(ExecutionOutcome::Failed {
                code,
                message: message.to_string(),
                outcome,
            }),
            Err(QueueError::InvalidTransition { from, .. }) => Ok(ExecutionOutcome::Superseded {
                reason: format!("assignment was already {from}"),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

pub fn runner_options(settings: &Settings) -> RunnerOptions {
    RunnerOptions {
        default_step_timeout: settings.runner.step_timeout,
        default_run_timeout: settings.runner.run_timeout,
        verification: settings.verification.clone(),
    }
}
