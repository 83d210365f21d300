use crate::app::command_support::{
    format_millis, format_optional_millis, parse_number, reject_unknown_flags, take_flag,
    take_repeated_flag, CliContext,
};
use crate::queue::{
    cancel_job, requeue_job, submit_job, Assignment, CancelOutcome, Job, JobStatus, NewJob,
    Priority,
};
use crate::shared::ids::{JobId, WorkflowId};
use crate::shared::serde_ext::parse_key_value_pairs;
use crate::store::JobStore;

const DEFAULT_LIST_LIMIT: usize = 50;

pub fn cmd_job(context: &CliContext, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: job <submit|status|list|cancel|requeue> ...".to_string());
    }

    match args[0].as_str() {
        "submit" => cmd_submit(&context.open_store()?, &args[1..]),
        "status" => {
            let job_id = single_job_id(&args[1..], "usage: job status <job_id>")?;
            let store = context.open_store()?;
            let job = required_job(&store, &job_id)?;
            let assignments = store
                .assignments_for_job(&job_id)
                .map_err(|e| e.to_string())?;
            let mut lines = render_job(&job);
            for assignment in &assignments {
                lines.push(render_assignment(assignment));
            }
            Ok(lines.join("\n"))
        }
        "list" => {
            let mut rest = args[1..].to_vec();
            let status = take_flag(&mut rest, "--status")?
                .map(|raw| JobStatus::parse(&raw))
                .transpose()?;
            let limit = take_flag(&mut rest, "--limit")?
                .map(|raw| parse_number::<usize>("--limit", &raw))
                .transpose()?
                .unwrap_or(DEFAULT_LIST_LIMIT);
            reject_unknown_flags(&rest)?;
            if !rest.is_empty() {
                return Err("usage: job list [--status S] [--limit N]".to_string());
            }
            let jobs = context
                .open_store()?
                .list_jobs(status, limit)
                .map_err(|e| e.to_string())?;
            if jobs.is_empty() {
                return Ok("jobs=none".to_string());
            }
            Ok(jobs
                .iter()
                .map(|job| {
                    format!(
                        "job={} workflow={}@{} status={} priority={} attempts={}/{}",
                        job.job_id,
                        job.workflow_id,
                        job.workflow_version,
                        job.status,
                        job.priority.as_str(),
                        job.attempts,
                        job.max_attempts
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "cancel" => {
            let job_id = single_job_id(&args[1..], "usage: job cancel <job_id>")?;
            let outcome = cancel_job(&context.open_store()?, &job_id).map_err(|e| e.to_string())?;
            Ok(match outcome {
                CancelOutcome::Cancelled => format!("job cancelled\njob={job_id}"),
                CancelOutcome::Requested => {
                    format!("cancel requested\njob={job_id}\nstatus=running")
                }
                CancelOutcome::AlreadyTerminal(status) => {
                    format!("job already terminal\njob={job_id}\nstatus={status}")
                }
            })
        }
        "requeue" => {
            let job_id = single_job_id(&args[1..], "usage: job requeue <job_id>")?;
            let job = requeue_job(&context.open_store()?, &job_id).map_err(|e| e.to_string())?;
            Ok(format!(
                "job requeued\njob={}\nstatus={}\nattempts={}/{}",
                job.job_id, job.status, job.attempts, job.max_attempts
            ))
        }
        other => Err(format!("unknown job subcommand `{other}`")),
    }
}

fn cmd_submit(store: &JobStore, args: &[String]) -> Result<String, String> {
    let mut rest = args.to_vec();
    let priority = take_flag(&mut rest, "--priority")?
        .map(|raw| Priority::parse(&raw))
        .transpose()?
        .unwrap_or_default();
    let attempts = take_flag(&mut rest, "--attempts")?
        .map(|raw| parse_number::<u32>("--attempts", &raw))
        .transpose()?;
    let params = parse_key_value_pairs(&take_repeated_flag(&mut rest, "--param")?)?;
    reject_unknown_flags(&rest)?;
    if rest.len() != 1 {
        return Err(
            "usage: job submit <workflow_id> [--priority P] [--attempts N] [--param k=v]..."
                .to_string(),
        );
    }

    let mut request = NewJob::new(WorkflowId::parse(&rest[0])?).priority(priority);
    if let Some(attempts) = attempts {
        request = request.max_attempts(attempts);
    }
    request.params = params;
    let job = submit_job(store, request).map_err(|e| e.to_string())?;
    Ok(format!(
        "job submitted\njob={}\nworkflow={}\nversion={}\npriority={}\nmax_attempts={}",
        job.job_id,
        job.workflow_id,
        job.workflow_version,
        job.priority.as_str(),
        job.max_attempts
    ))
}

fn single_job_id(args: &[String], usage: &str) -> Result<JobId, String> {
    if args.len() != 1 {
        return Err(usage.to_string());
    }
    JobId::parse(&args[0])
}

fn required_job(store: &JobStore, job_id: &JobId) -> Result<Job, String> {
    store
        .get_job(job_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("job `{job_id}` not found"))
}

fn render_job(job: &Job) -> Vec<String> {
    vec![
        format!("job={}", job.job_id),
        format!("workflow={}", job.workflow_id),
        format!("version={}", job.workflow_version),
        format!("status={}", job.status),
        format!("priority={}", job.priority.as_str()),
        format!("attempts={}/{}", job.attempts, job.max_attempts),
        format!("cancel_requested={}", job.cancel_requested),
        format!(
            "error_code={}",
            job.error_code.map(|code| code.as_str()).unwrap_or("none")
        ),
        format!("error={}", job.error.as_deref().unwrap_or("none")),
        format!("params={}", serde_json::Value::Object(job.params.clone())),
        format!("created_at={}", format_millis(job.created_at)),
        format!("completed_at={}", format_optional_millis(job.completed_at)),
    ]
}

fn render_assignment(assignment: &Assignment) -> String {
    format!(
        "assignment={} attempt={} agent={} node={} status={} progress={} error_code={}",
        assignment.assignment_id,
        assignment.attempt,
        assignment.agent_id,
        assignment.node_id,
        assignment.status,
        assignment.progress,
        assignment
            .error_code
            .map(|code| code.as_str())
            .unwrap_or("none")
    )
}
