use crate::app::command_support::{format_optional_millis, CliContext};
use crate::runtime::{
    load_worker_status, run_host_worker, stop_active_worker, worker_ownership_state,
    OwnershipState, RuntimeError,
};
use std::time::Duration;

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

pub fn cmd_worker(context: &CliContext, args: &[String]) -> Result<String, String> {
    match args {
        [verb] if verb == "run" => cmd_run(context),
        [verb] if verb == "stop" => cmd_stop(context),
        [verb] if verb == "status" => cmd_status(context),
        [other, ..] if !matches!(other.as_str(), "run" | "stop" | "status") => {
            Err(format!("unknown worker subcommand `{other}`"))
        }
        _ => Err("usage: worker <run|stop|status>".to_string()),
    }
}

/// Foreground run; returns once the worker was stopped and in-flight runs drained.
pub fn cmd_run(context: &CliContext) -> Result<String, String> {
    run_host_worker(&context.paths.root, context.settings.clone()).map_err(|e| e.to_string())?;
    Ok(format!(
        "worker stopped\nstate_root={}\nnode_id={}",
        context.paths.root.display(),
        context.settings.node_id
    ))
}

pub fn cmd_stop(context: &CliContext) -> Result<String, String> {
    match stop_active_worker(&context.paths, STOP_TIMEOUT) {
        Ok(result) => Ok(format!(
            "stopped\npid={}\nforced={}",
            result.pid, result.forced
        )),
        Err(RuntimeError::NotRunning) => Ok("stopped\nrunning=false".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn cmd_status(context: &CliContext) -> Result<String, String> {
    let ownership = worker_ownership_state(&context.paths).map_err(|e| e.to_string())?;
    let status = load_worker_status(&context.paths).map_err(|e| e.to_string())?;
    let (ownership, pid) = match ownership {
        OwnershipState::Running { pid } => ("running", Some(pid)),
        OwnershipState::Stale => ("stale", None),
        OwnershipState::NotRunning => ("stopped", None),
    };
    Ok(format!(
        "ownership={}\npid={}\nnode_id={}\nin_flight={}\nagents={}\nstarted_at={}\nlast_heartbeat_at={}\nstopped_at={}\nlast_error={}",
        ownership,
        pid.map(|pid| pid.to_string())
            .unwrap_or_else(|| "none".to_string()),
        status
            .node_id
            .unwrap_or_else(|| context.settings.node_id.to_string()),
        status.in_flight,
        status.agents,
        format_optional_millis(status.started_at),
        format_optional_millis(status.last_heartbeat_at),
        format_optional_millis(status.stopped_at),
        status.last_error.as_deref().unwrap_or("none")
    ))
}
