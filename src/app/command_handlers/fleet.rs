use crate::app::command_support::{format_millis, CliContext};
use crate::fleet::{FleetRegistry, LivenessThresholds, ReleaseOutcome, SlotMap};
use crate::shared::ids::AgentId;

fn open_registry(context: &CliContext) -> Result<FleetRegistry, String> {
    let settings = &context.settings;
    Ok(FleetRegistry::new(
        context.open_store()?,
        SlotMap::new(context.paths.slot_map_path(), settings.fleet.slot_capacity),
        settings.node_id.clone(),
        LivenessThresholds::from_settings(&settings.fleet),
    )
    .with_log_path(context.paths.runtime_log_path()))
}

pub fn cmd_fleet(context: &CliContext, args: &[String]) -> Result<String, String> {
    match args.first().map(String::as_str) {
        Some("list") if args.len() == 1 => {
            let registry = open_registry(context)?;
            let agents = registry.list_agents().map_err(|e| e.to_string())?;
            if agents.is_empty() {
                return Ok("agents=none".to_string());
            }
            Ok(agents
                .iter()
                .map(|status| {
                    let agent = &status.agent;
                    format!(
                        "agent={} node={} serial={} model={} slot={} liveness={} last_heartbeat={} assignment={}",
                        agent.agent_id,
                        agent.node_id,
                        agent.serial,
                        agent.model.as_deref().unwrap_or("unknown"),
                        agent.slot,
                        status.liveness,
                        format_millis(agent.last_heartbeat_at),
                        agent
                            .current_assignment
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "none".to_string()),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Some("list") => Err("usage: fleet list".to_string()),
        Some("release") if args.len() == 2 => {
            let agent_id = AgentId::parse(&args[1])?;
            match open_registry(context)?
                .release_agent(&agent_id)
                .map_err(|e| e.to_string())?
            {
                ReleaseOutcome::Released { agent_id, slot } => Ok(format!(
                    "released=true\nagent={agent_id}\nslot={}",
                    slot.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
                )),
                ReleaseOutcome::Busy { assignment_id } => Err(format!(
                    "agent `{agent_id}` is busy with assignment `{}`",
                    assignment_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                )),
                ReleaseOutcome::Unknown => Err(format!("unknown agent `{agent_id}`")),
            }
        }
        Some("release") => Err("usage: fleet release <agent_id>".to_string()),
        Some(other) => Err(format!("unknown fleet subcommand `{other}`")),
        None => Err("usage: fleet list".to_string()),
    }
}
