use crate::app::command_support::{
    format_millis, parse_number, reject_unknown_flags, take_flag, CliContext,
};
use crate::shared::ids::WorkflowId;
use crate::workflow::WorkflowDefinition;
use std::fs;

pub fn cmd_workflow(context: &CliContext, args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: workflow <deploy|list|show> ...".to_string());
    }

    match args[0].as_str() {
        "deploy" => {
            if args.len() != 2 {
                return Err("usage: workflow deploy <file.yaml>".to_string());
            }
            let raw = fs::read_to_string(&args[1])
                .map_err(|e| format!("failed to read {}: {e}", args[1]))?;
            let definition = WorkflowDefinition::parse(&raw).map_err(|e| e.to_string())?;
            let record = context
                .open_store()?
                .deploy_workflow(&definition, &raw)
                .map_err(|e| e.to_string())?;
            Ok(format!(
                "workflow deployed\nworkflow={}\nversion={}\nsteps={}",
                record.workflow_id, record.version, record.step_count
            ))
        }
        "list" => {
            if args.len() != 1 {
                return Err("usage: workflow list".to_string());
            }
            let records = context
                .open_store()?
                .list_workflows()
                .map_err(|e| e.to_string())?;
            if records.is_empty() {
                return Ok("workflows=none".to_string());
            }
            Ok(records
                .iter()
                .map(|record| {
                    format!(
                        "workflow={} version={} steps={} deployed_at={}",
                        record.workflow_id,
                        record.version,
                        record.step_count,
                        format_millis(record.deployed_at)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "show" => {
            let mut rest = args[1..].to_vec();
            let version = take_flag(&mut rest, "--version")?
                .map(|raw| parse_number::<u32>("--version", &raw))
                .transpose()?;
            reject_unknown_flags(&rest)?;
            if rest.len() != 1 {
                return Err("usage: workflow show <workflow_id> [--version N]".to_string());
            }
            let workflow_id = WorkflowId::parse(&rest[0])?;
            let store = context.open_store()?;
            let record = match version {
                Some(version) => store.workflow_version(&workflow_id, version),
                None => store.latest_workflow(&workflow_id),
            }
            .map_err(|e| e.to_string())?;
            Ok(format!(
                "workflow={}\nversion={}\ndeployed_at={}\n---\n{}",
                record.workflow_id,
                record.version,
                format_millis(record.deployed_at),
                record.document.trim_end()
            ))
        }
        other => Err(format!("unknown workflow subcommand `{other}`")),
    }
}
