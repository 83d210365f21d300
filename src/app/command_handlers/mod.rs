use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::{split_state_root, CliContext};

pub mod daemon;
pub mod fleet;
pub mod jobs;
pub mod setup;
pub mod workflows;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let (state_root, args) = split_state_root(args)?;
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Help => Ok(help_text()),
        CliVerb::Setup => setup::cmd_setup(state_root),
        CliVerb::Workflow => workflows::cmd_workflow(&CliContext::load(state_root)?, &args[1..]),
        CliVerb::Job => jobs::cmd_job(&CliContext::load(state_root)?, &args[1..]),
        CliVerb::Fleet => fleet::cmd_fleet(&CliContext::load(state_root)?, &args[1..]),
        CliVerb::Worker => daemon::cmd_worker(&CliContext::load(state_root)?, &args[1..]),
        CliVerb::Unknown => Err(format!("unknown command `{}`\n\n{}", args[0], help_text())),
    }
}
