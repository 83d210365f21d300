#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Setup,
    Workflow,
    Job,
    Fleet,
    Worker,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "setup" => CliVerb::Setup,
        "workflow" => CliVerb::Workflow,
        "job" => CliVerb::Job,
        "fleet" => CliVerb::Fleet,
        "worker" => CliVerb::Worker,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Usage: farmctl [--state-root DIR] <command> ...".to_string(),
        String::new(),
        "Commands:".to_string(),
        "  setup                                Initialize the state root, settings and job store"
            .to_string(),
        "  workflow deploy <file.yaml>          Validate and deploy a workflow document".to_string(),
        "  workflow list                        List deployed workflow versions".to_string(),
        "  workflow show <id> [--version N]     Print a deployed workflow document".to_string(),
        "  job submit <workflow_id> [--priority P] [--attempts N] [--param k=v]..."
            .to_string(),
        "                                       Submit a job against the latest version"
            .to_string(),
        "  job status <job_id>                  Show a job and its assignments".to_string(),
        "  job list [--status S] [--limit N]    List jobs, newest first".to_string(),
        "  job cancel <job_id>                  Cancel a job (cooperative when running)"
            .to_string(),
        "  job requeue <job_id>                 Requeue a failed job with one more attempt"
            .to_string(),
        "  fleet list                           List agents and their liveness".to_string(),
        "  fleet release <agent_id>             Free an idle agent's slot for other hardware"
            .to_string(),
        "  worker run                           Run the host worker in the foreground".to_string(),
        "  worker stop                          Stop the running host worker".to_string(),
        "  worker status                        Show host worker ownership and health".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_and_unknown_falls_through() {
        assert_eq!(parse_cli_verb("job"), CliVerb::Job);
        assert_eq!(parse_cli_verb("--help"), CliVerb::Help);
        assert_eq!(parse_cli_verb("start"), CliVerb::Unknown);
    }

    #[test]
    fn help_mentions_every_verb() {
        let help = help_text();
        for verb in ["setup", "workflow deploy", "job submit", "fleet list", "worker stop"] {
            assert!(help.contains(verb), "help is missing `{verb}`");
        }
    }
}
