use super::error::StepError;
use crate::shared::ids::AgentId;
use crate::verification::ArtifactProbe;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// The agent a run executes on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRef {
    pub agent_id: AgentId,
    pub serial: String,
}

/// Side-effecting step actions. Implementations must honour `timeout` themselves and
/// release any process they started when it expires.
pub trait StepActions: Send + Sync {
    fn remote_command(
        &self,
        agent: &AgentRef,
        command: &str,
        args: &[Value],
        timeout: Duration,
    ) -> Result<Value, StepError>;

    fn scripted_action(
        &self,
        agent: &AgentRef,
        script: &str,
        params: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, StepError>;

    fn artifact_probe(&self, agent: &AgentRef) -> Box<dyn ArtifactProbe>;
}
