pub mod actions;
pub mod context;
pub mod error;
pub mod events;
pub mod retry;
pub mod runner;

pub use actions::{AgentRef, StepActions};
pub use context::{AbortHandle, ExecutionContext};
pub use error::{ErrorCode, RunError, StepError};
pub use events::RunEvent;
pub use retry::retry_delay;
pub use runner::{
    RunFailure, RunOutcome, RunState, RunnerOptions, StepResult, StepStatus, WorkflowRunner,
};
