pub mod definition;
pub mod document;
pub mod error;
pub mod params;
pub mod validate;

pub use definition::{
    LoopCount, ParamSpec, RetrySpec, StepAction, SystemDirective, WaitDuration,
    WorkflowDefinition, WorkflowStep,
};
pub use document::{
    ActionDocument, BackoffStrategy, CountValue, OnErrorPolicy, ParamDocument, ParamType,
    ParamValidation, RetryDocument, StepDocument, WorkflowDocument,
};
pub use error::ValidationError;
pub use params::resolve_params;
pub use validate::{MAX_LOOP_COUNT, MAX_RETRY_ATTEMPTS};
