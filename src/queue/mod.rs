pub mod claim;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod submit;

pub use claim::{claim_job, claim_next, ClaimOutcome};
pub use dispatch::{dispatch_pending, pending_job_ids, DispatchReport};
pub use error::QueueError;
pub use lifecycle::{
    cancel_job, cancel_requested, complete_assignment, fail_assignment, report_progress,
    requeue_job, start_assignment, CancelOutcome, FailOutcome,
};
pub use model::{Assignment, AssignmentStatus, Job, JobStatus, NewJob, Priority};
pub use submit::{submit_job, MAX_JOB_ATTEMPTS};
