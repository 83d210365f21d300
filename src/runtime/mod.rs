pub mod host_worker;
pub mod job_executor;
pub mod logging;
pub mod ownership_lock;
pub mod recovery;
pub mod state_paths;
mod worker_primitives;

pub use crate::shared::errors::RuntimeError;
pub use host_worker::{
    load_worker_status, run_host_worker, save_worker_status, HostWorker, HostWorkerConfig,
    WorkerStatus,
};
pub use job_executor::{runner_options, ExecutionOutcome, JobExecutor};
pub use logging::append_runtime_log;
pub use ownership_lock::{
    cleanup_stale_worker, clear_start_lock, is_process_alive, reserve_start_lock, signal_stop,
    stop_active_worker, stop_signal_requested, worker_ownership_state, OwnershipState,
    StopResult,
};
pub use recovery::{recover_orphaned_assignments, RecoveredAssignment};
pub use state_paths::{bootstrap_state_root, StatePaths};
