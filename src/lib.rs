pub mod app;
pub mod config;
pub mod device;
pub mod fleet;
pub mod orchestration;
pub mod queue;
pub mod runtime;
pub mod shared;
pub mod store;
pub mod template;
pub mod verification;
pub mod workflow;
