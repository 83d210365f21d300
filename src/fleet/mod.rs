pub mod error;
pub mod liveness;
pub mod registry;
pub mod slots;

pub use error::FleetError;
pub use liveness::{classify_liveness, Liveness, LivenessThresholds};
pub use registry::{
    AgentStatus, DiscoveredDevice, FleetRegistry, HeartbeatOutcome, ReleaseOutcome, SyncReport,
};
pub use slots::{SlotAllocation, SlotMap, SlotMapSnapshot};
