pub mod actions;
pub mod adb;
pub mod error;
pub mod process;
pub mod script;

pub use actions::DeviceStepActions;
pub use adb::{
    hardware_fingerprint, parse_device_list, AdbArtifactProbe, AdbTransport, DeviceDiscovery,
    DeviceListing,
};
pub use error::TransportError;
pub use process::{run_checked, run_with_timeout, run_with_timeout_logged, ProcessOutput};
pub use script::{CompletionMarker, HandoffFiles, ScriptHandoff};
