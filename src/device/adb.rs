use super::error::{io_error, TransportError};
use super::process::{run_checked, run_with_timeout_logged, ProcessOutput};
use crate::config::TransportSettings;
use crate::fleet::DiscoveredDevice;
use crate::verification::ArtifactProbe;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One line of `adb devices -l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
}

impl DeviceListing {
    /// `device` is the only state in which adb will accept commands.
    pub fn is_ready(&self) -> bool {
        self.state == "device"
    }

    pub fn fingerprint(&self) -> String {
        hardware_fingerprint(&self.serial, self.model.as_deref())
    }

    pub fn to_discovered(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            fingerprint: self.fingerprint(),
            serial: self.serial.clone(),
            model: self.model.clone(),
            responsive: self.is_ready(),
        }
    }
}

/// Stable across reconnects: the serial and model survive USB re-enumeration.
pub fn hardware_fingerprint(serial: &str, model: Option<&str>) -> String {
    let digest = Sha256::digest(format!("{serial}|{}", model.unwrap_or_default()).as_bytes());
    format!("{digest:x}")
}

pub fn parse_device_list(raw: &str) -> Vec<DeviceListing> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?.to_string();
            let state = tokens.next()?.to_string();
            let mut listing = DeviceListing {
                serial,
                state,
                model: None,
                product: None,
            };
            for token in tokens {
                match token.split_once(':') {
                    Some(("model", value)) => listing.model = Some(value.to_string()),
                    Some(("product", value)) => listing.product = Some(value.to_string()),
                    _ => {}
                }
            }
            Some(listing)
        })
        .collect()
}

/// Quotes one argument for the device-side shell that `adb shell` hands its arguments to.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:=%@,+".contains(ch))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Source of the devices currently attached to this host.
pub trait DeviceDiscovery: Send {
    fn discover(&self) -> Result<Vec<DiscoveredDevice>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct AdbTransport {
    binary: String,
    command_timeout: Duration,
    log_path: Option<PathBuf>,
}

impl AdbTransport {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
            log_path: None,
        }
    }

    /// Failed process-group kills after a timeout are recorded here.
    pub fn with_log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self::new(settings.adb_binary.clone(), settings.command_timeout)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn devices(&self) -> Result<Vec<DeviceListing>, TransportError> {
        let args = vec!["devices".to_string(), "-l".to_string()];
        let output = run_checked(&self.binary, &args, self.command_timeout, self.log_path.as_deref())?;
        Ok(parse_device_list(&output.stdout))
    }

    /// Runs a device shell command. Arguments are quoted individually.
    pub fn shell(
        &self,
        serial: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutput, TransportError> {
        let mut full = vec!["-s".to_string(), serial.to_string(), "shell".to_string()];
        full.extend(args.iter().map(|arg| shell_quote(arg)));
        run_with_timeout_logged(&self.binary, &full, timeout, self.log_path.as_deref())
    }

    pub fn push(
        &self,
        serial: &str,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if !local.exists() {
            return Err(io_error(
                local,
                io::Error::new(io::ErrorKind::NotFound, "local file missing"),
            ));
        }
        let args = vec![
            "-s".to_string(),
            serial.to_string(),
            "push".to_string(),
            local.display().to_string(),
            remote.to_string(),
        ];
        run_checked(&self.binary, &args, timeout, self.log_path.as_deref()).map(|_| ())
    }

    pub fn pull(
        &self,
        serial: &str,
        remote: &str,
        local: &Path,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        let args = vec![
            "-s".to_string(),
            serial.to_string(),
            "pull".to_string(),
            remote.to_string(),
            local.display().to_string(),
        ];
        run_checked(&self.binary, &args, timeout, self.log_path.as_deref()).map(|_| ())
    }
}

impl DeviceDiscovery for AdbTransport {
    fn discover(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(self
            .devices()?
            .iter()
            .map(DeviceListing::to_discovered)
            .collect())
    }
}

/// Reads artifact sizes on the device with `stat`.
#[derive(Debug, Clone)]
pub struct AdbArtifactProbe {
    transport: AdbTransport,
    serial: String,
}

impl AdbArtifactProbe {
    pub fn new(transport: AdbTransport, serial: impl Into<String>) -> Self {
        Self {
            transport,
            serial: serial.into(),
        }
    }
}

impl ArtifactProbe for AdbArtifactProbe {
    fn size_of(&self, path: &str) -> io::Result<Option<u64>> {
        let args = vec!["stat".to_string(), "-c".to_string(), "%s".to_string(), path.to_string()];
        let output = self
            .transport
            .shell(&self.serial, &args, self.transport.command_timeout)
            .map_err(io::Error::other)?;
        parse_stat_output(&output)
    }
}

fn parse_stat_output(output: &ProcessOutput) -> io::Result<Option<u64>> {
    let combined = format!("{}{}", output.stdout, output.stderr);
    if combined.contains("No such file") {
        return Ok(None);
    }
    if !output.success() {
        return Err(io::Error::other(format!(
            "stat exited with {:?}: {}",
            output.exit_code,
            combined.trim()
        )));
    }
    output
        .stdout
        .trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| io::Error::other(format!("unexpected stat output `{}`", output.stdout.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "List of devices attached\n\
        * daemon started successfully\n\
        emulator-5554          device product:sdk_gphone64 model:Pixel_7 device:emu64x transport_id:1\n\
        R58M12345              unauthorized usb:1-1 transport_id:2\n\n";

    #[test]
    fn parses_device_listing_and_states() {
        let devices = parse_device_list(LISTING);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].model.as_deref(), Some("Pixel_7"));
        assert!(devices[0].is_ready());
        assert_eq!(devices[1].state, "unauthorized");
        assert!(!devices[1].to_discovered().responsive);
    }

    #[test]
    fn fingerprint_is_stable_and_model_sensitive() {
        let a = hardware_fingerprint("R58M12345", Some("SM-G991B"));
        assert_eq!(a, hardware_fingerprint("R58M12345", Some("SM-G991B")));
        assert_ne!(a, hardware_fingerprint("R58M12345", Some("SM-G998B")));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn shell_quote_wraps_unsafe_arguments() {
        assert_eq!(shell_quote("/sdcard/a.png"), "/sdcard/a.png");
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn stat_output_maps_missing_files_to_none() {
        let missing = ProcessOutput {
            stdout: String::new(),
            stderr: "stat: '/sdcard/x.png': No such file or directory\n".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(parse_stat_output(&missing).expect("missing"), None);

        let present = ProcessOutput {
            stdout: "4096\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        assert_eq!(parse_stat_output(&present).expect("present"), Some(4096));
    }
}
