use crate::config::FleetSettings;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Online,
    /// Heartbeat present but stale, or the device reported itself unusable.
    Degraded,
    Offline,
}

impl Liveness {
    pub fn as_str(self) -> &'static str {
        match self {
            Liveness::Online => "online",
            Liveness::Degraded => "degraded",
            Liveness::Offline => "offline",
        }
    }
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    pub online: Duration,
    pub offline: Duration,
}

impl LivenessThresholds {
    pub fn from_settings(settings: &FleetSettings) -> Self {
        Self {
            online: settings.online_threshold,
            offline: settings.offline_threshold,
        }
    }
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self::from_settings(&FleetSettings::default())
    }
}

/// Classifies an agent from its last heartbeat (unix millis) and responsiveness.
pub fn classify_liveness(
    last_heartbeat_at: i64,
    responsive: bool,
    now: i64,
    thresholds: &LivenessThresholds,
) -> Liveness {
    let age_ms = now.saturating_sub(last_heartbeat_at).max(0) as u128;
    if age_ms > thresholds.offline.as_millis() {
        Liveness::Offline
    } else if responsive && age_ms <= thresholds.online.as_millis() {
        Liveness::Online
    } else {
        Liveness::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> LivenessThresholds {
        LivenessThresholds {
            online: Duration::from_secs(30),
            offline: Duration::from_secs(120),
        }
    }

    #[test]
    fn classification_follows_heartbeat_age() {
        let now = 1_000_000;
        assert_eq!(classify_liveness(now - 5_000, true, now, &thresholds()), Liveness::Online);
        assert_eq!(classify_liveness(now - 31_000, true, now, &thresholds()), Liveness::Degraded);
        assert_eq!(classify_liveness(now - 121_000, true, now, &thresholds()), Liveness::Offline);
    }

    #[test]
    fn unresponsive_device_is_degraded_even_when_fresh() {
        let now = 1_000_000;
        assert_eq!(classify_liveness(now, false, now, &thresholds()), Liveness::Degraded);
        assert_eq!(classify_liveness(now - 200_000, false, now, &thresholds()), Liveness::Offline);
    }
}
