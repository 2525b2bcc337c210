use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Refresh-cadence tuning. All values overridable; defaults match the
/// documented configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CadenceConfig {
    /// Interval when the user is neither active nor idle long enough to slow down.
    pub base_interval: Duration,
    /// Interval while the user is actively interacting.
    pub active_interval: Duration,
    /// Interval while any entity needs immediate attention. Urgency always wins.
    pub urgent_interval: Duration,
    /// Inactivity beyond this doubles the base interval.
    pub inactive_threshold: Duration,
    /// Inactivity beyond this quadruples the base interval.
    pub max_inactive_time: Duration,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(15),
            active_interval: Duration::from_secs(5),
            urgent_interval: Duration::from_secs(2),
            inactive_threshold: Duration::from_secs(30),
            max_inactive_time: Duration::from_secs(300),
        }
    }
}

/// Exponential-backoff settings for the reconnection loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub cadence: CadenceConfig,
    pub reconnect: ReconnectConfig,
    /// How many ranked teams the bounded display surfaces.
    pub display_limit: usize,
    /// Delay before the extra full refresh that backs up a help event.
    pub urgency_backstop_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence: CadenceConfig::default(),
            reconnect: ReconnectConfig::default(),
            display_limit: 8,
            urgency_backstop_delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let config = MonitorConfig::default();
        assert_eq!(config.cadence.base_interval, Duration::from_secs(15));
        assert_eq!(config.cadence.active_interval, Duration::from_secs(5));
        assert_eq!(config.cadence.urgent_interval, Duration::from_secs(2));
        assert_eq!(config.cadence.inactive_threshold, Duration::from_secs(30));
        assert_eq!(config.cadence.max_inactive_time, Duration::from_secs(300));
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_delay, Duration::from_millis(30000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.display_limit, 8);
    }

    #[test]
    fn partial_override_keeps_remaining_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"display_limit": 4}"#).expect("parse");
        assert_eq!(config.display_limit, 4);
        assert_eq!(config.cadence, CadenceConfig::default());
    }
}
