//! Tracker configuration
//!
//! Loaded once at startup from a YAML file; every section is optional and
//! falls back to the defaults below. Example:
//!
//! ```yaml
//! endpoints:
//!   - address: mqtt://broker.emqx.io:1883
//!     name: EMQX Public
//! topics:
//!   telemetry: iotlab/gps/data
//!   presence: iotlab/nodes/status
//! failover:
//!   rotation_delay_secs: 5
//!   manual_cooldown_secs: 30
//! ```

use crate::link::{EndpointDescriptor, EndpointError, EndpointList, SessionOptions};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid endpoint pool: {0}")]
    Endpoints(#[from] EndpointError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The two topics the tracker consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    /// Per-device position reports.
    pub telemetry: String,
    /// Roster of devices currently online.
    pub presence: String,
}

impl Default for Topics {
    fn default() -> Self {
        Topics {
            telemetry: "iotlab/gps/data".to_string(),
            presence: "iotlab/nodes/status".to_string(),
        }
    }
}

impl Topics {
    pub fn all(&self) -> Vec<String> {
        vec![self.telemetry.clone(), self.presence.clone()]
    }
}

/// Template for the options of every session. The client identifier is
/// randomized per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub reconnect_period_ms: u64,
    pub connect_timeout_secs: u64,
    pub client_id_prefix: String,
}

impl Default for SessionParams {
    fn default() -> Self {
        SessionParams {
            keep_alive_secs: 60,
            clean_session: true,
            reconnect_period_ms: 1000,
            connect_timeout_secs: 30,
            client_id_prefix: "tracker_".to_string(),
        }
    }
}

impl SessionParams {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_session: self.clean_session,
            reconnect_period: Duration::from_millis(self.reconnect_period_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            client_id: format!("{}{:08x}", self.client_id_prefix, rand::random::<u32>()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSettings {
    /// Wait after a failure before moving to the next endpoint.
    pub rotation_delay_secs: u64,
    /// How long a manual endpoint choice suspends automatic rotation.
    pub manual_cooldown_secs: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        FailoverSettings {
            rotation_delay_secs: 5,
            manual_cooldown_secs: 30,
        }
    }
}

impl FailoverSettings {
    pub fn rotation_delay(&self) -> Duration {
        Duration::from_secs(self.rotation_delay_secs)
    }

    pub fn manual_cooldown(&self) -> Duration {
        Duration::from_secs(self.manual_cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    /// Zoom level used when centering on a device.
    pub focus_zoom: u8,
    /// Margin added around all devices by "show all", as a fraction of the
    /// bounding box.
    pub fit_padding: f64,
}

impl Default for ViewSettings {
    fn default() -> Self {
        ViewSettings {
            focus_zoom: 15,
            fit_padding: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub endpoints: Vec<EndpointDescriptor>,
    pub topics: Topics,
    pub session: SessionParams,
    pub failover: FailoverSettings,
    pub view: ViewSettings,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            endpoints: EndpointList::default_pool(),
            topics: Topics::default(),
            session: SessionParams::default(),
            failover: FailoverSettings::default(),
            view: ViewSettings::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<TrackerConfig, ConfigError> {
        let config: TrackerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<TrackerConfig, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn endpoint_list(&self) -> Result<EndpointList, ConfigError> {
        Ok(EndpointList::new(self.endpoints.clone())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_list()?;
        if self.topics.telemetry.is_empty() || self.topics.presence.is_empty() {
            return Err(ConfigError::Invalid("topic names cannot be empty".into()));
        }
        if self.topics.telemetry == self.topics.presence {
            return Err(ConfigError::Invalid(
                "telemetry and presence topics must differ".into(),
            ));
        }
        if self.session.keep_alive_secs > u16::MAX as u64 {
            return Err(ConfigError::Invalid(format!(
                "keep-alive of {}s exceeds the protocol limit",
                self.session.keep_alive_secs
            )));
        }
        if !(self.view.fit_padding >= 0.0) {
            return Err(ConfigError::Invalid("fit padding must be >= 0".into()));
        }
        Ok(())
    }
}
