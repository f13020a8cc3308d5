use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Device identifier, usually a MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: &str) -> DeviceId {
        DeviceId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compact form used on device buttons: first six characters and an
    /// ellipsis.
    pub fn short_label(&self) -> String {
        let head: String = self.0.chars().take(6).collect();
        format!("{}...", head)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> DeviceId {
        DeviceId::new(id)
    }
}

/// Last known state of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters.
    pub altitude: f64,
    pub satellite_count: u32,
    /// Listed in the most recent presence roster.
    pub present: bool,
    pub last_update: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_label() {
        assert_eq!(DeviceId::new("AA:BB:CC:DD").short_label(), "AA:BB:...");
        assert_eq!(DeviceId::new("abc").short_label(), "abc...");
    }
}
