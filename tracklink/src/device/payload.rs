//! Inbound payload decoding
//!
//! Devices in the field do not agree on a schema. Telemetry comes either as
//! `{mac, lat, lng, alt, sats}` or as
//! `{deviceId, latitude, longitude, altitude, satellites}`; rosters come as
//! a bare list, as `{devices: [...]}` or as a single `{mac}`. Both are
//! normalized here.

use super::record::DeviceId;

use serde::Deserialize;
use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("unexpected payload shape: {0}")]
    Shape(#[source] serde_json::Error),

    #[error("payload carries no device identifier")]
    MissingIdentifier,

    #[error("payload from {0} carries no position")]
    MissingPosition(DeviceId),
}

fn parse(raw: &[u8]) -> Result<serde_json::Value, PayloadError> {
    serde_json::from_slice(raw).map_err(PayloadError::Syntax)
}

/// Canonical position report.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub id: DeviceId,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub satellites: u32,
}

/// Union of every field name seen in the wild.
#[derive(Debug, Deserialize)]
struct RawTelemetry {
    mac: Option<Value>,
    #[serde(rename = "deviceId")]
    device_id: Option<Value>,
    lat: Option<f64>,
    lng: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    alt: Option<f64>,
    altitude: Option<f64>,
    sats: Option<Number>,
    satellites: Option<Number>,
}

/// Identifiers arrive as strings or, from some firmware, as bare numbers.
/// Empty strings and zero count as absent.
fn identifier(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Satellite counts may be sent as floats. Anything that is not a positive
/// count in range counts as absent.
fn count(value: Option<Number>) -> Option<u32> {
    let value = value?;
    let n = match value.as_u64() {
        Some(n) => u32::try_from(n).ok()?,
        None => {
            let f = value.as_f64()?;
            if !f.is_finite() || f < 0.0 || f > u32::MAX as f64 {
                return None;
            }
            f as u32
        }
    };
    (n > 0).then_some(n)
}

impl Telemetry {
    pub fn decode(raw: &[u8]) -> Result<Telemetry, PayloadError> {
        let value = parse(raw)?;
        let raw: RawTelemetry = serde_json::from_value(value).map_err(PayloadError::Shape)?;

        let id = match identifier(raw.mac).or_else(|| identifier(raw.device_id)) {
            Some(id) => DeviceId(id),
            None => return Err(PayloadError::MissingIdentifier),
        };

        let (latitude, longitude) = match (raw.lat.or(raw.latitude), raw.lng.or(raw.longitude)) {
            (Some(lat), Some(lng)) => (lat, lng),
            _ => return Err(PayloadError::MissingPosition(id)),
        };

        Ok(Telemetry {
            id,
            latitude,
            longitude,
            altitude: raw.alt.or(raw.altitude).unwrap_or(0.0),
            satellites: count(raw.sats).or_else(|| count(raw.satellites)).unwrap_or(0),
        })
    }
}

/// Accepted roster shapes, tried in this order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PresencePayload {
    Roster(Vec<DeviceId>),
    Listing { devices: Vec<DeviceId> },
    Single { mac: DeviceId },
}

impl PresencePayload {
    pub fn decode(raw: &[u8]) -> Result<PresencePayload, PayloadError> {
        let value = parse(raw)?;
        serde_json::from_value(value).map_err(PayloadError::Shape)
    }

    /// Identifiers of the devices currently online.
    pub fn into_ids(self) -> Vec<DeviceId> {
        match self {
            PresencePayload::Roster(ids) => ids,
            PresencePayload::Listing { devices } => devices,
            PresencePayload::Single { mac } => vec![mac],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_telemetry_schemas_normalize() {
        let short = Telemetry::decode(br#"{"mac":"AA","lat":1.5,"lng":-2.25}"#).unwrap();
        assert_eq!(
            short,
            Telemetry {
                id: DeviceId::new("AA"),
                latitude: 1.5,
                longitude: -2.25,
                altitude: 0.0,
                satellites: 0,
            }
        );
        let long = Telemetry::decode(
            br#"{"deviceId":"AA","latitude":1.5,"longitude":-2.25,"altitude":5,"satellites":7}"#,
        )
        .unwrap();
        assert_eq!(long.id, short.id);
        assert_eq!((long.latitude, long.longitude), (1.5, -2.25));
        assert_eq!(long.altitude, 5.0);
        assert_eq!(long.satellites, 7);
    }

    #[test]
    fn identifier_falls_back_to_device_id() {
        let t = Telemetry::decode(br#"{"mac":"","deviceId":"BB","lat":0,"lng":0}"#).unwrap();
        assert_eq!(t.id.as_str(), "BB");
        assert!(matches!(
            Telemetry::decode(br#"{"lat":1,"lng":2}"#),
            Err(PayloadError::MissingIdentifier)
        ));
        assert!(matches!(
            Telemetry::decode(br#"{"mac":"","lat":1,"lng":2}"#),
            Err(PayloadError::MissingIdentifier)
        ));
    }

    #[test]
    fn satellite_counts_tolerate_floats() {
        let sats = |raw: &[u8]| Telemetry::decode(raw).unwrap().satellites;
        assert_eq!(sats(br#"{"mac":"A","lat":1,"lng":2,"sats":7.0}"#), 7);
        assert_eq!(sats(br#"{"mac":"A","lat":1,"lng":2,"satellites":9.6}"#), 9);
        assert_eq!(sats(br#"{"mac":"A","lat":1,"lng":2,"sats":-3}"#), 0);
        assert_eq!(sats(br#"{"mac":"A","lat":1,"lng":2,"sats":1e12}"#), 0);
        assert_eq!(
            sats(br#"{"mac":"A","lat":1,"lng":2,"sats":0,"satellites":4}"#),
            4
        );
    }

    #[test]
    fn numeric_identifiers_become_strings() {
        let t = Telemetry::decode(br#"{"mac":42,"lat":1,"lng":2}"#).unwrap();
        assert_eq!(t.id.as_str(), "42");
        let t = Telemetry::decode(br#"{"mac":0,"deviceId":"BB","lat":1,"lng":2}"#).unwrap();
        assert_eq!(t.id.as_str(), "BB");
        assert!(matches!(
            Telemetry::decode(br#"{"mac":[1],"lat":1,"lng":2}"#),
            Err(PayloadError::MissingIdentifier)
        ));
    }

    #[test]
    fn bad_telemetry() {
        assert!(matches!(
            Telemetry::decode(b"{not json"),
            Err(PayloadError::Syntax(_))
        ));
        assert!(matches!(
            Telemetry::decode(br#"{"mac":"AA","lat":"north","lng":2}"#),
            Err(PayloadError::Shape(_))
        ));
        match Telemetry::decode(br#"{"mac":"AA","lat":1}"#) {
            Err(PayloadError::MissingPosition(id)) => assert_eq!(id.as_str(), "AA"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn presence_shapes() {
        let ids = |raw: &[u8]| PresencePayload::decode(raw).unwrap().into_ids();
        assert_eq!(ids(br#"["A","B"]"#), vec![DeviceId::new("A"), DeviceId::new("B")]);
        assert_eq!(ids(br#"{"devices":["C"]}"#), vec![DeviceId::new("C")]);
        assert_eq!(ids(br#"{"mac":"D","rssi":-40}"#), vec![DeviceId::new("D")]);
        assert!(ids(br#"{"devices":[]}"#).is_empty());
    }

    #[test]
    fn presence_unknown_shape() {
        assert!(matches!(
            PresencePayload::decode(br#"{"nodes":["A"]}"#),
            Err(PayloadError::Shape(_))
        ));
        assert!(matches!(
            PresencePayload::decode(br#"42"#),
            Err(PayloadError::Shape(_))
        ));
        assert!(matches!(
            PresencePayload::decode(b""),
            Err(PayloadError::Syntax(_))
        ));
    }
}
