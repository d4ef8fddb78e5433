//! Data models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::errors::TrackerError;
use serde_helpers::*;

/// Maritime Mobile Service Identity (MMSI)
///
/// A unique nine-digit number for identifying vessels in AIS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mmsi(u32);

impl TryFrom<u32> for Mmsi {
    type Error = TrackerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > 999_999_999 {
            return Err(TrackerError::InvalidMmsi(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Mmsi {
    type Error = TrackerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| TrackerError::InvalidMmsi(value.to_string()))?;
        Self::try_from(parsed)
    }
}

impl FromStr for Mmsi {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl fmt::Display for Mmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Mmsi {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl Mmsi {
    /// Get the raw MMSI value
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Parse a comma-separated MMSI list, e.g. `"248692000, 215123000"`.
///
/// Empty entries are skipped silently, unparsable entries with a warning.
/// Duplicates are removed while keeping the first occurrence order.
pub fn parse_mmsi_list(value: &str) -> Vec<Mmsi> {
    let mut list: Vec<Mmsi> = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match Mmsi::try_from(part) {
            Ok(mmsi) if !list.contains(&mmsi) => list.push(mmsi),
            Ok(_) => {}
            Err(e) => warn!("Skipping identifier {:?}: {}", part, e),
        }
    }
    list
}

/// Normalized vessel position, shared by every provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub mmsi: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Course over ground in degrees
    pub course: Option<f64>,
    /// Speed over ground in knots
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// ISO-8601 timestamp as reported by the provider
    pub timestamp: String,
}

impl PositionRecord {
    pub fn mmsi(&self) -> Result<Mmsi, TrackerError> {
        Mmsi::try_from(self.mmsi.as_str())
    }
}

/// Position fields as extracted from a vendor payload, before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPosition {
    pub mmsi: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: Option<String>,
}

impl TryFrom<RawPosition> for PositionRecord {
    type Error = TrackerError;

    /// Identifier, latitude and longitude are required. AIS uses 91 and 181
    /// for "not available" coordinates, so anything outside the valid range
    /// counts as missing.
    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        let mmsi = raw
            .mmsi
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| TrackerError::InvalidPosition("missing MMSI".to_string()))
            .and_then(Mmsi::try_from)?;

        let latitude = raw
            .latitude
            .filter(|lat| lat.is_finite() && (-90.0..=90.0).contains(lat))
            .ok_or_else(|| {
                TrackerError::InvalidPosition(format!("missing latitude for MMSI {}", mmsi))
            })?;
        let longitude = raw
            .longitude
            .filter(|lon| lon.is_finite() && (-180.0..=180.0).contains(lon))
            .ok_or_else(|| {
                TrackerError::InvalidPosition(format!("missing longitude for MMSI {}", mmsi))
            })?;

        Ok(PositionRecord {
            mmsi: mmsi.to_string(),
            latitude,
            longitude,
            course: raw.course.filter(|v| v.is_finite()),
            speed: raw.speed.filter(|v| v.is_finite()),
            heading: raw.heading.filter(|v| v.is_finite()),
            timestamp: raw.timestamp.unwrap_or_else(now_timestamp),
        })
    }
}

/// Current UTC time in RFC 3339 format
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Kind of entity owning a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Place,
    Event,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Place => "place",
            EntityKind::Event => "event",
        }
    }
}

impl FromStr for EntityKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "place" => Ok(EntityKind::Place),
            "event" => Ok(EntityKind::Event),
            other => Err(TrackerError::InvalidSubscription(format!(
                "invalid entity kind {:?}, must be \"place\" or \"event\"",
                other
            ))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Place or event identity of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl SubscriptionKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Tracking configuration of a place or event, as stored by the CRUD layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingConfig {
    pub name: Option<String>,
    pub provider: Option<String>,
    pub credentials: Option<String>,
    /// Comma-separated MMSI list
    pub identifiers: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Active request to track one or more vessels with one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub key: SubscriptionKey,
    pub name: Option<String>,
    pub provider: String,
    #[serde(skip)]
    pub credentials: Option<String>,
    pub identifiers: Vec<Mmsi>,
    /// Static coordinates shown until the first live position arrives
    pub initial_latitude: Option<f64>,
    pub initial_longitude: Option<f64>,
}

/// Vessel location from the Digitraffic MQTT feed
///
/// See: https://meri.digitraffic.fi/swagger/#/AIS%20V1/vesselLocationsByMssiAndTimestamp
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct VesselLocation {
    /// Location record timestamp in seconds from Unix epoch.
    pub time: i64,
    /// Speed over ground in knots, None if not available (=102.3)
    #[serde(deserialize_with = "deserialize_sog")]
    pub sog: Option<f64>,
    /// Course over ground in degrees, None if not available (360)
    #[serde(deserialize_with = "deserialize_cog")]
    pub cog: Option<f64>,
    /// Heading in Degrees (0-359), None if 511 = not available (default)
    #[serde(deserialize_with = "deserialize_heading")]
    pub heading: Option<u16>,
    /// Longitude in WGS84 format in decimal degrees:
    pub lon: f64,
    /// Latitude in WGS84 format in decimal degrees:
    pub lat: f64,
}

impl VesselLocation {
    pub fn into_raw(self, mmsi: Mmsi) -> RawPosition {
        RawPosition {
            mmsi: Some(mmsi.to_string()),
            latitude: Some(self.lat),
            longitude: Some(self.lon),
            course: self.cog,
            speed: self.sog,
            heading: self.heading.map(f64::from),
            timestamp: DateTime::<Utc>::from_timestamp(self.time, 0)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// Custom deserializers
mod serde_helpers {
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize_sog<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Ok(if value == 102.3 { None } else { Some(value) })
    }

    pub fn deserialize_cog<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Ok(if value == 360.0 { None } else { Some(value) })
    }

    pub fn deserialize_heading<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u16::deserialize(deserializer)?;
        Ok(if value == 511 { None } else { Some(value) })
    }
}
