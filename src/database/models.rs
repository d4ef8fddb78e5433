use serde::Serialize;

use crate::models::{EntityKind, SubscriptionKey, TrackingConfig};

/// Tracking columns of one `places` or `events` row
#[derive(Debug, sqlx::FromRow)]
pub(super) struct EntityRow {
    pub id: i64,
    pub name: Option<String>,
    pub ais_provider: Option<String>,
    pub ais_api_key: Option<String>,
    pub ais_mmsi: Option<String>,
    pub is_dynamic_location: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl EntityRow {
    pub fn into_entity(self, kind: EntityKind) -> TrackedEntity {
        TrackedEntity {
            key: SubscriptionKey::new(kind, self.id),
            name: self.name,
            provider: self.ais_provider,
            credentials: self.ais_api_key,
            identifiers: self.ais_mmsi,
            is_dynamic_location: self.is_dynamic_location,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Place or event with its stored tracking configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub key: SubscriptionKey,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub credentials: Option<String>,
    pub identifiers: Option<String>,
    pub is_dynamic_location: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl TrackedEntity {
    pub fn to_config(&self) -> TrackingConfig {
        TrackingConfig {
            name: self.name.clone(),
            provider: self.provider.clone(),
            credentials: self.credentials.clone(),
            identifiers: self.identifiers.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Rows flagged for live tracking, per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DynamicCounts {
    /// Flagged with `is_dynamic_location`
    pub flagged: i64,
    /// Flagged and with provider and identifiers set
    pub configured: i64,
}
