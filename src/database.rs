//! Read access to the tracking configuration of places and events
//!
//! The tables belong to the CRUD layer; this module never writes to them.

mod models;

pub use models::{DynamicCounts, TrackedEntity};

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::errors::TrackerError;
use crate::models::EntityKind;
use models::EntityRow;

const ENTITY_COLUMNS: &str = "id, name, ais_provider, ais_api_key, ais_mmsi, \
     COALESCE(is_dynamic_location, 0) AS is_dynamic_location, latitude, longitude";

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Place => "places",
        EntityKind::Event => "events",
    }
}

/// Dynamic entity counts of both tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StoreDiagnostics {
    pub places: DynamicCounts,
    pub events: DynamicCounts,
}

#[derive(Clone)]
pub struct SubscriptionStore {
    pool: SqlitePool,
}

impl SubscriptionStore {
    pub async fn from_url(database_url: &str) -> Result<Self, TrackerError> {
        info!("Opening database at {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every place and event flagged for live tracking that has a provider
    /// and identifiers configured
    pub async fn tracked_entities(&self) -> Result<Vec<TrackedEntity>, TrackerError> {
        let mut entities = Vec::new();
        for kind in [EntityKind::Place, EntityKind::Event] {
            let query = format!(
                "SELECT {} FROM {} WHERE is_dynamic_location = 1 \
                 AND ais_provider IS NOT NULL AND ais_mmsi IS NOT NULL ORDER BY id",
                ENTITY_COLUMNS,
                table(kind)
            );
            let rows: Vec<EntityRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
            entities.extend(rows.into_iter().map(|row| row.into_entity(kind)));
        }
        Ok(entities)
    }

    /// A single place or event, whether flagged or not
    pub async fn entity(&self, kind: EntityKind, id: i64) -> Result<Option<TrackedEntity>, TrackerError> {
        let query = format!("SELECT {} FROM {} WHERE id = ?", ENTITY_COLUMNS, table(kind));
        let row: Option<EntityRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.into_entity(kind)))
    }

    pub async fn dynamic_counts(&self, kind: EntityKind) -> Result<DynamicCounts, TrackerError> {
        let query = format!(
            "SELECT COUNT(*), \
             COALESCE(SUM(CASE WHEN ais_provider IS NOT NULL AND ais_mmsi IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM {} WHERE is_dynamic_location = 1",
            table(kind)
        );
        let (flagged, configured): (i64, i64) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        Ok(DynamicCounts { flagged, configured })
    }

    pub async fn diagnostics(&self) -> Result<StoreDiagnostics, TrackerError> {
        Ok(StoreDiagnostics {
            places: self.dynamic_counts(EntityKind::Place).await?,
            events: self.dynamic_counts(EntityKind::Event).await?,
        })
    }
}
