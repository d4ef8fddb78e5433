//! HTTP surface: realtime WebSocket relay, SSE stream and REST routes

mod routes;
mod sse;
mod ws;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::database::SubscriptionStore;
use crate::errors::TrackerError;
use crate::models::PositionRecord;
use crate::tracking::TrackingService;

pub struct AppState {
    pub service: Arc<TrackingService>,
    pub store: SubscriptionStore,
    allowed_origins: Vec<String>,
    ping_interval: Duration,
}

impl AppState {
    pub fn new(service: Arc<TrackingService>, store: SubscriptionStore, config: &ServerConfig) -> Self {
        Self {
            service,
            store,
            allowed_origins: config.allowed_origins.clone(),
            ping_interval: config.ping_interval,
        }
    }

    /// An origin is allowed when it contains one of the configured fragments
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|fragment| origin.contains(fragment.as_str()))
    }
}

/// Messages pushed to realtime clients
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayMessage<'a> {
    Connected { message: &'a str },
    Positions { data: &'a HashMap<String, PositionRecord> },
    Position { data: &'a PositionRecord },
}

impl RelayMessage<'_> {
    pub fn to_json(&self) -> Result<String, TrackerError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/ais/ws", get(ws::ws_handler))
        .route("/api/ais/stream", get(sse::stream_handler))
        .route("/api/ais/positions", get(routes::all_positions))
        .route("/api/ais/positions/:kind/:id", get(routes::subscription_positions))
        .route("/api/ais/subscribe/:id", post(routes::subscribe))
        .route("/api/ais/unsubscribe/:id", post(routes::unsubscribe))
        .route("/api/ais/status", get(routes::status))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<(), TrackerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("AIS relay listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_message_shapes() {
        let connected = RelayMessage::Connected {
            message: "AIS WebSocket connected",
        };
        assert_eq!(
            connected.to_json().unwrap(),
            r#"{"type":"connected","message":"AIS WebSocket connected"}"#
        );

        let record = PositionRecord {
            mmsi: "248692000".to_string(),
            latitude: 36.05,
            longitude: 14.24,
            course: Some(90.0),
            speed: Some(12.3),
            heading: None,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&RelayMessage::Position { data: &record }.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "position");
        assert_eq!(json["data"]["mmsi"], "248692000");

        let snapshot = HashMap::from([(record.mmsi.clone(), record)]);
        let json: serde_json::Value =
            serde_json::from_str(&RelayMessage::Positions { data: &snapshot }.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "positions");
        assert_eq!(json["data"]["248692000"]["latitude"], 36.05);
    }
}
