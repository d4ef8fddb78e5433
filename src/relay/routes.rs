//! REST routes over the tracking service

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use super::AppState;
use crate::database::StoreDiagnostics;
use crate::models::{EntityKind, PositionRecord, SubscriptionKey};
use crate::tracking::ServiceStatus;

/// JSON error body `{"error": "..."}`
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct KindQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    kind.parse::<EntityKind>()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Invalid type. Must be \"place\" or \"event\""))
}

pub async fn all_positions(State(state): State<Arc<AppState>>) -> Json<HashMap<String, PositionRecord>> {
    let positions = state.service.all_positions();
    if positions.is_empty() {
        warn!("No AIS positions available yet");
    }
    Json(positions)
}

pub async fn subscription_positions(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, i64)>,
) -> Result<Json<Vec<PositionRecord>>, ApiError> {
    let key = SubscriptionKey::new(parse_kind(&kind)?, id);
    Ok(Json(state.service.positions_for_subscription(key)))
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<KindQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = parse_kind(query.kind.as_deref().unwrap_or(""))?;

    let entity = match state.store.entity(kind, id).await {
        Ok(Some(entity)) => entity,
        Ok(None) => return Err(ApiError::new(StatusCode::NOT_FOUND, format!("{} not found", kind))),
        Err(e) => {
            error!("Error loading {} {}: {}", kind, id, e);
            return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to subscribe"));
        }
    };

    if !entity.is_dynamic_location {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{} does not have dynamic location enabled", kind),
        ));
    }

    if !state.service.subscribe(entity.key, &entity.to_config()) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Failed to subscribe. Check AIS configuration.",
        ));
    }

    Ok(Json(json!({
        "message": format!("Subscribed to track {} {}", kind, id),
        "status": "success",
    })))
}

/// Without `type`, a place with the id is tried first, then an event
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<KindQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kinds = match query.kind.as_deref() {
        Some(kind) => vec![parse_kind(kind)?],
        None => vec![EntityKind::Place, EntityKind::Event],
    };

    let removed = kinds
        .into_iter()
        .find(|kind| state.service.unsubscribe(SubscriptionKey::new(*kind, id)));

    match removed {
        Some(kind) => Ok(Json(json!({
            "message": format!("Unsubscribed from tracking {} {}", kind, id),
            "status": "success",
        }))),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "Subscription not found")),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub service: ServiceStatus,
    /// None when the store could not be queried
    pub diagnostics: Option<StoreDiagnostics>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let service = state.service.status();
    let diagnostics = match state.store.diagnostics().await {
        Ok(diagnostics) => Some(diagnostics),
        Err(e) => {
            error!("Error reading tracking diagnostics: {}", e);
            None
        }
    };
    info!(
        "AIS status requested: {} subscriptions, {} positions",
        service.subscriptions, service.tracked_vessels
    );
    Json(StatusResponse { service, diagnostics })
}
