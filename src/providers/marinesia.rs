//! Marinesia REST provider
//!
//! Free API, no key required for the latest position.
//! See: https://docs.marinesia.com/

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::polling::{PollingProvider, PositionFetcher};
use crate::config::PollingConfig;
use crate::errors::TrackerError;
use crate::models::{Mmsi, RawPosition};

pub const DEFAULT_BASE_URL: &str = "https://api.marinesia.com/api/v1";

pub type MarinesiaProvider = PollingProvider<MarinesiaFetcher>;

#[derive(Debug, Deserialize)]
struct LatestLocationResponse {
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    data: Option<MarinesiaLocation>,
}

#[derive(Debug, Deserialize)]
struct MarinesiaLocation {
    mmsi: Option<serde_json::Value>,
    lat: Option<f64>,
    lng: Option<f64>,
    cog: Option<f64>,
    sog: Option<f64>,
    hdt: Option<f64>,
    ts: Option<String>,
}

pub struct MarinesiaFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl MarinesiaFetcher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn location_url(&self, mmsi: Mmsi) -> String {
        format!("{}/vessel/{}/location/latest", self.base_url, mmsi)
    }

    fn position_from(response: LatestLocationResponse) -> Option<RawPosition> {

        match (response.error, response.data) {
            (Some(false), Some(data)) => Some(RawPosition {
                mmsi: data.mmsi.as_ref().and_then(value_to_string),
                latitude: data.lat,
                longitude: data.lng,
                course: data.cog,
                speed: data.sog,
                heading: data.hdt,
                timestamp: data.ts,
            }),
            _ => {
                debug!(
                    "Marinesia: no location ({})",
                    response.message.as_deref().unwrap_or("Unknown error")
                );
                None
            }
        }
    }
}

pub(crate) fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PositionFetcher for MarinesiaFetcher {
    fn name(&self) -> &str {
        "Marinesia"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        mmsi: Mmsi,
        _credentials: Option<&str>,
    ) -> Result<Option<RawPosition>, TrackerError> {
        let response = self
            .client
            .get(self.location_url(mmsi))
            .send()
            .await?
            .json::<LatestLocationResponse>()
            .await?;
        Ok(Self::position_from(response))
    }
}

impl MarinesiaProvider {
    pub fn from_config(client: reqwest::Client, config: &PollingConfig) -> Self {
        PollingProvider::new(
            MarinesiaFetcher::new(client, config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            config.poll_interval,
        )
    }
}
