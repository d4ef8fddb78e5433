//! MyShipTracking REST provider
//!
//! Needs an API key and secret, stored together as `"<key>,<secret>"`.
//! See: https://api.myshiptracking.com/

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::marinesia::value_to_string;
use super::polling::{PollingProvider, PositionFetcher};
use crate::config::PollingConfig;
use crate::errors::TrackerError;
use crate::models::{Mmsi, RawPosition};

pub const DEFAULT_BASE_URL: &str = "https://api.myshiptracking.com";

pub type MyShipTrackingProvider = PollingProvider<MyShipTrackingFetcher>;

#[derive(Debug, Deserialize)]
struct VesselStatusResponse {
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<VesselStatus>,
}

#[derive(Debug, Deserialize)]
struct VesselStatus {
    mmsi: Option<serde_json::Value>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    course: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    timestamp: Option<String>,
}

/// API key and secret pair
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

impl TryFrom<Option<&str>> for ApiCredentials {
    type Error = TrackerError;

    fn try_from(value: Option<&str>) -> Result<Self, Self::Error> {
        let missing = || TrackerError::MissingCredentials("MyShipTracking".to_string());
        let (key, secret) = value.and_then(|v| v.split_once(',')).ok_or_else(missing)?;
        let (key, secret) = (key.trim(), secret.trim());
        if key.is_empty() || secret.is_empty() {
            return Err(missing());
        }
        Ok(Self {
            key: key.to_string(),
            secret: secret.to_string(),
        })
    }
}

pub struct MyShipTrackingFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl MyShipTrackingFetcher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn position_from(response: VesselStatusResponse) -> Option<RawPosition> {

        if response.status.as_deref() != Some("OK") {
            debug!(
                "MyShipTracking: no status ({})",
                response.message.as_deref().unwrap_or("Unknown error")
            );
            return None;
        }

        response.data.into_iter().next().map(|vessel| RawPosition {
            mmsi: vessel.mmsi.as_ref().and_then(value_to_string),
            latitude: vessel.latitude,
            longitude: vessel.longitude,
            course: vessel.course,
            speed: vessel.speed,
            heading: vessel.heading,
            timestamp: vessel.timestamp,
        })
    }
}

#[async_trait]
impl PositionFetcher for MyShipTrackingFetcher {
    fn name(&self) -> &str {
        "MyShipTracking"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn check_credentials(&self, credentials: Option<&str>) -> Result<(), TrackerError> {
        ApiCredentials::try_from(credentials).map(|_| ())
    }

    async fn fetch(
        &self,
        mmsi: Mmsi,
        credentials: Option<&str>,
    ) -> Result<Option<RawPosition>, TrackerError> {
        let credentials = ApiCredentials::try_from(credentials)?;
        let mmsi = mmsi.to_string();
        let response = self
            .client
            .get(format!("{}/vessel/status", self.base_url))
            .query(&[
                ("apikey", credentials.key.as_str()),
                ("apisecret", credentials.secret.as_str()),
                ("mmsi", mmsi.as_str()),
            ])
            .send()
            .await?
            .json::<VesselStatusResponse>()
            .await?;
        Ok(Self::position_from(response))
    }
}

impl MyShipTrackingProvider {
    pub fn from_config(client: reqwest::Client, config: &PollingConfig) -> Self {
        PollingProvider::new(
            MyShipTrackingFetcher::new(client, config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            config.poll_interval,
        )
    }
}
