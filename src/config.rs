//! Application configuration

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::TrackerError;

/// Latitude/longitude rectangle, `[[south, west], [north, east]]`
pub type BoundingBox = [[f64; 2]; 2];

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub aisstream: StreamConfig,
    pub marinesia: PollingConfig,
    pub myshiptracking: PollingConfig,
    pub digitraffic: DigitrafficConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Origin fragments accepted by the relay, e.g. `discover-gozo.com`
    pub allowed_origins: Vec<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            allowed_origins: vec!["discover-gozo.com".to_string(), "localhost".to_string()],
            ping_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://database.db".to_string(),
        }
    }
}

/// AisStream.io WebSocket settings
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub reconnect_base_delay: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub reconnect_max_delay: Duration,
    /// Minimum time between two subscription messages on one connection
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub subscription_cooldown: Duration,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub subscription_retry_delay: Duration,
    /// Warn when no position arrived this long after subscribing
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub liveness_timeout: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Close the socket when nothing, not even a ping, arrived this long
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "wss://stream.aisstream.io/v0/stream".to_string(),
            // Malta-Gozo channel
            bounding_boxes: vec![[[35.80, 14.15], [36.10, 14.45]]],
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(30),
            subscription_cooldown: Duration::from_secs(60),
            subscription_retry_delay: Duration::from_millis(500),
            liveness_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// REST provider settings; `base_url` falls back to the vendor's public API
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub base_url: Option<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Digitraffic marine MQTT feed settings
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DigitrafficConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub keep_alive: Duration,
}

impl Default for DigitrafficConfig {
    fn default() -> Self {
        Self {
            host: "wss://meri.digitraffic.fi:443/mqtt".to_string(),
            port: 443,
            client_id: "ais-relay".to_string(),
            keep_alive: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("AISRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        self.server.validate()?;
        self.aisstream.validate()?;
        self.marinesia.validate("marinesia")?;
        self.myshiptracking.validate("myshiptracking")?;
        require_non_empty("database.url", &self.database.url)?;
        require_non_empty("digitraffic.host", &self.digitraffic.host)?;
        Ok(())
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), TrackerError> {
        require_non_zero("server.ping_interval", self.ping_interval)
    }
}

impl StreamConfig {
    fn validate(&self) -> Result<(), TrackerError> {
        require_non_empty("aisstream.url", &self.url)?;
        require_non_zero("aisstream.reconnect_base_delay", self.reconnect_base_delay)?;
        require_non_zero("aisstream.connect_timeout", self.connect_timeout)?;
        require_non_zero("aisstream.idle_timeout", self.idle_timeout)?;
        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(TrackerError::ConfigurationError {
                message: "aisstream.reconnect_max_delay must not be below reconnect_base_delay"
                    .to_string(),
            });
        }
        if self.bounding_boxes.is_empty() {
            return Err(TrackerError::ConfigurationError {
                message: "aisstream.bounding_boxes needs at least one box".to_string(),
            });
        }
        Ok(())
    }
}

impl PollingConfig {
    fn validate(&self, section: &str) -> Result<(), TrackerError> {
        if let Some(base_url) = &self.base_url {
            require_non_empty(&format!("{}.base_url", section), base_url)?;
        }
        require_non_zero(&format!("{}.poll_interval", section), self.poll_interval)
    }
}

fn require_non_empty(key: &str, value: &str) -> Result<(), TrackerError> {
    if value.trim().is_empty() {
        return Err(TrackerError::ConfigurationError {
            message: format!("{} cannot be empty", key),
        });
    }
    Ok(())
}

fn require_non_zero(key: &str, value: Duration) -> Result<(), TrackerError> {
    if value.is_zero() {
        return Err(TrackerError::ConfigurationError {
            message: format!("{} must be greater than zero", key),
        });
    }
    Ok(())
}
