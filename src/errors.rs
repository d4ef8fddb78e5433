//! Errors for AIS relay
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("WebSocket error")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid MMSI: {0}")]
    InvalidMmsi(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Unknown AIS provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {0} requires credentials")]
    MissingCredentials(String),

    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Position listener failed: {0}")]
    ListenerError(String),

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),
}
