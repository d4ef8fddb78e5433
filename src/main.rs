//! AIS relay server

use std::sync::Arc;

use ais_relay::{
    config::AppConfig, database::SubscriptionStore, errors::TrackerError, relay, relay::AppState,
    tracking::TrackingService,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables over config files
    let config = AppConfig::load()?;
    config.validate()?;

    let store = SubscriptionStore::from_url(&config.database.url).await?;
    let service = Arc::new(TrackingService::from_config(&config)?);
    service.initialize(&store).await;

    let listener = TcpListener::bind(config.server.bind).await?;
    let state = Arc::new(AppState::new(service.clone(), store, &config.server));

    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    };

    let result = relay::serve(listener, state, shutdown_signal).await;

    service.shutdown();
    result
}
