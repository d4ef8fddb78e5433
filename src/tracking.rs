//! Vessel tracking service
//!
//! Books subscriptions of places and events and routes their vessels to the
//! configured providers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::database::SubscriptionStore;
use crate::errors::TrackerError;
use crate::hub::ListenerHandle;
use crate::manager::ProviderManager;
use crate::models::{parse_mmsi_list, Mmsi, PositionRecord, Subscription, SubscriptionKey, TrackingConfig};
use crate::providers::aisstream::{AisStreamProvider, ConnectionState};
use crate::providers::digitraffic::DigitrafficProvider;
use crate::providers::marinesia::MarinesiaProvider;
use crate::providers::myshiptracking::MyShipTrackingProvider;
use crate::providers::{canonical_provider_name, AISSTREAM, DIGITRAFFIC, MARINESIA, MYSHIPTRACKING};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub connected: bool,
    pub connection_state: ConnectionState,
    pub subscriptions: usize,
    pub tracked_vessels: usize,
    pub current_positions: HashMap<String, PositionRecord>,
}

pub struct TrackingService {
    manager: ProviderManager,
    stream: Option<Arc<AisStreamProvider>>,
    subscriptions: RwLock<HashMap<SubscriptionKey, Subscription>>,
    /// Held across booking and release so that deciding a vessel is unused
    /// and stopping it happen as one step
    booking: Mutex<()>,
    initialized: AtomicBool,
}

impl TrackingService {
    /// `stream` is the push provider whose connection state `status` reports
    pub fn new(manager: ProviderManager, stream: Option<Arc<AisStreamProvider>>) -> Self {
        Self {
            manager,
            stream,
            subscriptions: RwLock::new(HashMap::new()),
            booking: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Service with every known provider registered
    pub fn from_config(config: &AppConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        let stream = Arc::new(AisStreamProvider::from_config(&config.aisstream));

        let mut manager = ProviderManager::new();
        manager.register_provider(AISSTREAM, stream.clone());
        manager.register_provider(
            MARINESIA,
            Arc::new(MarinesiaProvider::from_config(client.clone(), &config.marinesia)),
        );
        manager.register_provider(
            MYSHIPTRACKING,
            Arc::new(MyShipTrackingProvider::from_config(client, &config.myshiptracking)),
        );
        manager.register_provider(
            DIGITRAFFIC,
            Arc::new(DigitrafficProvider::from_config(&config.digitraffic)),
        );

        Ok(Self::new(manager, Some(stream)))
    }

    pub fn manager(&self) -> &ProviderManager {
        &self.manager
    }

    /// Subscribe every place and event flagged for live tracking.
    /// Runs once; later calls are ignored.
    pub async fn initialize(&self, store: &SubscriptionStore) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Tracking service already initialized, skipping");
            return;
        }
        info!("Initializing tracking service");

        let entities = match store.tracked_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                error!("Error loading tracked places and events: {}", e);
                return;
            }
        };

        let mut subscribed = 0;
        for entity in &entities {
            info!(
                "Found dynamic {} {:?} (ID: {}, MMSI: {}, provider: {})",
                entity.key.kind,
                entity.name.as_deref().unwrap_or(""),
                entity.key.id,
                entity.identifiers.as_deref().unwrap_or(""),
                entity.provider.as_deref().unwrap_or("")
            );
            if self.subscribe(entity.key, &entity.to_config()) {
                subscribed += 1;
            } else {
                error!("Failed to subscribe {}", entity.key);
            }
        }
        info!(
            "Loaded {} dynamic places and events, {} subscriptions created",
            entities.len(),
            subscribed
        );
    }

    /// Book a subscription and start tracking its vessels. An existing
    /// subscription with the same key is replaced.
    ///
    /// Returns false when the configuration is incomplete or no vessel
    /// could be tracked.
    pub fn subscribe(&self, key: SubscriptionKey, config: &TrackingConfig) -> bool {
        match self.validate(key, config) {
            Ok(subscription) => self.book(subscription),
            Err(e) => {
                warn!("Cannot subscribe {}: {}", key, e);
                false
            }
        }
    }

    fn validate(&self, key: SubscriptionKey, config: &TrackingConfig) -> Result<Subscription, TrackerError> {
        let invalid = |message: &str| TrackerError::InvalidSubscription(message.to_string());

        let provider_name = config
            .provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing AIS provider"))?;
        let identifiers = parse_mmsi_list(config.identifiers.as_deref().unwrap_or(""));
        if identifiers.is_empty() {
            return Err(invalid("no valid MMSI numbers"));
        }

        let provider = self
            .manager
            .provider(provider_name)
            .ok_or_else(|| TrackerError::UnknownProvider(provider_name.to_string()))?;
        let credentials = config
            .credentials
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        if provider.requires_credentials() && credentials.is_none() {
            return Err(TrackerError::MissingCredentials(provider.name().to_string()));
        }

        Ok(Subscription {
            key,
            name: config.name.clone(),
            provider: canonical_provider_name(provider_name),
            credentials: credentials.map(str::to_string),
            identifiers,
            initial_latitude: config.latitude,
            initial_longitude: config.longitude,
        })
    }

    fn book(&self, subscription: Subscription) -> bool {
        let _booking = self.booking.lock();
        let key = subscription.key;
        let previous = self
            .subscriptions
            .write()
            .insert(key, subscription.clone());

        if let Some(previous) = previous {
            let dropped: Vec<Mmsi> = previous
                .identifiers
                .iter()
                .filter(|mmsi| {
                    previous.provider != subscription.provider
                        || !subscription.identifiers.contains(mmsi)
                })
                .copied()
                .collect();
            self.release(&previous.provider, &dropped);
        }

        let started = subscription
            .identifiers
            .iter()
            .filter(|mmsi| {
                self.manager.start_tracking(
                    &subscription.provider,
                    **mmsi,
                    subscription.credentials.as_deref(),
                )
            })
            .count();

        if started == 0 {
            self.subscriptions.write().remove(&key);
            self.release(&subscription.provider, &subscription.identifiers);
            warn!("Cannot subscribe {}: no vessel could be tracked", key);
            return false;
        }

        info!(
            "Subscribed {} ({}): tracking {} of {} vessels via {}",
            key,
            subscription.name.as_deref().unwrap_or("unnamed"),
            started,
            subscription.identifiers.len(),
            subscription.provider
        );
        true
    }

    /// Remove a subscription; false when it does not exist
    pub fn unsubscribe(&self, key: SubscriptionKey) -> bool {
        let _booking = self.booking.lock();
        let Some(subscription) = self.subscriptions.write().remove(&key) else {
            return false;
        };
        self.release(&subscription.provider, &subscription.identifiers);
        info!("Unsubscribed {}", key);
        true
    }

    /// Stop tracking vessels no remaining subscription of `provider` refers to
    fn release(&self, provider: &str, identifiers: &[Mmsi]) {
        let unused: Vec<Mmsi> = {
            let subscriptions = self.subscriptions.read();
            identifiers
                .iter()
                .filter(|mmsi| {
                    !subscriptions
                        .values()
                        .any(|s| s.provider == provider && s.identifiers.contains(mmsi))
                })
                .copied()
                .collect()
        };
        for mmsi in unused {
            self.manager.stop_tracking(provider, &mmsi);
        }
    }

    pub fn subscription(&self, key: SubscriptionKey) -> Option<Subscription> {
        self.subscriptions.read().get(&key).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Latest known positions of a subscription's vessels
    pub fn positions_for_subscription(&self, key: SubscriptionKey) -> Vec<PositionRecord> {
        let identifiers = match self.subscriptions.read().get(&key) {
            Some(subscription) => subscription.identifiers.clone(),
            None => return Vec::new(),
        };
        identifiers
            .iter()
            .filter_map(|mmsi| self.manager.position(mmsi))
            .collect()
    }

    pub fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.manager.position(mmsi)
    }

    pub fn all_positions(&self) -> HashMap<String, PositionRecord> {
        self.manager.all_positions()
    }

    pub fn on_position_update<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&PositionRecord) -> Result<(), TrackerError> + Send + Sync + 'static,
    {
        self.manager.on_position_update(listener)
    }

    pub fn status(&self) -> ServiceStatus {
        let connection_state = self
            .stream
            .as_ref()
            .map_or(ConnectionState::Disconnected, |s| s.connection_state());
        let current_positions = self.manager.all_positions();

        ServiceStatus {
            connected: connection_state == ConnectionState::Connected,
            connection_state,
            subscriptions: self.subscription_count(),
            tracked_vessels: current_positions.len(),
            current_positions,
        }
    }

    /// Stop every provider and forget subscriptions and positions
    pub fn shutdown(&self) {
        let _booking = self.booking.lock();
        self.subscriptions.write().clear();
        self.manager.stop_all();
        info!("Tracking service shut down");
    }
}
