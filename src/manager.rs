//! Registry of AIS providers with a merged position cache

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::errors::TrackerError;
use crate::hub::{ListenerHandle, PositionHub};
use crate::models::{Mmsi, PositionRecord};
use crate::providers::{canonical_provider_name, AisProvider, PositionCallback};

pub struct ProviderManager {
    providers: HashMap<String, Arc<dyn AisProvider>>,
    hub: Arc<PositionHub>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            hub: PositionHub::new(),
        }
    }

    /// Register a provider under its canonical name, replacing any previous one
    pub fn register_provider(&mut self, name: &str, provider: Arc<dyn AisProvider>) {
        let name = canonical_provider_name(name);
        info!("Registered AIS provider {} as {}", provider.name(), name);
        self.providers.insert(name, provider);
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn AisProvider>> {
        self.providers.get(&canonical_provider_name(name))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Start tracking through the named provider. Every update lands in the
    /// merged cache and reaches all listeners.
    ///
    /// Returns false when the provider is unknown or refuses the request.
    pub fn start_tracking(&self, provider_name: &str, mmsi: Mmsi, credentials: Option<&str>) -> bool {
        match self.try_start_tracking(provider_name, mmsi, credentials) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to start tracking MMSI {} via {}: {}", mmsi, provider_name, e);
                false
            }
        }
    }

    fn try_start_tracking(
        &self,
        provider_name: &str,
        mmsi: Mmsi,
        credentials: Option<&str>,
    ) -> Result<(), TrackerError> {
        let provider = self
            .provider(provider_name)
            .ok_or_else(|| TrackerError::UnknownProvider(provider_name.to_string()))?;

        let hub = self.hub.clone();
        let on_update: PositionCallback = Arc::new(move |record: PositionRecord| hub.publish(record));
        provider.start_tracking(mmsi, credentials, on_update)
    }

    pub fn stop_tracking(&self, provider_name: &str, mmsi: &Mmsi) {
        match self.provider(provider_name) {
            Some(provider) => provider.stop_tracking(mmsi),
            None => error!("Cannot stop tracking MMSI {}: unknown provider {}", mmsi, provider_name),
        }
    }

    pub fn on_position_update<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&PositionRecord) -> Result<(), TrackerError> + Send + Sync + 'static,
    {
        self.hub.subscribe(listener)
    }

    pub fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.hub.get(mmsi)
    }

    pub fn all_positions(&self) -> HashMap<String, PositionRecord> {
        self.hub.snapshot()
    }

    pub fn clear_position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.hub.remove(mmsi)
    }

    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }

    pub fn hub(&self) -> &Arc<PositionHub> {
        &self.hub
    }

    pub fn stop_all(&self) {
        for provider in self.providers.values() {
            provider.stop_all();
        }
        self.hub.clear();
        info!("Stopped all AIS providers");
    }
}
