//! Providers polling a REST API on a fixed interval per vessel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{AisProvider, PositionCallback};
use crate::errors::TrackerError;
use crate::models::{Mmsi, PositionRecord, RawPosition};

/// Fetches the latest known position of one vessel from a vendor API
#[async_trait]
pub trait PositionFetcher: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn requires_credentials(&self) -> bool;

    /// Reject credentials that can never work, before any polling starts
    fn check_credentials(&self, _credentials: Option<&str>) -> Result<(), TrackerError> {
        Ok(())
    }

    /// `Ok(None)` means the vendor answered but has no position for the vessel
    async fn fetch(
        &self,
        mmsi: Mmsi,
        credentials: Option<&str>,
    ) -> Result<Option<RawPosition>, TrackerError>;
}

/// Polls one task per tracked vessel
pub struct PollingProvider<F> {
    fetcher: Arc<F>,
    poll_interval: Duration,
    tasks: Mutex<HashMap<Mmsi, JoinHandle<()>>>,
    positions: Arc<RwLock<HashMap<String, PositionRecord>>>,
}

impl<F: PositionFetcher> PollingProvider<F> {
    pub fn new(fetcher: F, poll_interval: Duration) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            poll_interval,
            tasks: Mutex::new(HashMap::new()),
            positions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    async fn poll(
        fetcher: Arc<F>,
        positions: Arc<RwLock<HashMap<String, PositionRecord>>>,
        mmsi: Mmsi,
        credentials: Option<String>,
        poll_interval: Duration,
        on_update: PositionCallback,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match fetcher.fetch(mmsi, credentials.as_deref()).await {
                Ok(Some(raw)) => match PositionRecord::try_from(raw) {
                    Ok(record) => {
                        debug!(
                            "{}: position update for MMSI {} - {}, {}",
                            fetcher.name(),
                            mmsi,
                            record.latitude,
                            record.longitude
                        );
                        positions.write().insert(mmsi.to_string(), record.clone());
                        on_update(record);
                    }
                    Err(e) => warn!("{}: dropping position for MMSI {}: {}", fetcher.name(), mmsi, e),
                },
                Ok(None) => warn!("{}: no data for MMSI {}", fetcher.name(), mmsi),
                Err(e) => error!(
                    "{}: error fetching position for MMSI {}: {}",
                    fetcher.name(),
                    mmsi,
                    e
                ),
            }
        }
    }
}

impl<F: PositionFetcher> AisProvider for PollingProvider<F> {
    fn name(&self) -> &str {
        self.fetcher.name()
    }

    fn requires_credentials(&self) -> bool {
        self.fetcher.requires_credentials()
    }

    fn start_tracking(
        &self,
        mmsi: Mmsi,
        credentials: Option<&str>,
        on_update: PositionCallback,
    ) -> Result<(), TrackerError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&mmsi) {
            info!("Already tracking MMSI {} via {}", mmsi, self.name());
            return Ok(());
        }

        self.fetcher.check_credentials(credentials)?;

        info!("Starting {} tracking for MMSI {}", self.name(), mmsi);
        let handle = tokio::spawn(Self::poll(
            self.fetcher.clone(),
            self.positions.clone(),
            mmsi,
            credentials.map(str::to_string),
            self.poll_interval,
            on_update,
        ));
        tasks.insert(mmsi, handle);

        Ok(())
    }

    fn stop_tracking(&self, mmsi: &Mmsi) {
        if let Some(handle) = self.tasks.lock().remove(mmsi) {
            handle.abort();
            self.positions.write().remove(&mmsi.to_string());
            info!("Stopped {} tracking for MMSI {}", self.name(), mmsi);
        }
    }

    fn is_tracking(&self, mmsi: &Mmsi) -> bool {
        self.tasks.lock().contains_key(mmsi)
    }

    fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.positions.read().get(&mmsi.to_string()).cloned()
    }

    fn all_positions(&self) -> HashMap<String, PositionRecord> {
        self.positions.read().clone()
    }

    fn stop_all(&self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
        self.positions.write().clear();
        info!("Stopped all {} tracking", self.name());
    }
}

impl<F> Drop for PollingProvider<F> {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a fixed position, except for `failing` which always errors
    struct FakeFetcher {
        failing: Option<Mmsi>,
        calls: Arc<Mutex<HashMap<Mmsi, usize>>>,
    }

    #[async_trait]
    impl PositionFetcher for FakeFetcher {
        fn name(&self) -> &str {
            "Fake"
        }

        fn requires_credentials(&self) -> bool {
            false
        }

        async fn fetch(
            &self,
            mmsi: Mmsi,
            _credentials: Option<&str>,
        ) -> Result<Option<RawPosition>, TrackerError> {
            *self.calls.lock().entry(mmsi).or_default() += 1;
            if self.failing == Some(mmsi) {
                return Err(TrackerError::InvalidPosition("upstream unavailable".to_string()));
            }
            Ok(Some(RawPosition {
                mmsi: Some(mmsi.to_string()),
                latitude: Some(36.05),
                longitude: Some(14.24),
                ..Default::default()
            }))
        }
    }

    fn provider(failing: Option<Mmsi>) -> (PollingProvider<FakeFetcher>, Arc<Mutex<HashMap<Mmsi, usize>>>) {
        let calls = Arc::new(Mutex::new(HashMap::new()));
        let fetcher = FakeFetcher {
            failing,
            calls: calls.clone(),
        };
        (PollingProvider::new(fetcher, Duration::from_secs(30)), calls)
    }

    fn counting_callback() -> (PositionCallback, Arc<Mutex<Vec<PositionRecord>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |r: PositionRecord| sink.lock().push(r)), seen)
    }

    fn mmsi(value: u32) -> Mmsi {
        Mmsi::try_from(value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn start_tracking_is_idempotent() {
        let (provider, calls) = provider(None);
        let (callback, seen) = counting_callback();

        provider.start_tracking(mmsi(248_692_000), None, callback.clone()).unwrap();
        provider.start_tracking(mmsi(248_692_000), None, callback).unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;

        // Immediate fetch plus one interval tick, from a single task
        assert_eq!(calls.lock()[&mmsi(248_692_000)], 2);
        assert_eq!(seen.lock().len(), 2);
        assert!(provider.position(&mmsi(248_692_000)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_vessel_does_not_stop_others() {
        let (provider, calls) = provider(Some(mmsi(111_111_111)));
        let (callback, seen) = counting_callback();

        provider.start_tracking(mmsi(111_111_111), None, callback.clone()).unwrap();
        provider.start_tracking(mmsi(248_692_000), None, callback).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(calls.lock()[&mmsi(111_111_111)], 3);
        assert_eq!(calls.lock()[&mmsi(248_692_000)], 3);
        assert!(seen.lock().iter().all(|r| r.mmsi == "248692000"));
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_ends_polling() {
        let (provider, calls) = provider(None);
        let (callback, _) = counting_callback();

        provider.start_tracking(mmsi(248_692_000), None, callback).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        provider.stop_tracking(&mmsi(248_692_000));
        provider.stop_tracking(&mmsi(248_692_000));
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(calls.lock()[&mmsi(248_692_000)], 1);
        assert!(!provider.is_tracking(&mmsi(248_692_000)));
        assert!(provider.all_positions().is_empty());
    }
}
