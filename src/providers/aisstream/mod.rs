//! AisStream.io push provider
//!
//! One WebSocket carries every tracked vessel. The connection opens with the
//! first vessel, reconnects with exponential backoff while anything is
//! tracked, and closes when the last vessel is removed.

mod message;
mod session;
mod transport;

pub use message::{is_api_key_error, parse_message, StreamMessage};
pub use session::{ConnectionState, SessionAction, StreamSession, SubscriptionMessage};
pub use transport::{StreamChannel, StreamConnector, TungsteniteConnector};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{AisProvider, PositionCallback};
use crate::config::StreamConfig;
use crate::errors::TrackerError;
use crate::models::{Mmsi, PositionRecord};

pub struct AisStreamProvider {
    shared: Arc<Shared>,
}

struct Shared {
    config: StreamConfig,
    connector: Arc<dyn StreamConnector>,
    session: Mutex<StreamSession>,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<String>>>,
    callbacks: Mutex<HashMap<Mmsi, PositionCallback>>,
    positions: RwLock<HashMap<String, PositionRecord>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Subscriptions that saw no position within the liveness timeout
    silent_subscriptions: AtomicU64,
}

impl AisStreamProvider {
    pub fn new(config: StreamConfig, connector: Arc<dyn StreamConnector>) -> Self {
        let session = StreamSession::new(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                session: Mutex::new(session),
                outbound: Mutex::new(None),
                callbacks: Mutex::new(HashMap::new()),
                positions: RwLock::new(HashMap::new()),
                task: Mutex::new(None),
                silent_subscriptions: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.clone(), Arc::new(TungsteniteConnector::new(config)))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.session.lock().state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.session.lock().reconnect_attempts()
    }

    pub fn silent_subscriptions(&self) -> u64 {
        self.shared.silent_subscriptions.load(Ordering::Relaxed)
    }

    pub fn tracked_vessels(&self) -> Vec<Mmsi> {
        self.shared.session.lock().tracked().copied().collect()
    }

    /// Open the connection if vessels are tracked and none is open
    pub fn connect(&self) {
        let connection = {
            let mut session = self.shared.session.lock();
            session.begin_connect().then(|| session.connection())
        };
        if let Some(connection) = connection {
            Shared::spawn_connection(&self.shared, connection);
        }
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }
}

impl Shared {
    fn apply(self: &Arc<Self>, action: Option<SessionAction>) {
        match action {
            Some(SessionAction::Connect(connection)) => Self::spawn_connection(self, connection),
            Some(SessionAction::Send(message)) => {
                self.send_subscription(message);
            }
            Some(SessionAction::Disconnect) => self.disconnect(),
            None => {}
        }
    }

    fn spawn_connection(self: &Arc<Self>, connection: u64) {
        let handle = tokio::spawn(Self::run(self.clone(), connection));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn disconnect(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        {
            let mut session = self.session.lock();
            session.on_disconnect();
            self.outbound.lock().take();
        }
        info!("AIS stream disconnected");
    }

    /// Connection loop; ends when nothing is tracked or the task is aborted
    async fn run(self: Arc<Self>, mut connection: u64) {
        loop {
            info!("Connecting to AIS stream at {}", self.config.url);
            match self.connector.connect(&self.config.url).await {
                Ok(channel) => self.drive(connection, channel).await,
                Err(e) => error!("AIS stream connection failed: {}", e),
            }

            let (delay, attempt) = {
                let mut session = self.session.lock();
                if !session.is_current(connection) {
                    debug!("AIS stream attempt {} superseded", connection);
                    break;
                }
                self.outbound.lock().take();
                (session.on_closed(connection), session.reconnect_attempts())
            };
            let Some(delay) = delay else {
                info!("No vessels tracked, not reconnecting");
                break;
            };
            info!("Reconnecting AIS stream in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;

            let next = {
                let mut session = self.session.lock();
                session.begin_connect().then(|| session.connection())
            };
            match next {
                Some(next) => connection = next,
                None => break,
            }
        }
    }

    async fn drive(self: &Arc<Self>, connection: u64, channel: StreamChannel) {
        let StreamChannel {
            outbound,
            mut inbound,
        } = channel;

        let subscription = {
            let mut session = self.session.lock();
            if !session.on_open(connection) {
                debug!("Dropping AIS stream socket of superseded attempt {}", connection);
                return;
            }
            *self.outbound.lock() = Some(outbound);
            session.subscription(Instant::now())
        };
        info!("AIS stream connected");

        if let Some(message) = subscription {
            if !self.send_subscription(message) {
                tokio::time::sleep(self.config.subscription_retry_delay).await;
                let retry = {
                    let mut session = self.session.lock();
                    if session.needs_subscription() {
                        session.subscription(Instant::now())
                    } else {
                        None
                    }
                };
                if let Some(message) = retry {
                    self.send_subscription(message);
                }
            }
        }

        while let Some(text) = inbound.recv().await {
            self.handle_frame(&text);
        }

        let received = self.session.lock().positions_received();
        info!("AIS stream closed after {} positions", received);
    }

    /// Returns false when the subscription could not be written
    fn send_subscription(self: &Arc<Self>, message: SubscriptionMessage) -> bool {
        let count = message.filters_ship_mmsi.len();
        let sent = match serde_json::to_string(&message) {
            Ok(json) => self
                .outbound
                .lock()
                .as_ref()
                .is_some_and(|tx| tx.send(json).is_ok()),
            Err(e) => {
                error!("Failed to serialize subscription: {}", e);
                false
            }
        };

        if !sent {
            warn!("Could not send AIS subscription, connection not ready");
            self.session.lock().mark_send_failed();
            return false;
        }

        info!("Subscribed to {} vessels on AIS stream", count);
        let shared = Arc::downgrade(self);
        let timeout = self.config.liveness_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                if shared.session.lock().awaiting_first_position() {
                    shared.silent_subscriptions.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "No AIS positions received {:?} after subscribing; vessels may be out of range or not transmitting",
                        timeout
                    );
                }
            }
        });
        true
    }

    fn handle_frame(&self, text: &str) {
        match parse_message(text) {
            Ok(StreamMessage::Position(raw)) => match PositionRecord::try_from(raw) {
                Ok(record) => self.publish(record),
                Err(e) => warn!("Dropping AIS position: {}", e),
            },
            Ok(StreamMessage::Error(error)) => {
                error!("AIS stream error: {}", error);
                if is_api_key_error(&error) {
                    error!("Check that the AisStream API key is valid");
                }
            }
            Ok(StreamMessage::SubscriptionAck { error: Some(error) }) => {
                error!("AIS subscription rejected: {}", error)
            }
            Ok(StreamMessage::SubscriptionAck { error: None }) => info!("AIS subscription confirmed"),
            Ok(StreamMessage::Ignored(message_type)) => debug!("Ignoring {} message", message_type),
            Ok(StreamMessage::Untyped) => warn!("AIS message without type"),
            Err(e) => {
                let preview: String = text.chars().take(500).collect();
                error!("Failed to parse AIS message: {}; raw: {}", e, preview);
            }
        }
    }

    fn publish(&self, record: PositionRecord) {
        self.session.lock().record_position();
        self.positions
            .write()
            .insert(record.mmsi.clone(), record.clone());

        let callback = record
            .mmsi()
            .ok()
            .and_then(|mmsi| self.callbacks.lock().get(&mmsi).cloned());
        match callback {
            Some(callback) => callback(record),
            None => debug!("Position for untracked MMSI {}", record.mmsi),
        }
    }
}

impl AisProvider for AisStreamProvider {
    fn name(&self) -> &str {
        "AISStream"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn start_tracking(
        &self,
        mmsi: Mmsi,
        credentials: Option<&str>,
        on_update: PositionCallback,
    ) -> Result<(), TrackerError> {
        let credentials = credentials
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TrackerError::MissingCredentials("AISStream".to_string()))?;

        self.shared.callbacks.lock().entry(mmsi).or_insert(on_update);
        let action = self
            .shared
            .session
            .lock()
            .track(mmsi, Some(credentials), Instant::now());
        info!("Tracking MMSI {} via AISStream", mmsi);
        self.shared.apply(action);
        Ok(())
    }

    fn stop_tracking(&self, mmsi: &Mmsi) {
        self.shared.callbacks.lock().remove(mmsi);
        self.shared.positions.write().remove(&mmsi.to_string());
        let action = self.shared.session.lock().untrack(mmsi, Instant::now());
        self.shared.apply(action);
    }

    fn is_tracking(&self, mmsi: &Mmsi) -> bool {
        self.shared.session.lock().is_tracked(mmsi)
    }

    fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.shared.positions.read().get(&mmsi.to_string()).cloned()
    }

    fn all_positions(&self) -> HashMap<String, PositionRecord> {
        self.shared.positions.read().clone()
    }

    fn stop_all(&self) {
        self.shared.callbacks.lock().clear();
        self.shared.positions.write().clear();
        self.shared.session.lock().clear();
        self.shared.disconnect();
    }
}

impl Drop for AisStreamProvider {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.task.lock().take() {
            handle.abort();
        }
    }
}
