//! Digitraffic marine MQTT provider
//!
//! Free feed of vessel locations around Finland, no credentials needed.
//! See: https://www.digitraffic.fi/en/marine-traffic/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{AisProvider, PositionCallback};
use crate::config::DigitrafficConfig;
use crate::errors::TrackerError;
use crate::models::{Mmsi, PositionRecord, VesselLocation};

pub struct DigitrafficProvider {
    config: DigitrafficConfig,
    inner: Arc<Inner>,
    connection: Mutex<Option<Connection>>,
}

struct Inner {
    callbacks: Mutex<HashMap<Mmsi, PositionCallback>>,
    positions: RwLock<HashMap<String, PositionRecord>>,
}

struct Connection {
    client: AsyncClient,
    handle: JoinHandle<()>,
}

fn location_topic(mmsi: &Mmsi) -> String {
    format!("vessels-v2/{}/location", mmsi)
}

impl DigitrafficProvider {
    pub fn from_config(config: &DigitrafficConfig) -> Self {
        Self {
            config: config.clone(),
            inner: Arc::new(Inner {
                callbacks: Mutex::new(HashMap::new()),
                positions: RwLock::new(HashMap::new()),
            }),
            connection: Mutex::new(None),
        }
    }

    fn connect(&self) -> Connection {
        let mut mqtt_options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        mqtt_options.set_transport(Transport::wss_with_default_config());
        mqtt_options.set_keep_alive(self.config.keep_alive);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);
        let handle = tokio::spawn(Self::process_events(
            self.inner.clone(),
            event_loop,
            client.clone(),
        ));
        info!("Connecting to Digitraffic MQTT broker at {}", self.config.host);

        Connection { client, handle }
    }

    async fn subscribe(client: &AsyncClient, topics: &[String]) -> Result<(), TrackerError> {
        for topic in topics {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on the next poll after a connection error, but
    /// topic subscriptions need to be re-established, so every ConnAck
    /// subscribes to the currently tracked vessels.
    async fn process_events(inner: Arc<Inner>, mut event_loop: EventLoop, client: AsyncClient) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to Digitraffic MQTT broker, subscribing to topics");
                    let topics: Vec<String> =
                        inner.callbacks.lock().keys().map(location_topic).collect();
                    if let Err(e) = Self::subscribe(&client, &topics).await {
                        error!("Failed to subscribe: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match Self::parse_message(&publish.topic, &publish.payload) {
                        Ok(record) => inner.publish(record),
                        Err(e) => warn!("Failed to parse message: {}", e),
                    }
                }
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                _ => continue,
            }
        }
    }

    /// Parse a location message, e.g. on topic `vessels-v2/230123456/location`
    fn parse_message(topic: &str, payload: &[u8]) -> Result<PositionRecord, TrackerError> {
        let parts: Vec<&str> = topic.split('/').collect();

        if parts.len() < 3 || parts[0] != "vessels-v2" || parts[2] != "location" {
            return Err(TrackerError::InvalidTopic(topic.to_string()));
        }

        let mmsi = Mmsi::try_from(parts[1])?;
        let location: VesselLocation = serde_json::from_slice(payload)?;
        PositionRecord::try_from(location.into_raw(mmsi))
    }

    fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.handle.abort();
            info!("Disconnected from Digitraffic MQTT broker");
        }
    }
}

impl Inner {
    fn publish(&self, record: PositionRecord) {
        let callback = record
            .mmsi()
            .ok()
            .and_then(|mmsi| self.callbacks.lock().get(&mmsi).cloned());
        let Some(callback) = callback else {
            debug!("Position for untracked MMSI {}", record.mmsi);
            return;
        };

        self.positions
            .write()
            .insert(record.mmsi.clone(), record.clone());
        callback(record);
    }
}

impl AisProvider for DigitrafficProvider {
    fn name(&self) -> &str {
        "Digitraffic"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    fn start_tracking(
        &self,
        mmsi: Mmsi,
        _credentials: Option<&str>,
        on_update: PositionCallback,
    ) -> Result<(), TrackerError> {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if callbacks.contains_key(&mmsi) {
                info!("Already tracking MMSI {} via Digitraffic", mmsi);
                return Ok(());
            }
            callbacks.insert(mmsi, on_update);
        }

        let mut connection = self.connection.lock();
        if connection.is_none() {
            // Subscribes on ConnAck
            *connection = Some(self.connect());
        } else if let Some(connection) = connection.as_ref() {
            if let Err(e) = connection
                .client
                .try_subscribe(location_topic(&mmsi), QoS::AtLeastOnce)
            {
                self.inner.callbacks.lock().remove(&mmsi);
                return Err(e.into());
            }
        }
        info!("Tracking MMSI {} via Digitraffic", mmsi);
        Ok(())
    }

    fn stop_tracking(&self, mmsi: &Mmsi) {
        let (removed, now_empty) = {
            let mut callbacks = self.inner.callbacks.lock();
            (callbacks.remove(mmsi).is_some(), callbacks.is_empty())
        };
        if !removed {
            return;
        }
        self.inner.positions.write().remove(&mmsi.to_string());

        if now_empty {
            self.disconnect();
        } else if let Some(connection) = self.connection.lock().as_ref() {
            if let Err(e) = connection.client.try_unsubscribe(location_topic(mmsi)) {
                warn!("Failed to unsubscribe MMSI {}: {}", mmsi, e);
            }
        }
    }

    fn is_tracking(&self, mmsi: &Mmsi) -> bool {
        self.inner.callbacks.lock().contains_key(mmsi)
    }

    fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.inner.positions.read().get(&mmsi.to_string()).cloned()
    }

    fn all_positions(&self) -> HashMap<String, PositionRecord> {
        self.inner.positions.read().clone()
    }

    fn stop_all(&self) {
        self.inner.callbacks.lock().clear();
        self.inner.positions.write().clear();
        self.disconnect();
    }
}

impl Drop for DigitrafficProvider {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.handle.abort();
        }
    }
}
