//! Connection state of the AisStream WebSocket
//!
//! The session decides *what* to do (connect, send a subscription,
//! disconnect); the provider performs the I/O.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{BoundingBox, StreamConfig};
use crate::models::Mmsi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Subscription request; AisStream drops connections that do not send one
/// within 3 seconds of opening.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionMessage {
    #[serde(rename = "APIKey")]
    pub api_key: String,
    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde(rename = "FiltersShipMMSI")]
    pub filters_ship_mmsi: Vec<String>,
    #[serde(rename = "FilterMessageTypes")]
    pub filter_message_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open connection attempt number `.0`
    Connect(u64),
    Send(SubscriptionMessage),
    Disconnect,
}

#[derive(Debug)]
pub struct StreamSession {
    state: ConnectionState,
    /// Identifies the connection attempt the session is waiting on; bumped
    /// on every new attempt and on disconnect so stale tasks are ignored.
    connection: u64,
    tracked: BTreeSet<Mmsi>,
    api_key: Option<String>,
    reconnect_attempts: u32,
    subscription_sent_at: Option<Instant>,
    positions_received: u64,
    bounding_boxes: Vec<BoundingBox>,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
    subscription_cooldown: Duration,
}

impl StreamSession {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connection: 0,
            tracked: BTreeSet::new(),
            api_key: None,
            reconnect_attempts: 0,
            subscription_sent_at: None,
            positions_received: 0,
            bounding_boxes: config.bounding_boxes.clone(),
            reconnect_base_delay: config.reconnect_base_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            subscription_cooldown: config.subscription_cooldown,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Whether `connection` is the attempt this session currently expects
    pub fn is_current(&self, connection: u64) -> bool {
        self.state != ConnectionState::Disconnected && self.connection == connection
    }

    pub fn is_tracked(&self, mmsi: &Mmsi) -> bool {
        self.tracked.contains(mmsi)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &Mmsi> {
        self.tracked.iter()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn positions_received(&self) -> u64 {
        self.positions_received
    }

    /// Add a vessel. The first vessel starts a connection; later ones
    /// update the live subscription unless one was sent within the
    /// cooldown, in which case they wait for the next connection.
    pub fn track(&mut self, mmsi: Mmsi, api_key: Option<&str>, now: Instant) -> Option<SessionAction> {
        if self.api_key.is_none() {
            self.api_key = api_key.map(str::to_string);
        }
        if !self.tracked.insert(mmsi) {
            return None;
        }

        match self.state {
            ConnectionState::Connected => {
                if self.cooldown_elapsed(now) {
                    self.subscription(now).map(SessionAction::Send)
                } else {
                    debug!("Skipping subscription update for MMSI {}, sent recently", mmsi);
                    None
                }
            }
            // The open handler subscribes to everything tracked by then
            ConnectionState::Connecting => None,
            ConnectionState::Disconnected => {
                // A reconnect is already scheduled when other vessels are tracked
                if self.tracked.len() == 1 && self.begin_connect() {
                    Some(SessionAction::Connect(self.connection))
                } else {
                    None
                }
            }
        }
    }

    /// Remove a vessel; the last one closes the connection.
    pub fn untrack(&mut self, mmsi: &Mmsi, now: Instant) -> Option<SessionAction> {
        if !self.tracked.remove(mmsi) {
            return None;
        }

        if self.tracked.is_empty() {
            self.api_key = None;
            return Some(SessionAction::Disconnect);
        }

        if self.is_connected() && self.cooldown_elapsed(now) {
            return self.subscription(now).map(SessionAction::Send);
        }
        None
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.api_key = None;
    }

    /// Disconnected -> Connecting. Returns false when a connection is
    /// already underway or there is nothing to connect for.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected || self.tracked.is_empty() {
            return false;
        }
        if self.api_key.is_none() {
            warn!("No AisStream API key available, not connecting");
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.connection += 1;
        true
    }

    /// Socket opened for attempt `connection`: Connecting -> Connected.
    /// Returns false, leaving the state untouched, when the session no
    /// longer waits for that attempt; the caller must drop the socket.
    pub fn on_open(&mut self, connection: u64) -> bool {
        if self.state != ConnectionState::Connecting || self.connection != connection {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.subscription_sent_at = None;
        self.positions_received = 0;
        true
    }

    /// Socket of attempt `connection` closed or failed to open. Returns the
    /// delay before the next attempt, or None when nothing is tracked
    /// anymore or the attempt is stale.
    pub fn on_closed(&mut self, connection: u64) -> Option<Duration> {
        if !self.is_current(connection) {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        self.subscription_sent_at = None;

        if self.tracked.is_empty() {
            return None;
        }
        let delay = self.reconnect_delay();
        self.reconnect_attempts += 1;
        Some(delay)
    }

    /// Connection closed on our side; no reconnect follows.
    pub fn on_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connection += 1;
        self.subscription_sent_at = None;
        self.reconnect_attempts = 0;
    }

    /// `base * 2^min(attempts, 3)`, capped at the configured maximum
    pub fn reconnect_delay(&self) -> Duration {
        let factor = 1u32 << self.reconnect_attempts.min(3);
        (self.reconnect_base_delay * factor).min(self.reconnect_max_delay)
    }

    /// Build the subscription for all tracked vessels and mark it sent
    pub fn subscription(&mut self, now: Instant) -> Option<SubscriptionMessage> {
        let api_key = self.api_key.clone()?;
        if self.tracked.is_empty() {
            warn!("No MMSI numbers to subscribe to");
            return None;
        }

        self.subscription_sent_at = Some(now);
        Some(SubscriptionMessage {
            api_key,
            bounding_boxes: self.bounding_boxes.clone(),
            filters_ship_mmsi: self.tracked.iter().map(Mmsi::to_string).collect(),
            filter_message_types: vec!["PositionReport".to_string()],
        })
    }

    pub fn mark_send_failed(&mut self) {
        self.subscription_sent_at = None;
    }

    pub fn needs_subscription(&self) -> bool {
        self.is_connected() && self.subscription_sent_at.is_none()
    }

    pub fn record_position(&mut self) {
        self.positions_received += 1;
    }

    /// Connected and subscribed, yet nothing received
    pub fn awaiting_first_position(&self) -> bool {
        self.is_connected() && self.subscription_sent_at.is_some() && self.positions_received == 0
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.subscription_sent_at
            .map_or(true, |sent| now.duration_since(sent) >= self.subscription_cooldown)
    }
}
