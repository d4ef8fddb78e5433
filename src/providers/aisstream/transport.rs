//! WebSocket transport behind the AisStream provider
//!
//! A connection is exposed as a pair of text channels so the provider can be
//! driven by an in-memory connector in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::errors::TrackerError;

/// Open connection. Dropping `outbound` closes the socket; `inbound`
/// yields `None` once the remote side is gone.
pub struct StreamChannel {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<StreamChannel, TrackerError>;
}

/// Connector over a real WebSocket. A handshake slower than
/// `connect_timeout` fails; an open socket silent for `idle_timeout` is
/// treated as closed.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
        }
    }
}

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<StreamChannel, TrackerError> {
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TrackerError::ConnectTimeout(url.to_string()))??;
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    error!("AIS stream send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            loop {
                let message = match timeout(idle_timeout, read.next()).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => {
                        warn!("AIS stream silent for {:?}, closing", idle_timeout);
                        break;
                    }
                };
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    // AisStream delivers JSON in binary frames
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            debug!("Skipping non-UTF-8 frame: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        match frame {
                            Some(frame) => info!(
                                "AIS stream closed by server: {} {}",
                                frame.code, frame.reason
                            ),
                            None => info!("AIS stream closed by server"),
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!("AIS stream error: {}", e);
                        break;
                    }
                };
                if inbound_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(StreamChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
