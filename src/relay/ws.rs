//! Realtime WebSocket relay
//!
//! Each client gets a snapshot of the cache, then every update in order.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{AppState, RelayMessage};
use crate::errors::TrackerError;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let authorized = origin
        .as_deref()
        .map_or(true, |origin| state.is_allowed_origin(origin));

    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(socket, state).await;
        } else {
            warn!("Rejected AIS WebSocket from origin {:?}", origin);
            reject(socket).await;
        }
    })
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::from("Unauthorized origin"),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Registered before the snapshot is taken; updates queue up meanwhile
    let listener = state.service.on_position_update(move |record| {
        let text = RelayMessage::Position { data: record }.to_json()?;
        tx.send(text)
            .map_err(|_| TrackerError::ListenerError("relay client gone".to_string()))
    });
    info!("AIS WebSocket client connected (listener {})", listener.id());

    let snapshot = state.service.all_positions();
    let greeting = if snapshot.is_empty() {
        RelayMessage::Connected {
            message: "AIS WebSocket connected",
        }
        .to_json()
    } else {
        RelayMessage::Positions { data: &snapshot }.to_json()
    };
    match greeting {
        Ok(text) => {
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("Failed to encode snapshot: {}", e),
    }

    let mut ping = tokio::time::interval(state.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut alive = true;

    loop {
        tokio::select! {
            Some(text) = rx.recv() => {
                if sender.send(Message::Text(text)).await.is_err() {
                    debug!("Send to AIS WebSocket client failed");
                    break;
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Pong(_))) => alive = true,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("AIS WebSocket client error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = ping.tick() => {
                if !alive {
                    info!("Terminating unresponsive AIS WebSocket client");
                    break;
                }
                alive = false;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(listener);
    info!("AIS WebSocket client disconnected");
}
