//! Server-Sent Events variant of the relay, for clients behind proxies
//! that do not pass WebSocket upgrades

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{AppState, RelayMessage};
use crate::errors::TrackerError;

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    let mut initial = Vec::new();
    match (RelayMessage::Connected {
        message: "AIS stream connected",
    })
    .to_json()
    {
        Ok(text) => initial.push(text),
        Err(e) => warn!("Failed to encode SSE greeting: {}", e),
    }

    let listener = state.service.on_position_update(move |record| {
        let text = RelayMessage::Position { data: record }.to_json()?;
        tx.send(text)
            .map_err(|_| TrackerError::ListenerError("SSE client gone".to_string()))
    });

    let snapshot = state.service.all_positions();
    if !snapshot.is_empty() {
        match (RelayMessage::Positions { data: &snapshot }).to_json() {
            Ok(text) => initial.push(text),
            Err(e) => warn!("Failed to encode SSE snapshot: {}", e),
        }
    }
    info!("AIS SSE client connected (listener {})", listener.id());

    // The listener handle lives in the stream state; it is dropped, and the
    // listener removed, when the client goes away.
    let updates = stream::unfold((rx, listener), |(mut rx, listener)| async move {
        rx.recv().await.map(|text| (text, (rx, listener)))
    });

    let events = stream::iter(initial)
        .chain(updates)
        .map(|text| Ok::<_, Infallible>(Event::default().data(text)));

    Sse::new(events).keep_alive(KeepAlive::default())
}
