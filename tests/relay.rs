use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ais_relay::{
    config::ServerConfig,
    database::SubscriptionStore,
    errors::TrackerError,
    manager::ProviderManager,
    models::{EntityKind, Mmsi, PositionRecord, SubscriptionKey, TrackingConfig},
    providers::{AisProvider, PositionCallback},
    relay::{self, AppState},
    tracking::TrackingService,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::frame::coding::CloseCode,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Provider whose positions are emitted by the test
#[derive(Default)]
struct ManualProvider {
    callbacks: Mutex<HashMap<Mmsi, PositionCallback>>,
}

impl ManualProvider {
    fn emit(&self, mmsi: u32, latitude: f64) {
        let mmsi = Mmsi::try_from(mmsi).unwrap();
        let callback = self.callbacks.lock().get(&mmsi).cloned().expect("not tracked");
        callback(PositionRecord {
            mmsi: mmsi.to_string(),
            latitude,
            longitude: 14.24,
            course: Some(90.0),
            speed: Some(12.3),
            heading: None,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
        });
    }
}

impl AisProvider for ManualProvider {
    fn name(&self) -> &str {
        "Manual"
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
        self.callbacks.lock().entry(mmsi).or_insert(on_update);
        Ok(())
    }

    fn stop_tracking(&self, mmsi: &Mmsi) {
        self.callbacks.lock().remove(mmsi);
    }

    fn is_tracking(&self, mmsi: &Mmsi) -> bool {
        self.callbacks.lock().contains_key(mmsi)
    }

    fn position(&self, _mmsi: &Mmsi) -> Option<PositionRecord> {
        None
    }

    fn all_positions(&self) -> HashMap<String, PositionRecord> {
        HashMap::new()
    }

    fn stop_all(&self) {
        self.callbacks.lock().clear();
    }
}

struct TestServer {
    addr: SocketAddr,
    service: Arc<TrackingService>,
    provider: Arc<ManualProvider>,
    _dir: TempDir,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE places (id INTEGER PRIMARY KEY, name TEXT NOT NULL, latitude REAL, longitude REAL,
        is_dynamic_location INTEGER DEFAULT 0, ais_provider TEXT, ais_api_key TEXT, ais_mmsi TEXT)",
    "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT NOT NULL, latitude REAL, longitude REAL,
        is_dynamic_location INTEGER DEFAULT 0, ais_provider TEXT, ais_api_key TEXT, ais_mmsi TEXT)",
    "INSERT INTO places (id, name, latitude, longitude, is_dynamic_location, ais_provider, ais_api_key, ais_mmsi)
     VALUES
        (1, 'Gozo Channel Ferry', 36.02, 14.30, 1, 'manual', NULL, '248692000'),
        (2, 'Harbour Tour', 36.04, 14.26, 1, 'manual', NULL, '215123000'),
        (3, 'Lighthouse', 36.07, 14.19, 0, NULL, NULL, NULL)",
];

async fn start_server() -> TestServer {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(config: ServerConfig) -> TestServer {
    let provider = Arc::new(ManualProvider::default());
    let mut manager = ProviderManager::new();
    manager.register_provider("manual", provider.clone());

    let service = Arc::new(TrackingService::new(manager, None));
    let subscribed = service.subscribe(
        SubscriptionKey::new(EntityKind::Place, 1),
        &TrackingConfig {
            name: Some("Gozo Channel Ferry".to_string()),
            provider: Some("manual".to_string()),
            identifiers: Some("248692000".to_string()),
            ..Default::default()
        },
    );
    assert!(subscribed);

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display());
    let store = SubscriptionStore::from_url(&url)
        .await
        .expect("Failed to open database");
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(store.pool())
            .await
            .expect("Failed to set up schema");
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(service.clone(), store, &config));
    tokio::spawn(relay::serve(listener, state, std::future::pending()));

    TestServer {
        addr,
        service,
        provider,
        _dir: dir,
    }
}

async fn wait_for_listeners(server: &TestServer, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.service.manager().listener_count() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} listeners, have {}",
            expected,
            server.service.manager().listener_count()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Next `data:` payload of a Server-Sent Events response
async fn next_event(response: &mut reqwest::Response, buffer: &mut String) -> serde_json::Value {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let event: String = buffer.drain(..end + 2).collect();
            if let Some(data) = event.lines().find_map(|line| line.strip_prefix("data:")) {
                return serde_json::from_str(data.trim()).unwrap();
            }
            continue;
        }
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("no event within 5 seconds")
            .expect("stream error")
            .expect("stream ended");
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
    }
}

async fn connect(addr: SocketAddr, origin: Option<&'static str>) -> Client {
    let mut request = format!("ws://{}/api/ais/ws", addr)
        .into_client_request()
        .unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
    }
    let (client, _) = connect_async(request).await.expect("Failed to connect");
    client
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no message within 5 seconds")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn test_connected_notice_when_cache_empty() {
    let server = start_server().await;
    let mut client = connect(server.addr, Some("https://discover-gozo.com")).await;

    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["message"], "AIS WebSocket connected");
}

#[tokio::test]
async fn test_snapshot_then_updates_in_order() {
    let server = start_server().await;
    server.provider.emit(248_692_000, 36.05);

    let mut client = connect(server.addr, None).await;
    let snapshot = next_json(&mut client).await;
    assert_eq!(snapshot["type"], "positions");
    assert_eq!(snapshot["data"]["248692000"]["latitude"], 36.05);

    server.provider.emit(248_692_000, 36.06);
    server.provider.emit(248_692_000, 36.07);

    let first = next_json(&mut client).await;
    let second = next_json(&mut client).await;
    assert_eq!(first["type"], "position");
    assert_eq!(first["data"]["mmsi"], "248692000");
    assert_eq!(first["data"]["latitude"], 36.06);
    assert_eq!(second["data"]["latitude"], 36.07);
}

#[tokio::test]
async fn test_unauthorized_origin_is_closed() {
    let server = start_server().await;
    let mut client = connect(server.addr, Some("https://evil.example.com")).await;

    let message = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no close frame")
        .expect("stream ended")
        .expect("websocket error");
    match message {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason, "Unauthorized origin");
        }
        other => panic!("expected close frame, got {:?}", other),
    }
    assert_eq!(server.service.manager().listener_count(), 0);
}

#[tokio::test]
async fn test_listener_removed_when_client_leaves() {
    let server = start_server().await;
    let mut client = connect(server.addr, Some("http://localhost:5173")).await;
    next_json(&mut client).await;
    assert_eq!(server.service.manager().listener_count(), 1);

    client.close(None).await.unwrap();
    drop(client);

    wait_for_listeners(&server, 0).await;
}

#[tokio::test]
async fn test_unresponsive_client_is_terminated() {
    let server = start_server_with(ServerConfig {
        ping_interval: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let mut responsive = connect(server.addr, None).await;
    next_json(&mut responsive).await;
    let mut silent = connect(server.addr, None).await;
    next_json(&mut silent).await;
    assert_eq!(server.service.manager().listener_count(), 2);

    // Reading answers pings; the silent client never reads again
    let reader = tokio::spawn(async move {
        while let Some(Ok(_)) = responsive.next().await {}
    });

    wait_for_listeners(&server, 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server.service.manager().listener_count(), 1);

    reader.abort();
    drop(silent);
}

#[tokio::test]
async fn test_sse_stream() {
    let server = start_server().await;
    server.provider.emit(248_692_000, 36.05);

    let mut response = reqwest::get(format!("http://{}/api/ais/stream", server.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    let mut buffer = String::new();

    let connected = next_event(&mut response, &mut buffer).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["message"], "AIS stream connected");

    let snapshot = next_event(&mut response, &mut buffer).await;
    assert_eq!(snapshot["type"], "positions");
    assert_eq!(snapshot["data"]["248692000"]["latitude"], 36.05);

    server.provider.emit(248_692_000, 36.06);
    let update = next_event(&mut response, &mut buffer).await;
    assert_eq!(update["type"], "position");
    assert_eq!(update["data"]["latitude"], 36.06);
    assert_eq!(server.service.manager().listener_count(), 1);

    drop(response);

    // The server notices the closed connection on its next write
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.service.manager().listener_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "SSE listener not removed");
        server.provider.emit(248_692_000, 36.07);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_subscribe_route() {
    let server = start_server().await;
    let base = format!("http://{}/api/ais", server.addr);
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/subscribe/2?type=place", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Subscribed to track place 2");

    let key = SubscriptionKey::new(EntityKind::Place, 2);
    assert_eq!(server.service.subscription(key).unwrap().identifiers.len(), 1);
    assert!(server
        .provider
        .is_tracking(&Mmsi::try_from(215_123_000).unwrap()));

    let missing = http
        .post(format!("{}/subscribe/99?type=place", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "place not found");

    let not_dynamic = http
        .post(format!("{}/subscribe/3?type=place", base))
        .send()
        .await
        .unwrap();
    assert_eq!(not_dynamic.status(), reqwest::StatusCode::BAD_REQUEST);

    let without_type = http.post(format!("{}/subscribe/2", base)).send().await.unwrap();
    assert_eq!(without_type.status(), reqwest::StatusCode::BAD_REQUEST);

    assert_eq!(server.service.subscription_count(), 2);
}

#[tokio::test]
async fn test_rest_routes() {
    let server = start_server().await;
    server.provider.emit(248_692_000, 36.05);
    let base = format!("http://{}/api/ais", server.addr);
    let http = reqwest::Client::new();

    let positions: serde_json::Value = http
        .get(format!("{}/positions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(positions["248692000"]["longitude"], 14.24);

    let for_place: serde_json::Value = http
        .get(format!("{}/positions/place/1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(for_place.as_array().unwrap().len(), 1);

    let bad_kind = http.get(format!("{}/positions/tour/1", base)).send().await.unwrap();
    assert_eq!(bad_kind.status(), reqwest::StatusCode::BAD_REQUEST);

    let bad_type = http
        .post(format!("{}/subscribe/1?type=tour", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_type.status(), reqwest::StatusCode::BAD_REQUEST);

    let status: serde_json::Value = http
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["subscriptions"], 1);
    assert_eq!(status["trackedVessels"], 1);
    assert_eq!(status["connected"], false);
    assert_eq!(status["diagnostics"]["places"]["flagged"], 2);
    assert_eq!(status["diagnostics"]["places"]["configured"], 2);

    let unknown = http
        .post(format!("{}/unsubscribe/42?type=event", base))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

    let removed = http
        .post(format!("{}/unsubscribe/1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), reqwest::StatusCode::OK);
    assert_eq!(server.service.subscription_count(), 0);

    // The merged cache keeps the last position after unsubscribing
    assert!(server
        .service
        .position(&Mmsi::try_from(248_692_000).unwrap())
        .is_some());
}
