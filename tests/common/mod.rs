// Fake media server for integration tests
#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mediadeck_lib::events::EventBus;
use mediadeck_lib::notify::RecordingNotifier;
use mediadeck_lib::settings::{AutoSwitchMode, MemoryBackend, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketBehaviour {
    /// Send a few frames, then answer pings until the client leaves
    #[default]
    Chatty,
    /// Accept, then close straight away
    CloseImmediately,
    /// Accept and read, never send anything back
    Silent,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    pub media_calls: Arc<AtomicUsize>,
    pub file_calls: Arc<AtomicUsize>,
    pub socket_connections: Arc<AtomicUsize>,
    pub pings: Arc<AtomicUsize>,
    pub fail_media: Arc<AtomicBool>,
    pub last_scan: Arc<Mutex<Option<Value>>>,
    pub socket: SocketBehaviour,
}

impl FakeServer {
    pub fn new(socket: SocketBehaviour) -> Self {
        Self {
            socket,
            ..Default::default()
        }
    }

    pub fn media_calls(&self) -> usize {
        self.media_calls.load(Ordering::SeqCst)
    }

    pub fn socket_connections(&self) -> usize {
        self.socket_connections.load(Ordering::SeqCst)
    }

    /// Serve on an ephemeral port; returns the base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/status", get(status))
            .route("/media", get(media))
            .route("/scan", post(scan))
            .route("/cleanup", post(cleanup))
            .route("/file/*path", get(file))
            .route("/ws", get(socket))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}

pub fn catalog() -> Value {
    json!({
        "media": [
            {"rel_path": "pics/0.png", "name": "0.png", "type": "image", "size": 10},
            {"rel_path": "pics/1.png", "name": "1.png", "type": "image", "size": 10},
            {"rel_path": "pics/2.jpg", "name": "2.jpg", "type": "image", "size": 10},
            {"rel_path": "clips/a.mp4", "name": "a.mp4", "type": "video", "size": 500},
            {"rel_path": "clips/b.webm", "name": "b.webm", "type": "video", "size": 500}
        ]
    })
}

async fn status() -> Json<Value> {
    Json(json!({
        "active": true,
        "observer_active": true,
        "total_count": 5,
        "image_count": 3,
        "video_count": 2,
        "directory": "/srv/media",
        "media_config": {"image_max_mb": 5, "video_max_mb": 100}
    }))
}

async fn media(State(server): State<FakeServer>) -> Response {
    server.media_calls.fetch_add(1, Ordering::SeqCst);
    if server.fail_media.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "index unavailable"})),
        )
            .into_response();
    }
    Json(catalog()).into_response()
}

async fn scan(State(server): State<FakeServer>, Json(body): Json<Value>) -> Json<Value> {
    *server.last_scan.lock() = Some(body);
    Json(json!({"success": true}))
}

async fn cleanup() -> Json<Value> {
    Json(json!({"removed": 2, "remaining_total": 3}))
}

/// Files whose name starts with `slow` take half a second
async fn file(State(server): State<FakeServer>, Path(path): Path<String>) -> Vec<u8> {
    server.file_calls.fetch_add(1, Ordering::SeqCst);
    if path.starts_with("slow") {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    b"not really a picture".to_vec()
}

async fn socket(ws: WebSocketUpgrade, State(server): State<FakeServer>) -> Response {
    server.socket_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| session(socket, server))
}

async fn session(mut socket: WebSocket, server: FakeServer) {
    match server.socket {
        SocketBehaviour::CloseImmediately => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        SocketBehaviour::Silent => {
            while let Some(Ok(_)) = socket.recv().await {}
            return;
        }
        SocketBehaviour::Chatty => {}
    }

    for frame in [
        "definitely not json".to_string(),
        json!({"type": "scan_progress", "payload": {"done": 1}}).to_string(),
        json!({"type": "media_updated", "data": {"total": 5}, "timestamp": 1}).to_string(),
    ] {
        if socket.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if text.contains("\"ping\"") {
                server.pings.fetch_add(1, Ordering::SeqCst);
                let pong = json!({"type": "pong", "timestamp": 2}).to_string();
                if socket.send(Message::Text(pong)).await.is_err() {
                    return;
                }
            }
        }
    }
}

pub struct Harness {
    pub bus: EventBus,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Arc<SettingsStore>,
}

/// Settings pointed at `base_url`, with automatic switching off
pub fn harness(base_url: &str) -> Harness {
    let bus = EventBus::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let settings =
        SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
    let base_url = base_url.to_string();
    settings.update(|s| {
        s.service_url = base_url;
        s.auto_switch_mode = AutoSwitchMode::Manual;
    });
    Harness {
        bus,
        notifier,
        settings,
    }
}

/// Poll `check` until it holds or `within` runs out
pub async fn eventually<F: Fn() -> bool>(check: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
