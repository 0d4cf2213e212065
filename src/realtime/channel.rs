use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::events::{Event, EventBus};
use crate::notify::Notifier;
use crate::settings::{Settings, SettingsStore};
use crate::timer::{Spawner, TimerSlot};

use super::messages::{InboundKind, InboundMessage, OutboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the reconnect delay
    Reconnecting,
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("invalid realtime url: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("no frame from server within {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Derive the socket URL from the HTTP service URL: same host, `ws`/`wss`
/// scheme, configured path.
pub fn realtime_url(settings: &Settings) -> Result<Url, RealtimeError> {
    let mut url = Url::parse(&settings.service_url)
        .map_err(|e| RealtimeError::InvalidUrl(format!("{}: {}", settings.service_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::InvalidUrl(format!(
                "unsupported scheme {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(settings.service_url.clone()))?;
    url.set_path(&settings.realtime_path);
    url.set_query(None);
    Ok(url)
}

struct Shared {
    settings: Arc<SettingsStore>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    state: Mutex<ConnectionState>,
    closing: AtomicBool,
    shutdown: Notify,
    session: TimerSlot,
    reconnect: TimerSlot,
    spawner: Spawner,
}

/// Persistent socket to the media server.
///
/// `disconnected -> connecting -> connected -> disconnected -> reconnecting
/// -> connecting ...` until [`disconnect`](Self::disconnect) is called.
#[derive(Clone)]
pub struct RealtimeChannel {
    shared: Arc<Shared>,
}

impl RealtimeChannel {
    pub fn new(settings: Arc<SettingsStore>, bus: EventBus, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                bus,
                notifier,
                state: Mutex::new(ConnectionState::Disconnected),
                closing: AtomicBool::new(false),
                shutdown: Notify::new(),
                session: TimerSlot::new("realtime-session"),
                reconnect: TimerSlot::new("realtime-reconnect"),
                spawner: Spawner::current(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the socket in the background. Replaces any running session.
    /// Callable from any thread once the channel was built on a runtime.
    pub fn connect(&self) {
        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.reconnect.cancel();
        self.start_session();
    }

    /// Stop for good: no reconnect survives this call.
    pub fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        // Pending reconnect first, so nothing can revive the socket
        self.shared.reconnect.cancel();
        self.shared.shutdown.notify_waiters();
        self.set_state(ConnectionState::Disconnected);
        info!("realtime channel disconnected");
    }

    fn start_session(&self) {
        let channel = self.clone();
        let session = async move {
            channel.set_state(ConnectionState::Connecting);
            let result = channel.run_session().await;

            if channel.shared.closing.load(Ordering::SeqCst) {
                channel.set_state(ConnectionState::Disconnected);
                return;
            }
            let dropped = channel.state() == ConnectionState::Connected;
            match result {
                Ok(()) => info!("realtime connection closed by server"),
                Err(e) => warn!("realtime connection lost: {}", e),
            }
            channel.set_state(ConnectionState::Disconnected);
            if dropped {
                channel
                    .shared
                    .notifier
                    .warning("Lost connection to the media server, reconnecting");
            }
            channel.schedule_reconnect();
        };
        match self.shared.spawner.spawn("realtime session", session) {
            Some(handle) => self.shared.session.replace(handle),
            None => self.set_state(ConnectionState::Disconnected),
        }
    }

    fn schedule_reconnect(&self) {
        if self.shared.closing.load(Ordering::SeqCst) {
            return;
        }
        let delay = Duration::from_millis(self.shared.settings.get().reconnect_delay_ms);
        self.set_state(ConnectionState::Reconnecting);
        debug!("reconnecting in {:?}", delay);

        let channel = self.clone();
        let retry = async move {
            tokio::time::sleep(delay).await;
            if channel.shared.closing.load(Ordering::SeqCst) {
                return;
            }
            channel.start_session();
        };
        if let Some(handle) = self.shared.spawner.spawn("realtime reconnect", retry) {
            self.shared.reconnect.replace(handle);
        }
    }

    async fn run_session(&self) -> Result<(), RealtimeError> {
        let settings = self.shared.settings.get();
        let url = realtime_url(&settings)?;

        let (stream, _) = tokio::select! {
            connected = tokio_tungstenite::connect_async(url.as_str()) => connected?,
            _ = self.shared.shutdown.notified() => return Ok(()),
        };
        let (mut tx, mut rx) = stream.split();

        if self.shared.closing.load(Ordering::SeqCst) {
            let _ = tx.send(Message::Close(None)).await;
            return Ok(());
        }
        self.set_state(ConnectionState::Connected);
        info!("realtime connected to {}", url);

        let heartbeat_enabled = settings.heartbeat_interval_ms > 0;
        let period = Duration::from_millis(settings.heartbeat_interval_ms.max(1));
        let liveness = (settings.heartbeat_timeout_ms > 0)
            .then(|| Duration::from_millis(settings.heartbeat_timeout_ms));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_seen = Instant::now();

        loop {
            if self.shared.closing.load(Ordering::SeqCst) {
                let _ = tx.send(Message::Close(None)).await;
                return Ok(());
            }
            tokio::select! {
                _ = heartbeat.tick(), if heartbeat_enabled => {
                    if let Some(limit) = liveness {
                        if last_seen.elapsed() > limit {
                            return Err(RealtimeError::HeartbeatTimeout(limit));
                        }
                    }
                    let ping = OutboundMessage::ping(chrono::Utc::now().timestamp_millis());
                    trace!("heartbeat ping");
                    tx.send(Message::Text(ping.to_json()?)).await?;
                }
                frame = rx.next() => {
                    let message = match frame {
                        None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(message)) => message,
                    };
                    last_seen = Instant::now();
                    match message {
                        Message::Text(text) => self.dispatch(&text),
                        Message::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => self.dispatch(&text),
                            Err(_) => debug!("ignoring non-utf8 binary frame"),
                        },
                        Message::Close(frame) => {
                            debug!("server sent close: {:?}", frame);
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                _ = self.shared.shutdown.notified() => {
                    let _ = tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Route one inbound frame. Bad frames are logged and dropped.
    pub fn dispatch(&self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("ignoring malformed realtime frame: {}", e);
                return;
            }
        };

        match message.kind() {
            InboundKind::MediaUpdated => {
                info!("media server reports a catalog change");
                if self.shared.settings.get().show_media_update_toast {
                    self.shared.notifier.info("Media library updated");
                }
                self.shared.bus.emit(Event::MediaUpdated {
                    payload: message.payload,
                });
            }
            InboundKind::Pong => trace!("heartbeat pong"),
            InboundKind::Unknown => debug!("ignoring realtime message of type {}", message.kind),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.shared.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            debug!("realtime state -> {:?}", next);
            self.shared
                .bus
                .emit(Event::RealtimeStateChanged { state: next });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::names;
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::settings::MemoryBackend;
    use std::sync::atomic::AtomicUsize;

    fn channel() -> (RealtimeChannel, EventBus, Arc<RecordingNotifier>) {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let settings =
            SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
        (RealtimeChannel::new(settings, bus.clone(), notifier.clone()), bus, notifier)
    }

    #[test]
    fn test_realtime_url_follows_service_scheme() {
        let mut settings = Settings::default();
        assert_eq!(realtime_url(&settings).unwrap().as_str(), "ws://localhost:9000/ws");

        settings.service_url = "https://media.local:8443/api?x=1".to_string();
        settings.realtime_path = "/socket.io".to_string();
        assert_eq!(
            realtime_url(&settings).unwrap().as_str(),
            "wss://media.local:8443/socket.io"
        );

        settings.service_url = "ftp://media.local".to_string();
        assert!(realtime_url(&settings).is_err());
    }

    #[test]
    fn test_dispatch_routes_media_updates_only() {
        let (channel, bus, notifier) = channel();
        let updates = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&updates);
        bus.on(names::MEDIA_UPDATED, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        channel.dispatch(r#"{"type":"media_updated","payload":{}}"#);
        channel.dispatch(r#"{"type":"pong"}"#);
        channel.dispatch(r#"{"type":"something_else"}"#);
        channel.dispatch("{ broken");

        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.count(NoticeLevel::Info), 1);
    }

    #[test]
    fn test_connect_without_runtime_stays_disconnected() {
        let (channel, _bus, _notifier) = channel();
        channel.connect();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_without_session_is_quiet() {
        let (channel, _bus, _notifier) = channel();
        channel.disconnect();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
