// Media display capability
// The controller decides *what* to show; a display puts it on screen.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::library::MediaItem;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DisplayError {
    #[error("media not found: {0}")]
    NotFound(String),
    #[error("server answered {status} for {url}")]
    Status { status: u16, url: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("media could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShowOptions {
    pub volume: f32,
    pub looping: bool,
}

/// Something that can render catalog media: a browser element, a window, a test double.
///
/// Loading and presenting are separate steps. A load may finish after a newer
/// one was requested, so only the caller knows whether its result should
/// reach the screen.
#[async_trait]
pub trait MediaDisplay: Send + Sync {
    /// Fetch and decode `item` from `url`. Resolves once the media is ready
    /// or failed; what is on screen does not change.
    async fn load(&self, item: &MediaItem, url: &str) -> Result<(), DisplayError>;

    /// Put a loaded item on screen, starting it if it has a timeline
    fn present(&self, item: &MediaItem, options: ShowOptions);

    /// Warm caches for `item` without displaying it
    async fn preload(&self, item: &MediaItem, url: &str) -> Result<(), DisplayError>;

    fn play(&self);

    fn pause(&self);

    fn stop(&self);

    fn set_volume(&self, volume: f32);

    fn set_loop(&self, looping: bool);
}

#[derive(Debug, Default, Clone, Copy)]
struct ElementState {
    playing: bool,
    paused: bool,
    volume: f32,
    looping: bool,
}

/// Headless display: loading an item means fetching its file from the
/// media server and checking that real content came back.
pub struct HttpMediaDisplay {
    http: reqwest::Client,
    current: Mutex<Option<MediaItem>>,
    element: Mutex<ElementState>,
}

impl HttpMediaDisplay {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            current: Mutex::new(None),
            element: Mutex::new(ElementState {
                volume: 1.0,
                ..Default::default()
            }),
        }
    }

    async fn fetch(&self, url: &str) -> Result<usize, DisplayError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DisplayError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DisplayError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(DisplayError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DisplayError::Network(e.to_string()))?;
        if body.is_empty() {
            return Err(DisplayError::Decode(format!("empty body from {}", url)));
        }
        Ok(body.len())
    }

    pub fn current_item(&self) -> Option<MediaItem> {
        self.current.lock().clone()
    }

    pub fn is_playing(&self) -> bool {
        self.element.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.element.lock().paused
    }

    pub fn volume(&self) -> f32 {
        self.element.lock().volume
    }
}

impl Default for HttpMediaDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDisplay for HttpMediaDisplay {
    async fn load(&self, item: &MediaItem, url: &str) -> Result<(), DisplayError> {
        let bytes = self.fetch(url).await?;
        debug!("loaded {} ({} bytes)", item.display_name, bytes);
        Ok(())
    }

    fn present(&self, item: &MediaItem, options: ShowOptions) {
        *self.current.lock() = Some(item.clone());
        let mut element = self.element.lock();
        element.volume = options.volume.clamp(0.0, 1.0);
        element.looping = options.looping;
        element.playing = item.media_type.is_playable();
        element.paused = false;
    }

    async fn preload(&self, item: &MediaItem, url: &str) -> Result<(), DisplayError> {
        let bytes = self.fetch(url).await?;
        trace!("preloaded {} ({} bytes)", item.display_name, bytes);
        Ok(())
    }

    fn play(&self) {
        let mut element = self.element.lock();
        element.playing = true;
        element.paused = false;
    }

    fn pause(&self) {
        let mut element = self.element.lock();
        if element.playing {
            element.playing = false;
            element.paused = true;
        }
    }

    fn stop(&self) {
        let mut element = self.element.lock();
        element.playing = false;
        element.paused = false;
    }

    fn set_volume(&self, volume: f32) {
        self.element.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn set_loop(&self, looping: bool) {
        self.element.lock().looping = looping;
    }
}
