// Event catalogue shared by every component
use std::sync::Arc;

use crate::library::{MediaFilter, MediaItem, MediaType};
use crate::playback::{PlaybackControl, PlaybackError, PlaybackPhase};
use crate::queue::Direction;
use crate::realtime::ConnectionState;
use crate::service::ServiceStatus;
use crate::settings::{AutoSwitchMode, PlayMode};

/// Event names as they appear on the bus
pub mod names {
    pub const REQUEST_MEDIA_PLAY: &str = "requestMediaPlay";
    pub const CHANGE_PLAY_MODE: &str = "changePlayMode";
    pub const CHANGE_AUTO_SWITCH_MODE: &str = "changeAutoSwitchMode";
    pub const REQUEST_PLAYBACK_CONTROL: &str = "requestPlaybackControl";
    pub const REQUEST_REFRESH: &str = "requestRefresh";
    pub const SET_VOLUME: &str = "setVolume";
    pub const SET_VIDEO_LOOP: &str = "setVideoLoop";
    pub const UPDATE_SCAN_DIRECTORY: &str = "updateScanDirectory";
    pub const UPDATE_SIZE_LIMITS: &str = "updateSizeLimits";
    pub const REQUEST_CLEANUP: &str = "requestCleanup";

    pub const MEDIA_CHANGED: &str = "mediaChanged";
    pub const PLAYBACK_ERROR: &str = "playbackError";
    pub const NO_MEDIA: &str = "noMedia";
    pub const PLAYLIST_LOADED: &str = "playlistLoaded";
    pub const PLAY_MODE_CHANGED: &str = "playModeChanged";
    pub const AUTO_SWITCH_MODE_CHANGED: &str = "autoSwitchModeChanged";
    pub const PLAYBACK_STATE_CHANGED: &str = "playbackStateChanged";
    pub const SETTINGS_UPDATED: &str = "settingsUpdated";
    pub const SERVICE_STATUS_CHANGED: &str = "serviceStatusChanged";
    pub const CATALOG_REFRESHED: &str = "catalogRefreshed";
    pub const MEDIA_UPDATED: &str = "mediaUpdated";
    pub const REALTIME_STATE_CHANGED: &str = "realtimeStateChanged";
}

#[derive(Debug, Clone)]
pub enum Event {
    // Intents, produced by UI widgets
    RequestMediaPlay { direction: Direction },
    ChangePlayMode { mode: PlayMode },
    ChangeAutoSwitchMode { mode: AutoSwitchMode },
    RequestPlaybackControl { control: PlaybackControl },
    RequestRefresh { force: bool },
    SetVolume { media_type: MediaType, volume: f32 },
    SetVideoLoop { enabled: bool },
    UpdateScanDirectory { path: String },
    UpdateSizeLimits { image_max_mb: u32, video_max_mb: u32 },
    RequestCleanup,

    // State changes, consumed by UI widgets
    MediaChanged { item: MediaItem, index: usize },
    PlaybackError { error: PlaybackError, will_retry: bool },
    NoMedia,
    PlaylistLoaded { count: usize, reset: bool },
    PlayModeChanged { mode: PlayMode },
    AutoSwitchModeChanged { mode: AutoSwitchMode },
    PlaybackStateChanged { phase: PlaybackPhase },
    SettingsUpdated,
    ServiceStatusChanged { status: ServiceStatus },
    CatalogRefreshed { filter: MediaFilter, items: Arc<Vec<MediaItem>> },
    MediaUpdated { payload: serde_json::Value },
    RealtimeStateChanged { state: ConnectionState },
}

impl Event {
    pub fn name(&self) -> &'static str {
        use names::*;
        match self {
            Event::RequestMediaPlay { .. } => REQUEST_MEDIA_PLAY,
            Event::ChangePlayMode { .. } => CHANGE_PLAY_MODE,
            Event::ChangeAutoSwitchMode { .. } => CHANGE_AUTO_SWITCH_MODE,
            Event::RequestPlaybackControl { .. } => REQUEST_PLAYBACK_CONTROL,
            Event::RequestRefresh { .. } => REQUEST_REFRESH,
            Event::SetVolume { .. } => SET_VOLUME,
            Event::SetVideoLoop { .. } => SET_VIDEO_LOOP,
            Event::UpdateScanDirectory { .. } => UPDATE_SCAN_DIRECTORY,
            Event::UpdateSizeLimits { .. } => UPDATE_SIZE_LIMITS,
            Event::RequestCleanup => REQUEST_CLEANUP,
            Event::MediaChanged { .. } => MEDIA_CHANGED,
            Event::PlaybackError { .. } => PLAYBACK_ERROR,
            Event::NoMedia => NO_MEDIA,
            Event::PlaylistLoaded { .. } => PLAYLIST_LOADED,
            Event::PlayModeChanged { .. } => PLAY_MODE_CHANGED,
            Event::AutoSwitchModeChanged { .. } => AUTO_SWITCH_MODE_CHANGED,
            Event::PlaybackStateChanged { .. } => PLAYBACK_STATE_CHANGED,
            Event::SettingsUpdated => SETTINGS_UPDATED,
            Event::ServiceStatusChanged { .. } => SERVICE_STATUS_CHANGED,
            Event::CatalogRefreshed { .. } => CATALOG_REFRESHED,
            Event::MediaUpdated { .. } => MEDIA_UPDATED,
            Event::RealtimeStateChanged { .. } => REALTIME_STATE_CHANGED,
        }
    }
}
