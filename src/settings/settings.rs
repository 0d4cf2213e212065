// Settings record and defaults
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::library::{MediaFilter, MediaType};

use super::migration::CURRENT_CONFIG_VERSION;

/// Order in which the playlist is walked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    #[default]
    Random,
    Sequential,
}

/// Policy for unattended progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoSwitchMode {
    #[default]
    Timer,
    Detect,
    #[serde(alias = "none")]
    Manual,
}

/// The single persisted record. Every field has a default so a stored blob
/// missing any key still deserializes; keys this build does not know about
/// are carried in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub config_version: String,
    pub enabled: bool,

    // Service
    pub service_url: String,
    pub realtime_path: String,
    pub service_directory: String,
    pub image_max_size_mb: u32,
    pub video_max_size_mb: u32,
    pub media_filter: MediaFilter,

    // Playback
    pub play_mode: PlayMode,
    pub auto_switch_mode: AutoSwitchMode,
    pub switch_interval_ms: u64,
    pub switch_cooldown_ms: u64,
    pub ai_response_enabled: bool,
    pub player_message_enabled: bool,
    pub video_volume: f32,
    pub audio_volume: f32,
    pub video_loop: bool,
    pub preload_images: bool,
    pub preload_videos: bool,

    // Interface
    pub show_media_info: bool,
    pub is_window_visible: bool,
    pub is_locked: bool,
    pub show_media_update_toast: bool,

    // Timing
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub polling_interval_ms: u64,

    // Playback history
    pub random_played_indices: Vec<usize>,
    pub current_random_index: Option<usize>,
    pub last_switch_time: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION.to_string(),
            enabled: true,
            service_url: "http://localhost:9000".to_string(),
            realtime_path: "/ws".to_string(),
            service_directory: String::new(),
            image_max_size_mb: 5,
            video_max_size_mb: 100,
            media_filter: MediaFilter::All,
            play_mode: PlayMode::Random,
            auto_switch_mode: AutoSwitchMode::Timer,
            switch_interval_ms: 5000,
            switch_cooldown_ms: 3000,
            ai_response_enabled: true,
            player_message_enabled: true,
            video_volume: 0.8,
            audio_volume: 0.8,
            video_loop: false,
            preload_images: true,
            preload_videos: false,
            show_media_info: true,
            is_window_visible: true,
            is_locked: false,
            show_media_update_toast: true,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 0,
            reconnect_delay_ms: 10_000,
            polling_interval_ms: 30_000,
            random_played_indices: Vec::new(),
            current_random_index: None,
            last_switch_time: 0,
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn volume_for(&self, media_type: MediaType) -> f32 {
        match media_type {
            MediaType::Image => 1.0,
            MediaType::Video => self.video_volume,
            MediaType::Audio => self.audio_volume,
        }
    }

    pub fn preload_enabled_for(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Image => self.preload_images,
            MediaType::Video | MediaType::Audio => self.preload_videos,
        }
    }

    /// Decode a stored blob key by key. A value that does not fit its field
    /// leaves the default in place and its key is returned, so the caller
    /// can avoid writing defaults back over what the user stored.
    pub fn from_value_lenient(raw: Value) -> (Settings, Vec<String>) {
        if let Ok(settings) = serde_json::from_value::<Settings>(raw.clone()) {
            return (settings, Vec::new());
        }
        let Value::Object(entries) = raw else {
            return (Settings::default(), vec!["<root>".to_string()]);
        };

        let mut accepted = Settings::default().to_value();
        let mut rejected = Vec::new();
        for (key, value) in entries {
            let mut candidate = accepted.clone();
            if let Value::Object(map) = &mut candidate {
                map.insert(key.clone(), value);
            }
            if serde_json::from_value::<Settings>(candidate.clone()).is_ok() {
                accepted = candidate;
            } else {
                rejected.push(key);
            }
        }
        (serde_json::from_value(accepted).unwrap_or_default(), rejected)
    }

    /// Serialize to a JSON object (the shape persisted by every backend)
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Recursively merge `patch` onto `base`; objects merge key by key,
/// everything else is replaced.
pub fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_keys_backfilled() {
        let settings: Settings =
            serde_json::from_value(json!({"service_url": "http://media:9100"})).unwrap();
        assert_eq!(settings.service_url, "http://media:9100");
        assert_eq!(settings.switch_interval_ms, 5000);
        assert_eq!(settings.play_mode, PlayMode::Random);
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let settings: Settings =
            serde_json::from_value(json!({"custom_theme": {"accent": "#4CAF50"}})).unwrap();
        let value = settings.to_value();
        assert_eq!(value["custom_theme"]["accent"], "#4CAF50");
    }

    #[test]
    fn test_manual_mode_accepts_none_alias() {
        let settings: Settings =
            serde_json::from_value(json!({"auto_switch_mode": "none"})).unwrap();
        assert_eq!(settings.auto_switch_mode, AutoSwitchMode::Manual);
    }

    #[test]
    fn test_lenient_decode_keeps_good_keys() {
        let (settings, rejected) = Settings::from_value_lenient(json!({
            "service_url": "http://media:9100",
            "switch_interval_ms": "8000",
            "play_mode": "sequential",
            "custom_theme": "dark"
        }));
        assert_eq!(settings.service_url, "http://media:9100");
        assert_eq!(settings.play_mode, PlayMode::Sequential);
        assert_eq!(settings.switch_interval_ms, 5000);
        assert_eq!(settings.extra["custom_theme"], "dark");
        assert_eq!(rejected, vec!["switch_interval_ms".to_string()]);

        let (settings, rejected) = Settings::from_value_lenient(json!([1, 2]));
        assert_eq!(settings, Settings::default());
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_merge_json_is_deep() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 1});
        merge_json(&mut base, &json!({"a": {"y": 3}, "c": true}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "b": 1, "c": true}));
    }
}
