use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::library::{DirectoryScanner, DirectorySummary, MediaFilter, MediaItem, ValidationError};
use crate::notify::Notifier;
use crate::settings::SettingsStore;

use super::cache::RefreshCache;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepted image size limits, in MB
pub const IMAGE_LIMIT_RANGE: RangeInclusive<u32> = 1..=50;

/// Accepted video size limits, in MB
pub const VIDEO_LIMIT_RANGE: RangeInclusive<u32> = 10..=500;

/// A client for the companion media server's REST API.
pub struct ServiceClient {
    http: reqwest::Client,
    settings: Arc<SettingsStore>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    cache: RefreshCache,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response format: {0}")]
    Parse(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// -- Response types --

/// `GET /status`. A failed check is reported as `active: false` with `error` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub observer_active: bool,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub image_count: usize,
    #[serde(default)]
    pub video_count: usize,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub media_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceStatus {
    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            active: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MediaListResponse {
    #[serde(default)]
    media: Vec<Value>,
}

/// Decode a `/media` body entry by entry; an entry that does not decode
/// is skipped, not allowed to sink the whole listing.
fn decode_media_list(value: Value) -> Result<Vec<MediaItem>, ServiceError> {
    let response: MediaListResponse =
        serde_json::from_value(value).map_err(|e| ServiceError::Parse(e.to_string()))?;
    let total = response.media.len();
    let items: Vec<MediaItem> = response
        .media
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<MediaItem>(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("skipping malformed media entry: {}", e);
                None
            }
        })
        .collect();
    if items.len() != total {
        debug!("kept {} of {} media entries", items.len(), total);
    }
    Ok(items)
}

/// `POST /cleanup`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    #[serde(default)]
    pub removed: usize,
    #[serde(default)]
    pub remaining_total: usize,
}

/// Range-check size limits before anything goes over the wire
pub fn validate_size_limits(image_max_mb: u32, video_max_mb: u32) -> Result<(), ValidationError> {
    if !IMAGE_LIMIT_RANGE.contains(&image_max_mb) {
        return Err(ValidationError::ImageLimitOutOfRange {
            value: image_max_mb,
            min: *IMAGE_LIMIT_RANGE.start(),
            max: *IMAGE_LIMIT_RANGE.end(),
        });
    }
    if !VIDEO_LIMIT_RANGE.contains(&video_max_mb) {
        return Err(ValidationError::VideoLimitOutOfRange {
            value: video_max_mb,
            min: *VIDEO_LIMIT_RANGE.start(),
            max: *VIDEO_LIMIT_RANGE.end(),
        });
    }
    Ok(())
}

impl ServiceClient {
    pub fn new(settings: Arc<SettingsStore>, bus: EventBus, notifier: Arc<dyn Notifier>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            settings,
            bus,
            notifier,
            cache: RefreshCache::default(),
        }
    }

    /// Build a full URL against the configured server
    fn endpoint(&self, path: &str) -> String {
        let base = self.settings.get().service_url;
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ServiceError> {
        let response = self.http.get(self.endpoint(path)).query(query).send().await?;
        Self::read_json(response).await
    }

    async fn post_json(&self, path: &str, body: Option<Value>) -> Result<Value, ServiceError> {
        let mut request = self.http.post(self.endpoint(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, ServiceError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Servers report failures as {"error": "..."}; fall back to the raw body
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string()))
    }

    // ===== Status =====

    pub async fn try_status(&self) -> Result<ServiceStatus, ServiceError> {
        let value = self.get_json("/status", &[]).await?;
        serde_json::from_value(value).map_err(|e| ServiceError::Parse(e.to_string()))
    }

    /// Ask the server for its status. Never fails: an unreachable server is an inactive status.
    pub async fn check_status(&self) -> ServiceStatus {
        let status = match self.try_status().await {
            Ok(status) => {
                debug!(
                    "service status: active={} total={} images={} videos={}",
                    status.active, status.total_count, status.image_count, status.video_count
                );
                status
            }
            Err(e) => {
                warn!("service status check failed: {}", e);
                ServiceStatus::offline(e.to_string())
            }
        };
        self.bus.emit(Event::ServiceStatusChanged {
            status: status.clone(),
        });
        status
    }

    // ===== Catalog =====

    pub async fn try_fetch_list(&self, filter: MediaFilter) -> Result<Vec<MediaItem>, ServiceError> {
        let value = self.get_json("/media", &[("type", filter.as_query())]).await?;
        decode_media_list(value)
    }

    /// Uncached listing. Any failure yields an empty list and a warning.
    pub async fn fetch_list(&self, filter: MediaFilter) -> Vec<MediaItem> {
        match self.try_fetch_list(filter).await {
            Ok(items) => items,
            Err(e) => {
                warn!("media list request failed: {}", e);
                self.notifier
                    .warning(&format!("Could not load the media list: {}", e));
                Vec::new()
            }
        }
    }

    /// The single entry point for list-affecting work.
    ///
    /// Within [`REFRESH_THROTTLE`](super::REFRESH_THROTTLE) of the last attempt
    /// for the configured filter, a non-forced call returns the cached listing.
    /// Concurrent calls wait for the one in flight and share its result.
    pub async fn refresh(&self, force: bool) -> Arc<Vec<MediaItem>> {
        let filter = self.settings.get().media_filter;
        let asked_at = Instant::now();

        if !force {
            if let Some(items) = self.cache.fresh(filter) {
                debug!("refresh throttled, serving {} cached items", items.len());
                return items;
            }
        }

        let _in_flight = self.cache.begin_fetch().await;

        // Whoever held the gate may already have fetched for us
        if let Some(items) = self.cache.fetched_since(filter, asked_at) {
            return items;
        }
        if !force {
            if let Some(items) = self.cache.fresh(filter) {
                return items;
            }
        }

        match self.try_fetch_list(filter).await {
            Ok(items) => {
                let items = self.cache.store(filter, items);
                info!("catalog refreshed: {} items ({})", items.len(), filter.as_query());
                self.bus.emit(Event::CatalogRefreshed {
                    filter,
                    items: Arc::clone(&items),
                });
                items
            }
            Err(e) => {
                warn!("catalog refresh failed: {}", e);
                self.notifier
                    .warning(&format!("Could not load the media list: {}", e));
                self.cache.stamp(filter)
            }
        }
    }

    /// Last listing for the configured filter, without touching the network
    pub fn cached_list(&self) -> Option<Arc<Vec<MediaItem>>> {
        self.cache.cached(self.settings.get().media_filter)
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    // ===== Server configuration =====

    /// Point the server at a new media directory. The path is checked locally
    /// first; nothing is sent for a path the server could never scan.
    pub async fn update_scan_directory(&self, path: &str) -> bool {
        match self.try_update_scan_directory(path).await {
            Ok(summary) => {
                self.notifier
                    .success(&format!("Scan directory set to {}", summary.path.display()));
                self.refresh(true).await;
                true
            }
            Err(ServiceError::Validation(e)) => {
                warn!("rejected scan directory {:?}: {}", path, e);
                self.notifier.warning(&e.to_string());
                false
            }
            Err(e) => {
                warn!("scan directory update failed: {}", e);
                self.notifier
                    .error(&format!("Could not update the scan directory: {}", e));
                false
            }
        }
    }

    async fn try_update_scan_directory(&self, path: &str) -> Result<DirectorySummary, ServiceError> {
        let directory = PathBuf::from(path);
        let summary = tokio::task::spawn_blocking(move || DirectoryScanner::validate(&directory))
            .await
            .map_err(|e| ValidationError::Unreadable(format!("{}: {}", path, e)))??;
        info!(
            "scan directory {} holds {} images, {} videos, {} audio files",
            summary.path.display(),
            summary.image_count,
            summary.video_count,
            summary.audio_count
        );

        let settings = self.settings.get();
        self.post_json(
            "/scan",
            Some(json!({
                "path": path,
                "image_max_mb": settings.image_max_size_mb,
                "video_max_mb": settings.video_max_size_mb,
            })),
        )
        .await?;

        let path = path.to_string();
        self.settings.update(|s| s.service_directory = path);
        Ok(summary)
    }

    /// Change the server's per-type size limits. Out-of-range values are
    /// rejected with a warning before any request is made.
    pub async fn update_size_limits(&self, image_max_mb: u32, video_max_mb: u32) -> bool {
        if let Err(e) = validate_size_limits(image_max_mb, video_max_mb) {
            warn!("rejected size limits: {}", e);
            self.notifier.warning(&e.to_string());
            return false;
        }

        let directory = self.settings.get().service_directory;
        let body = json!({
            "path": directory,
            "image_max_mb": image_max_mb,
            "video_max_mb": video_max_mb,
        });
        match self.post_json("/scan", Some(body)).await {
            Ok(_) => {
                self.settings.update(|s| {
                    s.image_max_size_mb = image_max_mb;
                    s.video_max_size_mb = video_max_mb;
                });
                self.notifier.success(&format!(
                    "Size limits updated: images {} MB, videos {} MB",
                    image_max_mb, video_max_mb
                ));
                self.refresh(true).await;
                true
            }
            Err(e) => {
                warn!("size limit update failed: {}", e);
                self.notifier
                    .error(&format!("Could not update size limits: {}", e));
                false
            }
        }
    }

    /// Ask the server to drop entries whose files are gone
    pub async fn cleanup_invalid_media(&self) -> Option<CleanupResult> {
        let result = self
            .post_json("/cleanup", None)
            .await
            .and_then(|v| serde_json::from_value::<CleanupResult>(v).map_err(|e| ServiceError::Parse(e.to_string())));

        match result {
            Ok(result) => {
                info!(
                    "cleanup removed {} entries, {} remain",
                    result.removed, result.remaining_total
                );
                self.notifier.success(&format!(
                    "Removed {} invalid entries ({} remaining)",
                    result.removed, result.remaining_total
                ));
                if result.removed > 0 {
                    self.refresh(true).await;
                }
                Some(result)
            }
            Err(e) => {
                warn!("cleanup failed: {}", e);
                self.notifier.error(&format!("Cleanup failed: {}", e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::settings::MemoryBackend;

    fn client() -> (ServiceClient, Arc<RecordingNotifier>) {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let settings =
            SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
        // Nothing listens here; requests must never be made in these tests
        settings.update(|s| s.service_url = "http://127.0.0.1:9".to_string());
        (ServiceClient::new(settings, bus, notifier.clone()), notifier)
    }

    #[test]
    fn test_size_limit_ranges() {
        assert!(validate_size_limits(1, 10).is_ok());
        assert!(validate_size_limits(50, 500).is_ok());
        assert_eq!(
            validate_size_limits(0, 100),
            Err(ValidationError::ImageLimitOutOfRange {
                value: 0,
                min: 1,
                max: 50
            })
        );
        assert!(matches!(
            validate_size_limits(5, 501),
            Err(ValidationError::VideoLimitOutOfRange { value: 501, .. })
        ));
    }

    #[test]
    fn test_media_list_skips_bad_entries() {
        let items = decode_media_list(json!({
            "media": [
                {"rel_path": "a.png", "path": "/srv/media/a.png", "type": "image", "size": 1},
                {"rel_path": "b.png", "type": "hologram"},
                {"rel_path": "c.mp4", "name": "c.mp4", "type": "video", "size": 9}
            ]
        }))
        .unwrap();
        let paths: Vec<&str> = items.iter().map(|i| i.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.png", "c.mp4"]);

        assert!(decode_media_list(json!({"media": "nope"})).is_err());
        assert!(decode_media_list(json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_status_tolerates_missing_fields() {
        let status: ServiceStatus =
            serde_json::from_str(r#"{"active":true,"total_count":5,"image_count":3,"video_count":2}"#)
                .unwrap();
        assert!(status.active);
        assert!(!status.observer_active);
        assert_eq!(status.total_count, 5);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_out_of_range_limits_warn_without_request() {
        let (client, notifier) = client();
        assert!(!client.update_size_limits(60, 100).await);
        assert_eq!(notifier.count(NoticeLevel::Warning), 1);
        assert_eq!(notifier.count(NoticeLevel::Error), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_rejected_locally() {
        let (client, notifier) = client();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        assert!(!client.update_scan_directory(&missing.to_string_lossy()).await);
        assert!(!client.update_scan_directory("").await);
        assert_eq!(notifier.count(NoticeLevel::Warning), 2);
        assert_eq!(notifier.count(NoticeLevel::Error), 0);
    }
}
