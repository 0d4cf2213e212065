// Throttled catalog cache
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::library::{MediaFilter, MediaItem};

/// Window inside which repeated refreshes are served from the cache
pub const REFRESH_THROTTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CacheEntry {
    items: Arc<Vec<MediaItem>>,
    fetched_at: Instant,
}

/// Last listing per filter plus the gate that keeps at most one fetch in flight.
pub struct RefreshCache {
    window: Duration,
    entries: Mutex<HashMap<MediaFilter, CacheEntry>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl RefreshCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Cached listing if it is younger than the throttle window
    pub fn fresh(&self, filter: MediaFilter) -> Option<Arc<Vec<MediaItem>>> {
        let entries = self.entries.lock();
        let entry = entries.get(&filter)?;
        (entry.fetched_at.elapsed() < self.window).then(|| Arc::clone(&entry.items))
    }

    /// Cached listing stamped at or after `since`, whatever the window says
    pub fn fetched_since(&self, filter: MediaFilter, since: Instant) -> Option<Arc<Vec<MediaItem>>> {
        let entries = self.entries.lock();
        let entry = entries.get(&filter)?;
        (entry.fetched_at >= since).then(|| Arc::clone(&entry.items))
    }

    pub fn cached(&self, filter: MediaFilter) -> Option<Arc<Vec<MediaItem>>> {
        self.entries
            .lock()
            .get(&filter)
            .map(|entry| Arc::clone(&entry.items))
    }

    pub fn store(&self, filter: MediaFilter, items: Vec<MediaItem>) -> Arc<Vec<MediaItem>> {
        let items = Arc::new(items);
        self.entries.lock().insert(
            filter,
            CacheEntry {
                items: Arc::clone(&items),
                fetched_at: Instant::now(),
            },
        );
        items
    }

    /// Record a failed attempt: the previous listing stays, the clock restarts.
    pub fn stamp(&self, filter: MediaFilter) -> Arc<Vec<MediaItem>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(filter).or_insert_with(|| CacheEntry {
            items: Arc::new(Vec::new()),
            fetched_at: Instant::now(),
        });
        entry.fetched_at = Instant::now();
        Arc::clone(&entry.items)
    }

    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    /// Held across a fetch so concurrent refreshes queue behind it
    pub async fn begin_fetch(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.in_flight.lock().await
    }
}

impl Default for RefreshCache {
    fn default() -> Self {
        Self::new(REFRESH_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MediaType;

    fn listing() -> Vec<MediaItem> {
        vec![MediaItem::new("a.png", MediaType::Image, 1)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_window() {
        let cache = RefreshCache::default();
        cache.store(MediaFilter::All, listing());
        assert!(cache.fresh(MediaFilter::All).is_some());
        assert!(cache.fresh(MediaFilter::Image).is_none());

        tokio::time::advance(REFRESH_THROTTLE).await;
        assert!(cache.fresh(MediaFilter::All).is_none());
        assert_eq!(cache.cached(MediaFilter::All).map(|l| l.len()), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stamp_keeps_previous_listing() {
        let cache = RefreshCache::default();
        cache.store(MediaFilter::Video, listing());
        tokio::time::advance(Duration::from_secs(10)).await;

        let kept = cache.stamp(MediaFilter::Video);
        assert_eq!(kept.len(), 1);
        assert!(cache.fresh(MediaFilter::Video).is_some());
        assert!(cache.stamp(MediaFilter::Image).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetched_since_sees_only_newer_entries() {
        let cache = RefreshCache::default();
        cache.store(MediaFilter::All, listing());
        tokio::time::advance(Duration::from_millis(10)).await;
        let asked = Instant::now();
        assert!(cache.fetched_since(MediaFilter::All, asked).is_none());

        cache.store(MediaFilter::All, listing());
        assert!(cache.fetched_since(MediaFilter::All, asked).is_some());
    }
}
