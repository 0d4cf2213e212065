// Intent handlers
// UI widgets emit intents on the bus; each one lands on a controller or
// service call here. Async work is spawned so the bus stays synchronous.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::events::{names, Event, EventBus, Subscription};
use crate::playback::PlaybackController;
use crate::service::ServiceClient;

fn spawn_detached<F>(what: &'static str, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(work);
        }
        Err(_) => warn!("no async runtime, dropping {}", what),
    }
}

// ===== Playback intents =====

fn on_request_media_play(controller: &PlaybackController, event: &Event) {
    let Event::RequestMediaPlay { direction } = event else { return };
    let controller = controller.clone();
    let direction = *direction;
    spawn_detached("media request", async move {
        if let Err(e) = controller.advance(direction).await {
            debug!("{:?} request ended without media: {}", direction, e);
        }
    });
}

fn on_playback_control(controller: &PlaybackController, event: &Event) {
    let Event::RequestPlaybackControl { control } = event else { return };
    if let Err(e) = controller.control(*control) {
        debug!("{:?} refused: {}", control, e);
    }
}

/// A new listing replaces the playlist; if nothing is on screen yet, show
/// the current entry.
fn on_catalog_refreshed(controller: &PlaybackController, event: &Event) {
    let Event::CatalogRefreshed { items, .. } = event else { return };
    controller.load_playlist(items.as_ref().clone());

    if controller.current_item().is_none()
        && !controller.is_media_loading()
        && controller.playlist_len() > 0
    {
        let controller = controller.clone();
        spawn_detached("initial media", async move {
            if let Err(e) = controller.advance(crate::queue::Direction::Current).await {
                debug!("initial media not shown: {}", e);
            }
        });
    }
}

// ===== Service intents =====

fn on_request_refresh(service: &Arc<ServiceClient>, event: &Event) {
    let force = match event {
        Event::RequestRefresh { force } => *force,
        // The server told us its catalog moved; the cached copy is stale
        Event::MediaUpdated { .. } => true,
        _ => return,
    };
    let service = Arc::clone(service);
    spawn_detached("catalog refresh", async move {
        service.refresh(force).await;
    });
}

fn on_update_scan_directory(service: &Arc<ServiceClient>, event: &Event) {
    let Event::UpdateScanDirectory { path } = event else { return };
    let service = Arc::clone(service);
    let path = path.clone();
    spawn_detached("scan directory update", async move {
        service.update_scan_directory(&path).await;
    });
}

fn on_update_size_limits(service: &Arc<ServiceClient>, event: &Event) {
    let Event::UpdateSizeLimits {
        image_max_mb,
        video_max_mb,
    } = *event
    else {
        return;
    };
    let service = Arc::clone(service);
    spawn_detached("size limit update", async move {
        service.update_size_limits(image_max_mb, video_max_mb).await;
    });
}

fn on_request_cleanup(service: &Arc<ServiceClient>, _event: &Event) {
    let service = Arc::clone(service);
    spawn_detached("cleanup", async move {
        service.cleanup_invalid_media().await;
    });
}

/// Route every intent on `bus` to its handler. The returned subscriptions
/// keep track of what was registered so it can be torn down.
pub fn register_intent_handlers(
    bus: &EventBus,
    controller: &PlaybackController,
    service: &Arc<ServiceClient>,
) -> Vec<Subscription> {
    let mut subscriptions = Vec::new();

    let mut with_controller = |name: &str, handler: fn(&PlaybackController, &Event)| {
        let controller = controller.clone();
        subscriptions.push(bus.on(name, move |event| handler(&controller, event)));
    };
    with_controller(names::REQUEST_MEDIA_PLAY, on_request_media_play);
    with_controller(names::REQUEST_PLAYBACK_CONTROL, on_playback_control);
    with_controller(names::CATALOG_REFRESHED, on_catalog_refreshed);
    with_controller(names::CHANGE_PLAY_MODE, |c, event| {
        if let Event::ChangePlayMode { mode } = event {
            c.change_play_mode(*mode);
        }
    });
    with_controller(names::CHANGE_AUTO_SWITCH_MODE, |c, event| {
        if let Event::ChangeAutoSwitchMode { mode } = event {
            c.change_auto_switch_mode(*mode);
        }
    });
    with_controller(names::SET_VOLUME, |c, event| {
        if let Event::SetVolume { media_type, volume } = event {
            c.set_volume(*media_type, *volume);
        }
    });
    with_controller(names::SET_VIDEO_LOOP, |c, event| {
        if let Event::SetVideoLoop { enabled } = event {
            c.set_video_loop(*enabled);
        }
    });

    let mut with_service = |name: &str, handler: fn(&Arc<ServiceClient>, &Event)| {
        let service = Arc::clone(service);
        subscriptions.push(bus.on(name, move |event| handler(&service, event)));
    };
    with_service(names::REQUEST_REFRESH, on_request_refresh);
    with_service(names::MEDIA_UPDATED, on_request_refresh);
    with_service(names::UPDATE_SCAN_DIRECTORY, on_update_scan_directory);
    with_service(names::UPDATE_SIZE_LIMITS, on_update_size_limits);
    with_service(names::REQUEST_CLEANUP, on_request_cleanup);

    debug!("registered {} intent handlers", subscriptions.len());
    subscriptions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{MediaFilter, MediaItem, MediaType};
    use crate::notify::RecordingNotifier;
    use crate::playback::HttpMediaDisplay;
    use crate::settings::{MemoryBackend, PlayMode, SettingsStore};

    fn wired() -> (EventBus, PlaybackController, Arc<SettingsStore>, Vec<Subscription>) {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let settings =
            SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
        let controller = PlaybackController::new(
            bus.clone(),
            Arc::clone(&settings),
            Arc::new(HttpMediaDisplay::new()),
            notifier.clone(),
        );
        let service = Arc::new(ServiceClient::new(Arc::clone(&settings), bus.clone(), notifier));
        let subscriptions = register_intent_handlers(&bus, &controller, &service);
        (bus, controller, settings, subscriptions)
    }

    #[test]
    fn test_every_intent_has_a_handler() {
        let (bus, _controller, _settings, subscriptions) = wired();
        for name in [
            names::REQUEST_MEDIA_PLAY,
            names::CHANGE_PLAY_MODE,
            names::CHANGE_AUTO_SWITCH_MODE,
            names::REQUEST_PLAYBACK_CONTROL,
            names::REQUEST_REFRESH,
            names::SET_VOLUME,
            names::SET_VIDEO_LOOP,
            names::UPDATE_SCAN_DIRECTORY,
            names::UPDATE_SIZE_LIMITS,
            names::REQUEST_CLEANUP,
        ] {
            assert_eq!(bus.listener_count(name), 1, "{} not wired", name);
        }
        assert_eq!(subscriptions.len(), 12);
    }

    #[test]
    fn test_sync_intents_reach_controller() {
        let (bus, controller, settings, _subscriptions) = wired();
        bus.emit(Event::ChangePlayMode {
            mode: PlayMode::Sequential,
        });
        assert_eq!(settings.get().play_mode, PlayMode::Sequential);

        bus.emit(Event::SetVideoLoop { enabled: true });
        assert!(settings.get().video_loop);

        bus.emit(Event::CatalogRefreshed {
            filter: MediaFilter::All,
            items: Arc::new(vec![MediaItem::new("a.png", MediaType::Image, 1)]),
        });
        assert_eq!(controller.playlist_len(), 1);
    }
}
