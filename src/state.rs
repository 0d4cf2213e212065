// Application state management
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::activity::{ActivityDetector, HostError, HostLocator};
use crate::commands::register_intent_handlers;
use crate::events::{EventBus, Subscription};
use crate::notify::Notifier;
use crate::playback::{MediaDisplay, PlaybackController};
use crate::realtime::RealtimeChannel;
use crate::service::{ServiceClient, StatusPoller};
use crate::settings::SettingsStore;

/// Every component, wired once at construction. Nothing looks its
/// collaborators up at call time.
pub struct AppState {
    pub bus: EventBus,
    pub settings: Arc<SettingsStore>,
    pub notifier: Arc<dyn Notifier>,
    pub service: Arc<ServiceClient>,
    pub poller: Arc<StatusPoller>,
    pub realtime: RealtimeChannel,
    pub controller: PlaybackController,
    pub activity: Arc<ActivityDetector>,
    pub data_dir: PathBuf,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl AppState {
    pub fn new(
        bus: EventBus,
        settings: Arc<SettingsStore>,
        notifier: Arc<dyn Notifier>,
        display: Arc<dyn MediaDisplay>,
        data_dir: PathBuf,
    ) -> Self {
        let service = Arc::new(ServiceClient::new(
            Arc::clone(&settings),
            bus.clone(),
            Arc::clone(&notifier),
        ));
        let poller = StatusPoller::new(Arc::clone(&service));
        let realtime = RealtimeChannel::new(Arc::clone(&settings), bus.clone(), Arc::clone(&notifier));
        let controller = PlaybackController::new(
            bus.clone(),
            Arc::clone(&settings),
            display,
            Arc::clone(&notifier),
        );
        let activity = ActivityDetector::new(
            Arc::clone(&settings),
            controller.clone(),
            Arc::clone(&notifier),
        );
        let subscriptions = register_intent_handlers(&bus, &controller, &service);

        Self {
            bus,
            settings,
            notifier,
            service,
            poller,
            realtime,
            controller,
            activity,
            data_dir,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Bring the session up: check the server, load the catalog, open the
    /// socket and start the background timers.
    pub async fn start(&self) {
        let settings = self.settings.get();
        if !settings.enabled {
            info!("player disabled in settings, not starting a session");
            return;
        }

        let status = self.service.check_status().await;
        if status.active {
            info!(
                "media server up: {} items ({} images, {} videos)",
                status.total_count, status.image_count, status.video_count
            );
        } else {
            warn!(
                "media server not reachable at {}: {}",
                settings.service_url,
                status.error.as_deref().unwrap_or("inactive")
            );
            self.notifier
                .warning("Media server is not running. Waiting for it to come up.");
        }

        // Loading and showing the first item happen in the catalogRefreshed handler
        self.service.refresh(false).await;
        self.realtime.connect();
        self.poller
            .start(Duration::from_millis(settings.polling_interval_ms));
        self.controller.apply_auto_switch();
    }

    /// Listen for host chat activity. Hosts are optional; the headless
    /// binary has none.
    pub async fn attach_host(&self, locator: &dyn HostLocator) -> Result<usize, HostError> {
        self.activity.attach(locator).await
    }

    /// Tear everything down. Safe to call more than once.
    pub fn shutdown(&self) {
        self.realtime.disconnect();
        self.poller.stop();
        self.controller.stop_timers();
        self.activity.detach();
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.settings.flush();
        info!("session closed");
    }
}
