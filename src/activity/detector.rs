use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::notify::Notifier;
use crate::playback::{AutoAdvance, PlaybackController, SwitchTrigger};
use crate::settings::{AutoSwitchMode, SettingsStore};

use super::host::{bind, ActivitySignal, HostCallback, HostError, HostEventSource, HostLocator, HostSubscription};

/// Lookups of the host event system before giving up
pub const DISCOVERY_ATTEMPTS: u32 = 5;

/// Pause between lookups
pub const DISCOVERY_DELAY: Duration = Duration::from_secs(2);

/// Turns host chat activity into cooldown-gated switch requests.
/// Gating beyond the per-signal toggles and visibility belongs to the controller.
pub struct ActivityDetector {
    settings: Arc<SettingsStore>,
    controller: PlaybackController,
    notifier: Arc<dyn Notifier>,
    subscriptions: Mutex<Vec<HostSubscription>>,
    failure_reported: AtomicBool,
}

impl ActivityDetector {
    pub fn new(
        settings: Arc<SettingsStore>,
        controller: PlaybackController,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            controller,
            notifier,
            subscriptions: Mutex::new(Vec::new()),
            failure_reported: AtomicBool::new(false),
        })
    }

    /// Find the host's event system and listen for both signals. Returns the
    /// number of signals bound.
    pub async fn attach(self: &Arc<Self>, locator: &dyn HostLocator) -> Result<usize, HostError> {
        for attempt in 1..=DISCOVERY_ATTEMPTS {
            if let Some(source) = locator.locate() {
                return self.bind_all(source);
            }
            debug!(
                "host event system not ready (attempt {}/{})",
                attempt, DISCOVERY_ATTEMPTS
            );
            if attempt < DISCOVERY_ATTEMPTS {
                tokio::time::sleep(DISCOVERY_DELAY).await;
            }
        }

        let e = HostError::Unavailable {
            attempts: DISCOVERY_ATTEMPTS,
        };
        self.report_once(&e);
        Err(e)
    }

    fn bind_all(self: &Arc<Self>, source: Arc<dyn HostEventSource>) -> Result<usize, HostError> {
        self.detach();

        let mut bound = Vec::new();
        let mut last_error = None;
        for signal in ActivitySignal::ALL {
            let weak: Weak<Self> = Arc::downgrade(self);
            let callback: HostCallback = Arc::new(move || {
                if let Some(detector) = weak.upgrade() {
                    detector.handle_signal(signal);
                }
            });
            match bind(&source, signal, callback) {
                Ok(subscription) => {
                    info!(
                        "listening for {:?} as '{}' via {:?}",
                        signal,
                        subscription.event_name(),
                        subscription.strategy()
                    );
                    bound.push(subscription);
                }
                Err(e) => {
                    warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        let count = bound.len();
        *self.subscriptions.lock() = bound;
        match (count, last_error) {
            (0, Some(e)) => {
                self.report_once(&e);
                Err(e)
            }
            _ => Ok(count),
        }
    }

    /// Drop every host listener. Returns how many were removed.
    pub fn detach(&self) -> usize {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        let mut removed = 0;
        for subscription in subscriptions {
            let signal = subscription.signal();
            if subscription.unsubscribe() {
                removed += 1;
            } else {
                trace!("{:?} listener was already gone", signal);
            }
        }
        removed
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// One host signal. `None` when the signal is filtered out before
    /// reaching the controller.
    pub fn handle_signal(&self, signal: ActivitySignal) -> Option<AutoAdvance> {
        let settings = self.settings.get();

        if settings.auto_switch_mode != AutoSwitchMode::Detect {
            return None;
        }
        let wanted = match signal {
            ActivitySignal::AssistantOutput => settings.ai_response_enabled,
            ActivitySignal::UserInput => settings.player_message_enabled,
        };
        if !wanted || !settings.is_window_visible {
            trace!("{:?} ignored", signal);
            return None;
        }

        let outcome = self.controller.request_auto_advance(SwitchTrigger::Activity);
        debug!("{:?} -> {:?}", signal, outcome);
        Some(outcome)
    }

    fn report_once(&self, e: &HostError) {
        if !self.failure_reported.swap(true, Ordering::SeqCst) {
            error!("activity detection unavailable: {}", e);
            self.notifier
                .error("Chat activity detection is unavailable; detect mode will not switch media.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::host::{BindingStrategy, ListenerToken, Naming, Registration, StaticLocator};
    use crate::events::EventBus;
    use crate::library::{MediaItem, MediaType};
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::playback::{DisplayError, MediaDisplay, ShowOptions};
    use crate::settings::MemoryBackend;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicU64};

    struct InstantDisplay;

    #[async_trait]
    impl MediaDisplay for InstantDisplay {
        async fn load(&self, _item: &MediaItem, _url: &str) -> Result<(), DisplayError> {
            Ok(())
        }

        fn present(&self, _item: &MediaItem, _options: ShowOptions) {}

        async fn preload(&self, _item: &MediaItem, _url: &str) -> Result<(), DisplayError> {
            Ok(())
        }

        fn play(&self) {}

        fn pause(&self) {}

        fn stop(&self) {}

        fn set_volume(&self, _volume: f32) {}

        fn set_loop(&self, _looping: bool) {}
    }

    /// Host emitter with a configurable API shape
    #[derive(Default)]
    struct FakeHost {
        dom_style: bool,
        node_style: bool,
        table: Option<HashMap<String, String>>,
        listeners: Mutex<Vec<(String, ListenerToken, HostCallback)>>,
        next_token: AtomicU64,
    }

    impl FakeHost {
        fn with_table(mut self) -> Self {
            let mut table = HashMap::new();
            table.insert("MESSAGE_RECEIVED".to_string(), "chat:received".to_string());
            table.insert("MESSAGE_SENT".to_string(), "chat:sent".to_string());
            self.table = Some(table);
            self
        }

        fn register(&self, event: &str, callback: HostCallback) -> ListenerToken {
            let token = self.next_token.fetch_add(1, Ordering::SeqCst);
            self.listeners.lock().push((event.to_string(), token, callback));
            token
        }

        fn fire(&self, event: &str) {
            let callbacks: Vec<HostCallback> = self
                .listeners
                .lock()
                .iter()
                .filter(|(name, _, _)| name == event)
                .map(|(_, _, cb)| Arc::clone(cb))
                .collect();
            for callback in callbacks {
                callback();
            }
        }

        fn listener_count(&self) -> usize {
            self.listeners.lock().len()
        }
    }

    impl HostEventSource for FakeHost {
        fn add_event_listener(&self, event: &str, callback: HostCallback) -> Option<ListenerToken> {
            self.dom_style.then(|| self.register(event, callback))
        }

        fn on(&self, event: &str, callback: HostCallback) -> Option<ListenerToken> {
            self.node_style.then(|| self.register(event, callback))
        }

        fn event_types(&self) -> Option<HashMap<String, String>> {
            self.table.clone()
        }

        fn remove_listener(&self, event: &str, token: ListenerToken) -> bool {
            let mut listeners = self.listeners.lock();
            let before = listeners.len();
            listeners.retain(|(name, t, _)| !(name == event && *t == token));
            listeners.len() != before
        }
    }

    /// Reports nothing for the first `misses` lookups
    struct SlowLocator {
        misses: AtomicU32,
        source: Arc<dyn HostEventSource>,
    }

    impl HostLocator for SlowLocator {
        fn locate(&self) -> Option<Arc<dyn HostEventSource>> {
            let left = self.misses.load(Ordering::SeqCst);
            if left > 0 {
                self.misses.store(left - 1, Ordering::SeqCst);
                return None;
            }
            Some(Arc::clone(&self.source))
        }
    }

    struct Fixture {
        settings: Arc<SettingsStore>,
        controller: PlaybackController,
        notifier: Arc<RecordingNotifier>,
        detector: Arc<ActivityDetector>,
    }

    fn fixture() -> Fixture {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let settings =
            SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
        settings.update(|s| s.auto_switch_mode = AutoSwitchMode::Detect);
        let controller = PlaybackController::new(
            bus,
            Arc::clone(&settings),
            Arc::new(InstantDisplay),
            notifier.clone(),
        );
        let detector = ActivityDetector::new(Arc::clone(&settings), controller.clone(), notifier.clone());
        Fixture {
            settings,
            controller,
            notifier,
            detector,
        }
    }

    fn images(count: usize) -> Vec<MediaItem> {
        (0..count)
            .map(|i| MediaItem::new(&format!("{}.png", i), MediaType::Image, 1))
            .collect()
    }

    fn strategy_for(host: FakeHost) -> Result<BindingStrategy, HostError> {
        let source: Arc<dyn HostEventSource> = Arc::new(host);
        bind(&source, ActivitySignal::UserInput, Arc::new(|| {})).map(|s| s.strategy())
    }

    #[test]
    fn test_binding_covers_every_host_shape() {
        let dom = || FakeHost {
            dom_style: true,
            ..Default::default()
        };
        let node = || FakeHost {
            node_style: true,
            ..Default::default()
        };

        assert_eq!(
            strategy_for(dom().with_table()),
            Ok(BindingStrategy {
                registration: Registration::AddEventListener,
                naming: Naming::TypeTable
            })
        );
        assert_eq!(
            strategy_for(node().with_table()),
            Ok(BindingStrategy {
                registration: Registration::On,
                naming: Naming::TypeTable
            })
        );
        assert_eq!(
            strategy_for(dom()),
            Ok(BindingStrategy {
                registration: Registration::AddEventListener,
                naming: Naming::RawString
            })
        );
        assert_eq!(
            strategy_for(node()),
            Ok(BindingStrategy {
                registration: Registration::On,
                naming: Naming::RawString
            })
        );
        assert_eq!(
            strategy_for(FakeHost::default()),
            Err(HostError::NoBindingStrategy(ActivitySignal::UserInput))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_filters() {
        let f = fixture();
        f.controller.load_playlist(images(3));

        f.settings.update(|s| s.ai_response_enabled = false);
        assert_eq!(f.detector.handle_signal(ActivitySignal::AssistantOutput), None);
        assert_eq!(
            f.detector.handle_signal(ActivitySignal::UserInput),
            Some(AutoAdvance::Accepted)
        );

        f.settings.update(|s| s.is_window_visible = false);
        assert_eq!(f.detector.handle_signal(ActivitySignal::UserInput), None);

        f.settings.update(|s| {
            s.is_window_visible = true;
            s.auto_switch_mode = AutoSwitchMode::Timer;
        });
        assert_eq!(f.detector.handle_signal(ActivitySignal::UserInput), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_events_reach_controller_after_slow_discovery() {
        let f = fixture();
        f.controller.load_playlist(images(3));
        let host = Arc::new(
            FakeHost {
                dom_style: true,
                ..Default::default()
            }
            .with_table(),
        );
        let locator = SlowLocator {
            misses: AtomicU32::new(2),
            source: host.clone(),
        };

        assert_eq!(f.detector.attach(&locator).await, Ok(2));
        assert_eq!(host.listener_count(), 2);

        host.fire("chat:received");
        assert!(f.controller.last_switch_time() > 0);

        assert_eq!(f.detector.detach(), 2);
        assert_eq!(host.listener_count(), 0);
        assert!(!f.detector.is_attached());
    }

    #[tokio::test]
    async fn test_host_firing_on_its_own_thread() {
        let f = fixture();
        f.controller.load_playlist(images(3));
        let host = Arc::new(FakeHost {
            node_style: true,
            ..Default::default()
        });
        let source: Arc<dyn HostEventSource> = host.clone();
        assert_eq!(f.detector.attach(&StaticLocator(Some(source))).await, Ok(2));

        let firing = Arc::clone(&host);
        std::thread::spawn(move || firing.fire("message_sent"))
            .join()
            .unwrap();

        for _ in 0..50 {
            if f.controller.current_item().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.controller.current_item().is_some());
        assert!(!f.controller.is_media_loading());
        f.detector.detach();
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_gives_up_with_single_error() {
        let f = fixture();
        let locator = StaticLocator(None);

        assert_eq!(
            f.detector.attach(&locator).await,
            Err(HostError::Unavailable {
                attempts: DISCOVERY_ATTEMPTS
            })
        );
        assert!(f.detector.attach(&locator).await.is_err());
        assert_eq!(f.notifier.count(NoticeLevel::Error), 1);
    }
}
