// Playback controller
//
// Owns the playlist, position, random history and load bookkeeping, and
// turns intents (manual advance, timer ticks, activity) into display work.
// State lives behind one lock that is never held across an await; events
// are emitted only after the lock is released.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::events::{Event, EventBus};
use crate::library::{MediaItem, MediaType};
use crate::notify::Notifier;
use crate::queue::{Direction, LoadOutcome, PlayQueue, QueueError, RandomPlayHistory};
use crate::settings::{AutoSwitchMode, PlayMode, SettingsStore};
use crate::timer::{Spawner, TimerSlot};

use super::display::{DisplayError, MediaDisplay, ShowOptions};

/// Retries after the first failed load of an advance
pub const MAX_LOAD_RETRIES: u32 = 3;

/// Pause between load retries
pub const LOAD_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Lower bound for the switch timer period
const MIN_SWITCH_INTERVAL: Duration = Duration::from_millis(100);

/// Wall clock in epoch milliseconds, used for the switch cooldown
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// No playlist
    Idle,
    /// Playlist loaded, nothing showing
    Ready,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackControl {
    Play,
    Pause,
    Resume,
    Stop,
}

/// Source of an unattended switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchTrigger {
    Timer,
    Activity,
    MediaEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Disabled,
    ModeMismatch,
    NoMedia,
    Cooldown { remaining_ms: i64 },
    MediaLoading,
    VideoLooping,
    /// No async runtime to load on
    NoRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAdvance {
    Accepted,
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no playable media")]
    NoMedia,
    #[error("selection {index} is outside the playlist (length {len})")]
    OutOfBounds { index: usize, len: usize },
    #[error("failed to load {path}: {cause}")]
    LoadFailed { path: String, cause: DisplayError },
    #[error("gave up on {path} after {attempts} attempts: {cause}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        cause: DisplayError,
    },
    #[error("{0} media cannot be played")]
    NotPlayable(MediaType),
    #[error("nothing is displayed")]
    NothingDisplayed,
    #[error("superseded by a newer request")]
    Superseded,
    #[error("player is disabled")]
    Disabled,
}

impl From<QueueError> for PlaybackError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Empty => PlaybackError::NoMedia,
            QueueError::OutOfBounds { index, len } => PlaybackError::OutOfBounds { index, len },
        }
    }
}

struct ControllerState {
    queue: PlayQueue,
    phase: PlaybackPhase,
    current_item: Option<MediaItem>,
    is_media_loading: bool,
    load_generation: u64,
    retry_count: u32,
    last_switch_time: i64,
    rng: StdRng,
    clock: Clock,
    /// Period of the running switch timer
    switch_period: Option<Duration>,
}

/// A selection that has been committed and is waiting to be displayed
struct Attempt {
    item: MediaItem,
    index: usize,
    generation: u64,
}

struct Shared {
    bus: EventBus,
    settings: Arc<SettingsStore>,
    display: Arc<dyn MediaDisplay>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<ControllerState>,
    switch_timer: TimerSlot,
    spawner: Spawner,
}

#[derive(Clone)]
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    pub fn new(
        bus: EventBus,
        settings: Arc<SettingsStore>,
        display: Arc<dyn MediaDisplay>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let stored = settings.get();
        let history = RandomPlayHistory::restore(
            stored.random_played_indices.clone(),
            stored.current_random_index,
        );

        let state = ControllerState {
            queue: PlayQueue::with_history(history),
            phase: PlaybackPhase::Idle,
            current_item: None,
            is_media_loading: false,
            load_generation: 0,
            retry_count: 0,
            last_switch_time: stored.last_switch_time,
            rng: StdRng::from_entropy(),
            clock: system_clock(),
            switch_period: None,
        };

        Self {
            shared: Arc::new(Shared {
                bus,
                settings,
                display,
                notifier,
                state: Mutex::new(state),
                switch_timer: TimerSlot::new("switch"),
                spawner: Spawner::current(),
            }),
        }
    }

    /// Replace the random source, for reproducible shuffles
    pub fn with_seed(self, seed: u64) -> Self {
        self.shared.state.lock().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Replace the wall clock the cooldown is measured against
    pub fn with_clock(self, clock: Clock) -> Self {
        self.shared.state.lock().clock = clock;
        self
    }

    // ===== Playlist =====

    /// Replace the playlist with a fresh catalog listing
    pub fn load_playlist(&self, items: Vec<MediaItem>) -> LoadOutcome {
        let count = items.len();
        let (outcome, phase_changed, phase) = {
            let mut st = self.shared.state.lock();
            let before = st.phase;
            let outcome = st.queue.load(items);
            match outcome {
                LoadOutcome::Emptied => {
                    st.phase = PlaybackPhase::Idle;
                    st.current_item = None;
                    st.is_media_loading = false;
                    st.load_generation += 1;
                }
                LoadOutcome::Reset => {
                    // Anything still loading points into the old list
                    st.is_media_loading = false;
                    st.load_generation += 1;
                    if st.phase == PlaybackPhase::Idle {
                        st.phase = PlaybackPhase::Ready;
                    }
                }
                LoadOutcome::Kept => {
                    if st.phase == PlaybackPhase::Idle {
                        st.phase = PlaybackPhase::Ready;
                    }
                }
            }
            (outcome, before != st.phase, st.phase)
        };

        match outcome {
            LoadOutcome::Emptied => {
                self.stop_timers();
                self.shared.display.stop();
                self.persist_history();
                warn!("playlist is empty, auto switching suspended");
                self.shared
                    .notifier
                    .warning("No playable media found. Check the media server directory.");
                self.shared.bus.emit(Event::NoMedia);
            }
            LoadOutcome::Reset => {
                info!("playlist reloaded with {} items, position reset", count);
                self.persist_history();
                self.shared.bus.emit(Event::PlaylistLoaded { count, reset: true });
                self.apply_auto_switch();
            }
            LoadOutcome::Kept => {
                debug!("playlist reloaded with {} items, position kept", count);
                self.shared.bus.emit(Event::PlaylistLoaded { count, reset: false });
                self.apply_auto_switch();
            }
        }

        if phase_changed {
            self.shared.bus.emit(Event::PlaybackStateChanged { phase });
        }
        outcome
    }

    // ===== Advancing =====

    /// Manually move in `direction` and display the result, retrying failed
    /// loads up to [`MAX_LOAD_RETRIES`] times.
    pub async fn advance(&self, direction: Direction) -> Result<MediaItem, PlaybackError> {
        let settings = self.shared.settings.get();
        if !settings.enabled {
            return Err(PlaybackError::Disabled);
        }

        let attempt = {
            let mut st = self.shared.state.lock();
            Self::begin_attempt(&mut st, settings.play_mode, direction)
        };
        match attempt {
            Ok(attempt) => {
                self.persist_history();
                self.run_attempts(direction, attempt).await
            }
            Err(e) => {
                self.report_selection_failure(&e);
                Err(e)
            }
        }
    }

    /// Cooldown-gated switch used by the timer, media end and activity detection.
    ///
    /// The gate and the `last_switch_time` stamp happen in one critical
    /// section before any loading starts, so a second trigger arriving while
    /// the first is still loading always sees the new stamp.
    ///
    /// Safe to call from any thread: loading runs on the runtime captured
    /// when the controller was built.
    pub fn request_auto_advance(&self, trigger: SwitchTrigger) -> AutoAdvance {
        let settings = self.shared.settings.get();
        let Some(runtime) = self.shared.spawner.handle() else {
            warn!("no async runtime, {:?} switch dropped", trigger);
            return AutoAdvance::Suppressed(SuppressReason::NoRuntime);
        };

        let (attempt, now) = {
            let mut st = self.shared.state.lock();
            let now = (st.clock)();

            if !settings.enabled {
                return AutoAdvance::Suppressed(SuppressReason::Disabled);
            }
            let wanted = match trigger {
                SwitchTrigger::Timer | SwitchTrigger::MediaEnded => AutoSwitchMode::Timer,
                SwitchTrigger::Activity => AutoSwitchMode::Detect,
            };
            if settings.auto_switch_mode != wanted {
                return AutoAdvance::Suppressed(SuppressReason::ModeMismatch);
            }
            if st.queue.is_empty() {
                return AutoAdvance::Suppressed(SuppressReason::NoMedia);
            }
            let elapsed = now - st.last_switch_time;
            let cooldown = settings.switch_cooldown_ms as i64;
            if elapsed < cooldown {
                return AutoAdvance::Suppressed(SuppressReason::Cooldown {
                    remaining_ms: cooldown - elapsed,
                });
            }
            if st.is_media_loading {
                return AutoAdvance::Suppressed(SuppressReason::MediaLoading);
            }
            let looping_video = st
                .current_item
                .as_ref()
                .map_or(false, |item| item.media_type == MediaType::Video);
            if looping_video && settings.video_loop {
                return AutoAdvance::Suppressed(SuppressReason::VideoLooping);
            }

            st.last_switch_time = now;
            (Self::begin_attempt(&mut st, settings.play_mode, Direction::Next), now)
        };

        self.shared.settings.update(|s| s.last_switch_time = now);
        self.persist_history();

        match attempt {
            Ok(attempt) => {
                trace!("auto advance accepted ({:?})", trigger);
                let controller = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = controller.run_attempts(Direction::Next, attempt).await {
                        debug!("auto advance ended without media: {}", e);
                    }
                });
                AutoAdvance::Accepted
            }
            Err(e) => {
                self.report_selection_failure(&e);
                AutoAdvance::Suppressed(SuppressReason::NoMedia)
            }
        }
    }

    /// A non-looping video reached its end
    pub fn handle_media_ended(&self) -> AutoAdvance {
        if self.shared.settings.get().video_loop {
            return AutoAdvance::Suppressed(SuppressReason::VideoLooping);
        }
        self.request_auto_advance(SwitchTrigger::MediaEnded)
    }

    fn begin_attempt(
        st: &mut ControllerState,
        mode: PlayMode,
        direction: Direction,
    ) -> Result<Attempt, PlaybackError> {
        let ControllerState { queue, rng, .. } = &mut *st;
        let index = queue.select(mode, direction, rng)?;
        let item = queue
            .get(index)
            .cloned()
            .ok_or(PlaybackError::OutOfBounds {
                index,
                len: queue.len(),
            })?;

        st.is_media_loading = true;
        st.load_generation += 1;
        Ok(Attempt {
            item,
            index,
            generation: st.load_generation,
        })
    }

    async fn run_attempts(
        &self,
        direction: Direction,
        first: Attempt,
    ) -> Result<MediaItem, PlaybackError> {
        let mut attempt = first;
        let mut failures: u32 = 0;

        loop {
            let settings = self.shared.settings.get();
            let url = attempt.item.file_url(&settings.service_url);
            let options = ShowOptions {
                volume: settings.volume_for(attempt.item.media_type),
                looping: settings.video_loop && attempt.item.media_type.is_playable(),
            };

            let result = self.shared.display.load(&attempt.item, &url).await;

            let cause = {
                let mut st = self.shared.state.lock();
                if st.load_generation != attempt.generation {
                    // A newer request owns the loading flag now
                    return Err(PlaybackError::Superseded);
                }
                st.is_media_loading = false;

                match result {
                    Ok(()) => {
                        // Presented under the lock so a newer load cannot land in between
                        self.shared.display.present(&attempt.item, options);
                        st.retry_count = 0;
                        st.current_item = Some(attempt.item.clone());
                        st.phase = PlaybackPhase::Playing;
                        None
                    }
                    Err(cause) => {
                        failures += 1;
                        if failures <= MAX_LOAD_RETRIES {
                            st.retry_count = failures;
                        }
                        Some(cause)
                    }
                }
            };

            let Some(cause) = cause else {
                info!("showing {} [{}]", attempt.item.display_name, attempt.index);
                self.shared.bus.emit(Event::MediaChanged {
                    item: attempt.item.clone(),
                    index: attempt.index,
                });
                self.shared.bus.emit(Event::PlaybackStateChanged {
                    phase: PlaybackPhase::Playing,
                });
                self.spawn_preload();
                return Ok(attempt.item);
            };

            if failures > MAX_LOAD_RETRIES {
                let error = PlaybackError::RetriesExhausted {
                    path: attempt.item.relative_path.clone(),
                    attempts: failures,
                    cause,
                };
                warn!("{}", error);
                self.shared
                    .notifier
                    .error(&format!("Media failed to load: {}", attempt.item.display_name));
                self.shared.bus.emit(Event::PlaybackError {
                    error: error.clone(),
                    will_retry: false,
                });
                return Err(error);
            }

            let error = PlaybackError::LoadFailed {
                path: attempt.item.relative_path.clone(),
                cause,
            };
            warn!("{} (retry {}/{})", error, failures, MAX_LOAD_RETRIES);
            self.shared.bus.emit(Event::PlaybackError {
                error,
                will_retry: true,
            });

            tokio::time::sleep(LOAD_RETRY_DELAY).await;

            let play_mode = self.shared.settings.get().play_mode;
            let next = {
                let mut st = self.shared.state.lock();
                if st.load_generation != attempt.generation {
                    return Err(PlaybackError::Superseded);
                }
                Self::begin_attempt(&mut st, play_mode, direction)
            };
            attempt = match next {
                Ok(next) => {
                    self.persist_history();
                    next
                }
                Err(e) => {
                    self.report_selection_failure(&e);
                    return Err(e);
                }
            };
        }
    }

    fn spawn_preload(&self) {
        let settings = self.shared.settings.get();
        let candidate = {
            let mut guard = self.shared.state.lock();
            let st = &mut *guard;
            let current = st.queue.current_index();
            st.queue
                .peek_next(settings.play_mode, &mut st.rng)
                .filter(|index| Some(*index) != current)
                .and_then(|index| st.queue.get(index).cloned())
        };

        let Some(item) = candidate else { return };
        if !settings.preload_enabled_for(item.media_type) {
            return;
        }

        let display = Arc::clone(&self.shared.display);
        let url = item.file_url(&settings.service_url);
        self.shared.spawner.spawn("preload", async move {
            match display.preload(&item, &url).await {
                Ok(()) => trace!("preloaded {}", item.relative_path),
                Err(e) => debug!("preload of {} failed: {}", item.relative_path, e),
            }
        });
    }

    fn report_selection_failure(&self, error: &PlaybackError) {
        warn!("cannot advance: {}", error);
        self.shared.bus.emit(Event::PlaybackError {
            error: error.clone(),
            will_retry: false,
        });
    }

    fn persist_history(&self) {
        let history = self.shared.state.lock().queue.history().clone();
        self.shared.settings.update(|s| {
            s.random_played_indices = history.played_indices;
            s.current_random_index = history.current_random_index;
        });
    }

    // ===== Modes =====

    pub fn change_play_mode(&self, mode: PlayMode) {
        let previous = self.shared.settings.get().play_mode;
        if previous == mode {
            return;
        }
        self.shared.state.lock().queue.clear_history();
        self.shared.settings.update(|s| {
            s.play_mode = mode;
            s.random_played_indices.clear();
            s.current_random_index = None;
        });
        info!("play mode changed to {:?}", mode);
        self.shared.bus.emit(Event::PlayModeChanged { mode });
    }

    pub fn change_auto_switch_mode(&self, mode: AutoSwitchMode) {
        self.shared.settings.update(|s| s.auto_switch_mode = mode);
        self.apply_auto_switch();
        info!("auto switch mode changed to {:?}", mode);
        self.shared.bus.emit(Event::AutoSwitchModeChanged { mode });
    }

    /// Disabling stops the display and abandons any load in flight
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.settings.update(|s| s.enabled = enabled);
        if !enabled {
            let (changed, phase) = {
                let mut st = self.shared.state.lock();
                let before = st.phase;
                st.load_generation += 1;
                st.is_media_loading = false;
                if matches!(st.phase, PlaybackPhase::Playing | PlaybackPhase::Paused) {
                    st.phase = PlaybackPhase::Ready;
                }
                (before != st.phase, st.phase)
            };
            self.shared.display.stop();
            if changed {
                self.shared.bus.emit(Event::PlaybackStateChanged { phase });
            }
        }
        self.apply_auto_switch();
    }

    /// Start or stop the switch timer to match settings and playlist. A
    /// timer already running at the wanted period keeps its phase.
    pub fn apply_auto_switch(&self) {
        let settings = self.shared.settings.get();
        let (has_media, running_period) = {
            let st = self.shared.state.lock();
            (!st.queue.is_empty(), st.switch_period)
        };

        if settings.enabled && settings.auto_switch_mode == AutoSwitchMode::Timer && has_media {
            let period = Duration::from_millis(settings.switch_interval_ms).max(MIN_SWITCH_INTERVAL);
            if running_period == Some(period) && self.shared.switch_timer.is_active() {
                return;
            }
            self.start_switch_timer(period);
        } else {
            self.stop_timers();
        }
    }

    fn start_switch_timer(&self, period: Duration) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        let job = async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                let controller = PlaybackController { shared };
                if let AutoAdvance::Suppressed(reason) =
                    controller.request_auto_advance(SwitchTrigger::Timer)
                {
                    trace!("timer switch suppressed: {:?}", reason);
                }
            }
        };
        let Some(handle) = self.shared.spawner.spawn("switch timer", job) else {
            return;
        };
        self.shared.switch_timer.replace(handle);
        self.shared.state.lock().switch_period = Some(period);
        debug!("switch timer running every {:?}", period);
    }

    pub fn stop_timers(&self) {
        self.shared.state.lock().switch_period = None;
        if self.shared.switch_timer.cancel() {
            debug!("switch timer stopped");
        }
    }

    pub fn is_switch_timer_running(&self) -> bool {
        self.shared.switch_timer.is_active()
    }

    // ===== Element control =====

    pub fn play(&self) -> Result<PlaybackPhase, PlaybackError> {
        self.control(PlaybackControl::Play)
    }

    pub fn pause(&self) -> Result<PlaybackPhase, PlaybackError> {
        self.control(PlaybackControl::Pause)
    }

    pub fn resume(&self) -> Result<PlaybackPhase, PlaybackError> {
        self.control(PlaybackControl::Resume)
    }

    pub fn stop(&self) -> Result<PlaybackPhase, PlaybackError> {
        self.control(PlaybackControl::Stop)
    }

    /// Time-based control of the displayed media. Images have no timeline,
    /// so every control against an image fails without side effects.
    pub fn control(&self, control: PlaybackControl) -> Result<PlaybackPhase, PlaybackError> {
        let (before, after) = {
            let mut st = self.shared.state.lock();
            let item = st
                .current_item
                .as_ref()
                .ok_or(PlaybackError::NothingDisplayed)?;
            if !item.media_type.is_playable() {
                return Err(PlaybackError::NotPlayable(item.media_type));
            }

            let before = st.phase;
            let after = match (control, before) {
                (PlaybackControl::Play, PlaybackPhase::Ready | PlaybackPhase::Paused) => {
                    PlaybackPhase::Playing
                }
                (PlaybackControl::Pause, PlaybackPhase::Playing) => PlaybackPhase::Paused,
                (PlaybackControl::Resume, PlaybackPhase::Paused) => PlaybackPhase::Playing,
                (PlaybackControl::Stop, PlaybackPhase::Playing | PlaybackPhase::Paused) => {
                    PlaybackPhase::Ready
                }
                (_, phase) => phase,
            };
            st.phase = after;
            (before, after)
        };

        if before == after {
            return Ok(after);
        }

        match control {
            PlaybackControl::Play | PlaybackControl::Resume => self.shared.display.play(),
            PlaybackControl::Pause => self.shared.display.pause(),
            PlaybackControl::Stop => self.shared.display.stop(),
        }
        self.shared
            .bus
            .emit(Event::PlaybackStateChanged { phase: after });
        Ok(after)
    }

    pub fn set_volume(&self, media_type: MediaType, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.shared.settings.update_debounced(|s| match media_type {
            MediaType::Video => s.video_volume = volume,
            MediaType::Audio => s.audio_volume = volume,
            MediaType::Image => {}
        });
        let showing = self.current_item().map(|item| item.media_type);
        if showing == Some(media_type) && media_type.is_playable() {
            self.shared.display.set_volume(volume);
        }
    }

    pub fn set_video_loop(&self, enabled: bool) {
        self.shared.settings.update(|s| s.video_loop = enabled);
        if self
            .current_item()
            .map_or(false, |item| item.media_type.is_playable())
        {
            self.shared.display.set_loop(enabled);
        }
    }

    // ===== Accessors =====

    pub fn phase(&self) -> PlaybackPhase {
        self.shared.state.lock().phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase() == PlaybackPhase::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.phase() == PlaybackPhase::Paused
    }

    pub fn current_item(&self) -> Option<MediaItem> {
        self.shared.state.lock().current_item.clone()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.shared.state.lock().queue.current_index()
    }

    pub fn history(&self) -> RandomPlayHistory {
        self.shared.state.lock().queue.history().clone()
    }

    pub fn playlist(&self) -> Vec<MediaItem> {
        self.shared.state.lock().queue.items().to_vec()
    }

    pub fn playlist_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.state.lock().retry_count
    }

    pub fn is_media_loading(&self) -> bool {
        self.shared.state.lock().is_media_loading
    }

    pub fn last_switch_time(&self) -> i64 {
        self.shared.state.lock().last_switch_time
    }
}
