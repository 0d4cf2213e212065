// Settings store: in-memory record, durable mirror, change notifications
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventBus};
use crate::notify::Notifier;

use super::backend::SettingsBackend;
use super::migration::{migrate_value, MigrationReport};
use super::settings::{merge_json, Settings};

/// Key the settings blob is stored under
pub const EXTENSION_KEY: &str = "mediadeck";

/// Quiet period before a debounced save hits the backend
const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings patch must be a JSON object")]
    NotAnObject,
    #[error("invalid settings value: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Owner of the live [`Settings`] record.
///
/// Every mutation is one critical section: read, modify and persist happen
/// under the same lock with no await in between. `settingsUpdated` is
/// emitted after the lock is released.
pub struct SettingsStore {
    key: String,
    current: Mutex<Settings>,
    primary: Box<dyn SettingsBackend>,
    fallback: Option<Box<dyn SettingsBackend>>,
    bus: EventBus,
    notifier: Arc<dyn Notifier>,
    using_fallback: AtomicBool,
    save_generation: AtomicU64,
    weak_self: Weak<SettingsStore>,
}

impl SettingsStore {
    /// Load, migrate and backfill the stored record. Never fails: an
    /// unreadable store degrades to the fallback, then to defaults.
    pub fn open(
        key: &str,
        primary: Box<dyn SettingsBackend>,
        fallback: Option<Box<dyn SettingsBackend>>,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let store = Arc::new_cyclic(|weak| Self {
            key: key.to_string(),
            current: Mutex::new(Settings::default()),
            primary,
            fallback,
            bus,
            notifier,
            using_fallback: AtomicBool::new(false),
            save_generation: AtomicU64::new(0),
            weak_self: weak.clone(),
        });

        match store.load_raw() {
            Some(mut raw) => {
                let report = migrate_value(&mut raw);
                let (settings, rejected) = Settings::from_value_lenient(raw);
                let mut guard = store.current.lock();
                *guard = settings;
                if !rejected.is_empty() {
                    store.report_rejected(&rejected);
                } else if report.changed {
                    store.persist(&guard);
                }
                info!("settings loaded (version {})", guard.config_version);
            }
            None => {
                info!("no stored settings, using defaults");
                let guard = store.current.lock();
                store.persist(&guard);
            }
        }

        store
    }

    /// Convenience constructor over a single backend
    pub fn with_backend(
        backend: Box<dyn SettingsBackend>,
        bus: EventBus,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Self::open(EXTENSION_KEY, backend, None, bus, notifier)
    }

    /// Live settings, every recognized key present
    pub fn get(&self) -> Settings {
        self.current.lock().clone()
    }

    /// Merge `partial` onto the current record (or take the current record
    /// as is), persist it and announce the change.
    pub fn save(&self, partial: Option<Value>) -> Result<Settings, SettingsError> {
        let saved = {
            let mut guard = self.current.lock();
            let next = match partial {
                None => guard.clone(),
                Some(patch) => {
                    if !patch.is_object() {
                        return Err(SettingsError::NotAnObject);
                    }
                    let mut value = guard.to_value();
                    merge_json(&mut value, &patch);
                    serde_json::from_value::<Settings>(value)?
                }
            };
            *guard = next;
            self.persist(&guard);
            guard.clone()
        };

        self.bus.emit(Event::SettingsUpdated);
        Ok(saved)
    }

    /// Mutate and persist in one critical section
    pub fn update<F>(&self, mutate: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut guard = self.current.lock();
            mutate(&mut guard);
            self.persist(&guard);
            guard.clone()
        };
        self.bus.emit(Event::SettingsUpdated);
        updated
    }

    /// Mutate now, persist once mutations have been quiet for a moment
    pub fn update_debounced<F>(&self, mutate: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut guard = self.current.lock();
            mutate(&mut guard);
            guard.clone()
        };
        self.bus.emit(Event::SettingsUpdated);
        self.schedule_save();
        updated
    }

    /// Write the in-memory record now
    pub fn flush(&self) {
        let guard = self.current.lock();
        self.persist(&guard);
    }

    /// Re-run forward migration against the stored blob. Idempotent.
    pub fn migrate(&self) -> MigrationReport {
        let report = {
            let mut guard = self.current.lock();
            let Some(mut raw) = self.load_raw() else {
                return MigrationReport {
                    from: guard.config_version.clone(),
                    to: guard.config_version.clone(),
                    changed: false,
                };
            };

            let report = migrate_value(&mut raw);
            if report.changed {
                let (settings, rejected) = Settings::from_value_lenient(raw);
                *guard = settings;
                if rejected.is_empty() {
                    self.persist(&guard);
                } else {
                    warn!(
                        "migrated settings kept in memory only, unreadable: {}",
                        rejected.join(", ")
                    );
                }
            }
            report
        };

        if report.changed {
            self.bus.emit(Event::SettingsUpdated);
        }
        report
    }

    /// Restore compiled-in defaults and persist them
    pub fn reset(&self) -> Settings {
        let settings = {
            let mut guard = self.current.lock();
            *guard = Settings::default();
            self.persist(&guard);
            guard.clone()
        };
        info!("settings reset to defaults");
        self.bus.emit(Event::SettingsUpdated);
        settings
    }

    pub fn is_using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::SeqCst)
    }

    fn schedule_save(&self) {
        let generation = self.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.flush();
            return;
        };

        let weak = self.weak_self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(SAVE_DEBOUNCE).await;
            if let Some(store) = weak.upgrade() {
                if store.save_generation.load(Ordering::SeqCst) == generation {
                    store.flush();
                }
            }
        });
    }

    /// The stored blob is left as is until the user saves again
    fn report_rejected(&self, keys: &[String]) {
        warn!("unreadable stored settings, using defaults for: {}", keys.join(", "));
        self.notifier
            .warning("Some stored settings could not be read; defaults are used for them");
    }

    fn load_raw(&self) -> Option<Value> {
        if !self.is_using_fallback() {
            match self.primary.load(&self.key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => self.switch_to_fallback(&e),
            }
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.load(&self.key) {
            Ok(value) => value,
            Err(e) => {
                warn!("{} settings backend failed to load: {:#}", fallback.name(), e);
                None
            }
        }
    }

    fn persist(&self, settings: &Settings) {
        let value = settings.to_value();

        if !self.is_using_fallback() {
            match self.primary.store(&self.key, &value) {
                Ok(()) => {
                    debug!("settings persisted to {}", self.primary.name());
                    return;
                }
                Err(e) => self.switch_to_fallback(&e),
            }
        }

        match &self.fallback {
            Some(fallback) => {
                if let Err(e) = fallback.store(&self.key, &value) {
                    error!("{} settings backend failed to save: {:#}", fallback.name(), e);
                }
            }
            None => error!("settings could not be persisted; changes live in memory only"),
        }
    }

    fn switch_to_fallback(&self, cause: &anyhow::Error) {
        if self.using_fallback.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("{} settings backend failed: {:#}", self.primary.name(), cause);
        self.notifier
            .warning("Settings storage unavailable, using local fallback storage");
    }
}
