// Synchronous publish/subscribe register keyed by event name
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

use super::types::Event;

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, name: &str, id: Option<HandlerId>) -> usize {
        let mut handlers = self.handlers.lock();
        let removed = match (handlers.get_mut(name), id) {
            (Some(list), Some(id)) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                before - list.len()
            }
            (Some(list), None) => {
                let count = list.len();
                list.clear();
                count
            }
            (None, _) => 0,
        };
        if handlers.get(name).map(|l| l.is_empty()).unwrap_or(false) {
            handlers.remove(name);
        }
        removed
    }
}

/// In-process event bus.
///
/// Emission is synchronous and runs a snapshot of the handlers registered
/// for the event's name at the moment `emit` is called, in registration
/// order. Handlers added or removed while an emission is in progress only
/// affect later emissions. A panicking handler is logged and skipped.
/// Events emitted with no listeners are dropped.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .handlers
            .lock()
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            name: name.to_string(),
            id,
        }
    }

    /// Remove one handler, or every handler for `name` when `id` is `None`.
    pub fn off(&self, name: &str, id: Option<HandlerId>) -> usize {
        self.registry.remove(name, id)
    }

    pub fn emit(&self, event: Event) {
        let name = event.name();
        let snapshot: Vec<Handler> = match self.registry.handlers.lock().get(name) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                trace!("no listeners for {}", name);
                return;
            }
        };

        for handler in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if let Err(panic) = outcome {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("handler for {} failed: {}", name, reason);
            }
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.registry
            .handlers
            .lock()
            .get(name)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the handler registered.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    name: String,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name, Some(self.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::names;
    use std::sync::atomic::AtomicUsize;

    fn counter(bus: &EventBus, name: &str) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sub = bus.on(name, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    #[test]
    fn test_emit_runs_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = order.clone();
            bus.on(names::NO_MEDIA, move |_| order.lock().push(tag));
        }
        bus.emit(Event::NoMedia);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_and_off() {
        let bus = EventBus::new();
        let (first, sub) = counter(&bus, names::NO_MEDIA);
        let (second, _keep) = counter(&bus, names::NO_MEDIA);

        sub.unsubscribe();
        bus.emit(Event::NoMedia);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        assert_eq!(bus.off(names::NO_MEDIA, None), 1);
        bus.emit(Event::NoMedia);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(names::NO_MEDIA), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        bus.on(names::NO_MEDIA, |_| panic!("boom"));
        let (count, _sub) = counter(&bus, names::NO_MEDIA);

        bus.emit(Event::NoMedia);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_added_during_emit_wait_for_next_emit() {
        let bus = EventBus::new();
        let late = Arc::new(AtomicUsize::new(0));
        let inner_bus = bus.clone();
        let inner_late = late.clone();
        bus.on(names::NO_MEDIA, move |_| {
            let late = inner_late.clone();
            inner_bus.on(names::NO_MEDIA, move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.emit(Event::NoMedia);
        assert_eq!(late.load(Ordering::SeqCst), 0);
        bus.emit(Event::NoMedia);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_removed_during_emit_still_sees_current_event() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let remover = slot.clone();
        bus.on(names::NO_MEDIA, move |_| {
            if let Some(sub) = remover.lock().take() {
                sub.unsubscribe();
            }
        });
        let (count, sub) = counter(&bus, names::NO_MEDIA);
        *slot.lock() = Some(sub);

        bus.emit(Event::NoMedia);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.emit(Event::NoMedia);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_listeners_is_dropped() {
        let bus = EventBus::new();
        bus.emit(Event::SettingsUpdated);
        let (count, _sub) = counter(&bus, names::SETTINGS_UPDATED);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
