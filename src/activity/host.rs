// Host event-source adapter
// Hosts expose their event emitter in different shapes. Binding tries a fixed
// list of strategies in order and hands back one uniform subscription.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Chat activity the host can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    /// The assistant produced output
    AssistantOutput,
    /// The user sent input
    UserInput,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 2] = [ActivitySignal::AssistantOutput, ActivitySignal::UserInput];

    /// Key looked up in a host's event type table
    pub fn type_key(self) -> &'static str {
        match self {
            ActivitySignal::AssistantOutput => "MESSAGE_RECEIVED",
            ActivitySignal::UserInput => "MESSAGE_SENT",
        }
    }

    /// Event name used when the host has no type table
    pub fn raw_name(self) -> &'static str {
        match self {
            ActivitySignal::AssistantOutput => "message_received",
            ActivitySignal::UserInput => "message_sent",
        }
    }
}

pub type HostCallback = Arc<dyn Fn() + Send + Sync>;

pub type ListenerToken = u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host event system not available after {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("host event system offers no usable way to listen for {0:?}")]
    NoBindingStrategy(ActivitySignal),
}

/// A host event emitter. Every capability is optional; an implementation
/// overrides the ones its host actually has.
pub trait HostEventSource: Send + Sync {
    /// DOM-style registration
    fn add_event_listener(&self, _event: &str, _callback: HostCallback) -> Option<ListenerToken> {
        None
    }

    /// Node-style registration
    fn on(&self, _event: &str, _callback: HostCallback) -> Option<ListenerToken> {
        None
    }

    /// Symbolic name -> actual event name
    fn event_types(&self) -> Option<HashMap<String, String>> {
        None
    }

    fn remove_listener(&self, _event: &str, _token: ListenerToken) -> bool {
        false
    }
}

/// Looks for the host's event source; `None` while the host is still starting.
pub trait HostLocator: Send + Sync {
    fn locate(&self) -> Option<Arc<dyn HostEventSource>>;
}

/// Locator for a source that is known up front
pub struct StaticLocator(pub Option<Arc<dyn HostEventSource>>);

impl HostLocator for StaticLocator {
    fn locate(&self) -> Option<Arc<dyn HostEventSource>> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    AddEventListener,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    TypeTable,
    RawString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingStrategy {
    pub registration: Registration,
    pub naming: Naming,
}

/// Tried first to last
pub const BINDING_STRATEGIES: [BindingStrategy; 4] = [
    BindingStrategy {
        registration: Registration::AddEventListener,
        naming: Naming::TypeTable,
    },
    BindingStrategy {
        registration: Registration::On,
        naming: Naming::TypeTable,
    },
    BindingStrategy {
        registration: Registration::AddEventListener,
        naming: Naming::RawString,
    },
    BindingStrategy {
        registration: Registration::On,
        naming: Naming::RawString,
    },
];

impl BindingStrategy {
    fn event_name(&self, source: &dyn HostEventSource, signal: ActivitySignal) -> Option<String> {
        match self.naming {
            Naming::TypeTable => source.event_types()?.get(signal.type_key()).cloned(),
            Naming::RawString => Some(signal.raw_name().to_string()),
        }
    }

    fn register(
        &self,
        source: &dyn HostEventSource,
        event: &str,
        callback: HostCallback,
    ) -> Option<ListenerToken> {
        match self.registration {
            Registration::AddEventListener => source.add_event_listener(event, callback),
            Registration::On => source.on(event, callback),
        }
    }
}

/// A live listener, whatever strategy produced it
pub struct HostSubscription {
    source: Arc<dyn HostEventSource>,
    signal: ActivitySignal,
    event: String,
    token: ListenerToken,
    strategy: BindingStrategy,
}

impl HostSubscription {
    pub fn signal(&self) -> ActivitySignal {
        self.signal
    }

    pub fn event_name(&self) -> &str {
        &self.event
    }

    pub fn strategy(&self) -> BindingStrategy {
        self.strategy
    }

    pub fn unsubscribe(self) -> bool {
        self.source.remove_listener(&self.event, self.token)
    }
}

/// Register `callback` for `signal` with the first strategy the source accepts
pub fn bind(
    source: &Arc<dyn HostEventSource>,
    signal: ActivitySignal,
    callback: HostCallback,
) -> Result<HostSubscription, HostError> {
    for strategy in BINDING_STRATEGIES {
        let Some(event) = strategy.event_name(source.as_ref(), signal) else {
            continue;
        };
        match strategy.register(source.as_ref(), &event, Arc::clone(&callback)) {
            Some(token) => {
                return Ok(HostSubscription {
                    source: Arc::clone(source),
                    signal,
                    event,
                    token,
                    strategy,
                })
            }
            None => trace!("{:?} rejected {}", strategy, event),
        }
    }
    Err(HostError::NoBindingStrategy(signal))
}
