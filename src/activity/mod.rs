// Activity module
// This module handles host chat activity and turns it into switch requests

pub mod detector;
pub mod host;

pub use detector::{ActivityDetector, DISCOVERY_ATTEMPTS, DISCOVERY_DELAY};
pub use host::{
    bind, ActivitySignal, BindingStrategy, HostCallback, HostError, HostEventSource, HostLocator,
    HostSubscription, ListenerToken, Naming, Registration, StaticLocator, BINDING_STRATEGIES,
};
