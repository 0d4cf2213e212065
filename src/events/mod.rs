// Events module
// The bus is the only coordination primitive between components

pub mod bus;
pub mod types;

pub use bus::{EventBus, HandlerId, Subscription};
pub use types::{names, Event};
