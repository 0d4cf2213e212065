// Realtime module
// This module handles the websocket link to the media server

pub mod channel;
pub mod messages;

pub use channel::{realtime_url, ConnectionState, RealtimeChannel, RealtimeError};
pub use messages::{InboundKind, InboundMessage, OutboundMessage};
