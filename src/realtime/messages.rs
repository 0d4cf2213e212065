// Realtime wire messages
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MEDIA_UPDATED: &str = "media_updated";
pub const PONG: &str = "pong";
pub const PING: &str = "ping";

/// Server frame: `{type, payload | data, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    MediaUpdated,
    Pong,
    Unknown,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn kind(&self) -> InboundKind {
        match self.kind.as_str() {
            MEDIA_UPDATED => InboundKind::MediaUpdated,
            PONG => InboundKind::Pong,
            _ => InboundKind::Unknown,
        }
    }
}

/// Client frame. Only heartbeats are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
}

impl OutboundMessage {
    pub fn ping(timestamp: i64) -> Self {
        Self {
            kind: PING,
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
