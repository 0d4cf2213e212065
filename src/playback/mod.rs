// Playback module
// This module handles playlist playback, auto switching and the media display seam

pub mod controller;
pub mod display;

pub use controller::{
    AutoAdvance, PlaybackControl, PlaybackController, PlaybackError, PlaybackPhase,
    SuppressReason, SwitchTrigger, LOAD_RETRY_DELAY, MAX_LOAD_RETRIES,
};
pub use display::{DisplayError, HttpMediaDisplay, MediaDisplay, ShowOptions};
