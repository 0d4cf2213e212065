// Queue management module
// This module handles playlist position and random play history

pub mod manager;

pub use manager::{Direction, LoadOutcome, PlayQueue, QueueError, RandomPlayHistory};
