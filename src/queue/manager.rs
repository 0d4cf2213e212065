// Playlist position and random history
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::MediaItem;
use crate::settings::PlayMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Prev,
    Current,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("playlist is empty")]
    Empty,
    #[error("selection {index} is outside the playlist (length {len})")]
    OutOfBounds { index: usize, len: usize },
}

/// What a playlist reload did to the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No playable media left
    Emptied,
    /// Length changed, position and history start over
    Reset,
    /// Same length (or first load), position kept
    Kept,
}

/// Random-mode bookkeeping: which indices were shown in the current cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomPlayHistory {
    pub played_indices: Vec<usize>,
    pub current_random_index: Option<usize>,
    peeked: Option<usize>,
    stepped_back: bool,
}

impl RandomPlayHistory {
    pub fn restore(played_indices: Vec<usize>, current_random_index: Option<usize>) -> Self {
        Self {
            played_indices,
            current_random_index,
            ..Default::default()
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The playlist plus everything needed to pick the next entry
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    items: Vec<MediaItem>,
    current_index: Option<usize>,
    history: RandomPlayHistory,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: RandomPlayHistory) -> Self {
        Self {
            history,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&MediaItem> {
        self.items.get(index)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn history(&self) -> &RandomPlayHistory {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Replace the playlist wholesale
    pub fn load(&mut self, items: Vec<MediaItem>) -> LoadOutcome {
        let previous_len = self.items.len();
        let len = items.len();
        self.items = items;

        if len == 0 {
            self.current_index = None;
            self.history.clear();
            return LoadOutcome::Emptied;
        }

        if previous_len != 0 && previous_len != len {
            self.current_index = Some(0);
            self.history.clear();
            return LoadOutcome::Reset;
        }

        // Same length, or the first load after a restore: keep what is still in bounds
        self.history.played_indices.retain(|i| *i < len);
        if self.history.current_random_index.map_or(false, |i| i >= len) {
            self.history.current_random_index = None;
        }
        if self.history.peeked.map_or(false, |i| i >= len) {
            self.history.peeked = None;
        }
        self.current_index = Some(self.current_index.map_or(0, |i| i.min(len - 1)));
        LoadOutcome::Kept
    }

    /// Resolve `direction` into an index and commit it.
    ///
    /// On error nothing is modified.
    pub fn select<R: Rng>(
        &mut self,
        mode: PlayMode,
        direction: Direction,
        rng: &mut R,
    ) -> Result<usize, QueueError> {
        let len = self.items.len();
        if len == 0 {
            return Err(QueueError::Empty);
        }

        let index = match mode {
            PlayMode::Sequential => {
                let current = self.current_index.unwrap_or(0);
                match direction {
                    Direction::Next => (current + 1) % len,
                    Direction::Prev => (current % len + len - 1) % len,
                    Direction::Current => current.min(len - 1),
                }
            }
            PlayMode::Random => match direction {
                Direction::Next => self.random_next(rng),
                Direction::Prev => self.random_prev(rng)?,
                Direction::Current => match self.history.current_random_index {
                    Some(index) if index < len => index,
                    _ => self.random_next(rng),
                },
            },
        };

        self.current_index = Some(index);
        Ok(index)
    }

    /// The entry the next `select(Next)` would land on, without moving there.
    /// In random mode the candidate is remembered so the next draw uses it.
    pub fn peek_next<R: Rng>(&mut self, mode: PlayMode, rng: &mut R) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }

        match mode {
            PlayMode::Sequential => Some((self.current_index.unwrap_or(0) + 1) % len),
            PlayMode::Random => {
                if let Some(peeked) = self.history.peeked {
                    if self.peek_is_usable(peeked) {
                        return Some(peeked);
                    }
                }
                let cycle_done = self.history.played_indices.len() >= len;
                let candidate = if cycle_done {
                    rng.gen_range(0..len)
                } else {
                    Self::draw(&self.history.played_indices, len, rng)
                };
                self.history.peeked = Some(candidate);
                Some(candidate)
            }
        }
    }

    fn peek_is_usable(&self, index: usize) -> bool {
        let len = self.items.len();
        index < len
            && (self.history.played_indices.len() >= len
                || !self.history.played_indices.contains(&index))
    }

    fn random_next<R: Rng>(&mut self, rng: &mut R) -> usize {
        let len = self.items.len();
        let peeked = self.history.peeked.take();

        if self.history.played_indices.len() >= len {
            // Cycle boundary: every entry has been shown once
            self.history.played_indices.clear();
        }

        let index = match peeked {
            Some(index) if index < len && !self.history.played_indices.contains(&index) => index,
            _ => Self::draw(&self.history.played_indices, len, rng),
        };

        self.history.played_indices.push(index);
        self.history.current_random_index = Some(index);
        self.history.stepped_back = false;
        index
    }

    fn random_prev<R: Rng>(&mut self, rng: &mut R) -> Result<usize, QueueError> {
        let len = self.items.len();
        let played = &self.history.played_indices;

        // One level of undo: a second prev stays where the first one landed
        if self.history.stepped_back {
            if let Some(index) = self.history.current_random_index {
                return Self::in_bounds(index, len);
            }
        }

        match played.len() {
            0 => Ok(self.random_next(rng)),
            1 => {
                let index = Self::in_bounds(played[0], len)?;
                self.history.current_random_index = Some(index);
                self.history.stepped_back = true;
                Ok(index)
            }
            n => {
                let index = Self::in_bounds(played[n - 2], len)?;
                self.history.played_indices.pop();
                self.history.current_random_index = Some(index);
                self.history.peeked = None;
                self.history.stepped_back = true;
                Ok(index)
            }
        }
    }

    fn in_bounds(index: usize, len: usize) -> Result<usize, QueueError> {
        if index < len {
            Ok(index)
        } else {
            Err(QueueError::OutOfBounds { index, len })
        }
    }

    fn draw<R: Rng>(played: &[usize], len: usize, rng: &mut R) -> usize {
        let candidates: Vec<usize> = (0..len).filter(|i| !played.contains(i)).collect();
        match candidates.choose(rng) {
            Some(index) => *index,
            // Played list went stale against a resized playlist
            None => rng.gen_range(0..len),
        }
    }
}
