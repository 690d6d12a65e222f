// Play queue - ordered tracks, a cursor, and shuffle bookkeeping
// Pure in-memory: no I/O here, the controller feeds it and reads it back

use super::track::{Track, TrackUpdate};
use crate::error::QueueError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Shuffle-mode state: positions not yet visited this cycle, and where we've been
#[derive(Debug, Clone, Default)]
struct ShuffleState {
    unplayed: Vec<usize>,
    history: Vec<usize>, // oldest first
}

pub struct QueueManager {
    tracks: Vec<Track>,
    current: Option<usize>, // None iff tracks is empty
    shuffle: Option<ShuffleState>,
    rng: StdRng,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic shuffle order, mostly for tests
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            shuffle: None,
            rng,
        }
    }

    /// Queue a link. Returns the extracted video id.
    pub fn add(&mut self, url: &str) -> Result<String, QueueError> {
        let track = Track::from_url(url)?;
        let video_id = track.video_id().to_string();

        if self.position(&video_id).is_some() {
            return Err(QueueError::DuplicateTrack(video_id));
        }

        self.tracks.push(track);
        let index = self.tracks.len() - 1;

        if self.current.is_none() {
            self.current = Some(index);
        } else if let Some(shuffle) = &mut self.shuffle {
            shuffle.unplayed.push(index);
        }

        debug!(video_id = %video_id, index, "queued track");
        Ok(video_id)
    }

    /// Remove the track at `index`, handing it back. `None` when out of range.
    ///
    /// Removing before the cursor shifts it down so it keeps pointing at the
    /// same track. Removing the current track moves the cursor onto whatever
    /// slid into its place (or the new last track). Shuffle positions are
    /// renumbered and the removed one is forgotten.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }

        let removed = self.tracks.remove(index);

        self.current = match self.current {
            _ if self.tracks.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) => Some(current.min(self.tracks.len() - 1)),
            None => None,
        };

        if let Some(shuffle) = &mut self.shuffle {
            let remap = |i: usize| match i {
                i if i == index => None,
                i if i > index => Some(i - 1),
                i => Some(i),
            };
            shuffle.unplayed = shuffle.unplayed.iter().filter_map(|&i| remap(i)).collect();
            shuffle.history = shuffle.history.iter().filter_map(|&i| remap(i)).collect();

            // Whatever is current now counts as visited
            if let Some(current) = self.current {
                shuffle.unplayed.retain(|&i| i != current);
                while shuffle.history.last() == Some(&current) {
                    shuffle.history.pop();
                }
            }
        }

        debug!(video_id = %removed.video_id(), index, "removed track");
        Some(removed)
    }

    /// Move forward. Sequential mode stops at the end (no wraparound);
    /// shuffle mode draws uniformly from the unplayed pool.
    pub fn next(&mut self) -> Option<Track> {
        match &mut self.shuffle {
            Some(shuffle) => {
                if shuffle.unplayed.is_empty() {
                    return None;
                }
                let pick = self.rng.gen_range(0..shuffle.unplayed.len());
                let index = shuffle.unplayed.swap_remove(pick);
                if let Some(previous) = self.current {
                    shuffle.history.push(previous);
                }
                self.current = Some(index);
            }
            None => {
                let current = self.current?;
                if current + 1 >= self.tracks.len() {
                    return None;
                }
                self.current = Some(current + 1);
            }
        }

        self.current()
    }

    /// Move back. Shuffle mode walks the history stack instead of the list.
    pub fn previous(&mut self) -> Option<Track> {
        match &mut self.shuffle {
            Some(shuffle) => {
                let index = shuffle.history.pop()?;
                self.current = Some(index);
            }
            None => {
                let current = self.current?;
                if current == 0 {
                    return None;
                }
                self.current = Some(current - 1);
            }
        }

        self.current()
    }

    pub fn has_next(&self) -> bool {
        match &self.shuffle {
            Some(shuffle) => !shuffle.unplayed.is_empty(),
            None => self
                .current
                .map_or(false, |current| current + 1 < self.tracks.len()),
        }
    }

    pub fn has_previous(&self) -> bool {
        match &self.shuffle {
            Some(shuffle) => !shuffle.history.is_empty(),
            None => self.current.map_or(false, |current| current > 0),
        }
    }

    pub fn current(&self) -> Option<Track> {
        self.current.and_then(|index| self.tracks.get(index)).cloned()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Snapshot of the whole queue; changing it doesn't touch the queue
    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.clone()
    }

    pub fn track(&self, video_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.video_id() == video_id)
    }

    pub fn position(&self, video_id: &str) -> Option<usize> {
        self.tracks
            .iter()
            .position(|track| track.video_id() == video_id)
    }

    /// Replace the track with `video_id` by its updated value.
    /// Returns false (and does nothing) when the id isn't queued.
    pub fn update_track(&mut self, video_id: &str, update: &TrackUpdate) -> bool {
        match self.position(video_id) {
            Some(index) => {
                self.tracks[index] = self.tracks[index].apply(update);
                true
            }
            None => false,
        }
    }

    /// Empty the queue. Shuffle stays switched on if it was, with fresh bookkeeping.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = None;
        if let Some(shuffle) = &mut self.shuffle {
            *shuffle = ShuffleState::default();
        }
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        if self.shuffle.take().is_some() {
            debug!("shuffle off");
            return false;
        }

        let current = self.current;
        let unplayed = (0..self.tracks.len())
            .filter(|&index| Some(index) != current)
            .collect();
        self.shuffle = Some(ShuffleState {
            unplayed,
            history: Vec::new(),
        });
        debug!("shuffle on");
        true
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle.is_some()
    }

    /// Unplayed shuffle positions, sorted. Empty outside shuffle mode.
    pub fn unplayed_indices(&self) -> Vec<usize> {
        let mut unplayed = self
            .shuffle
            .as_ref()
            .map(|shuffle| shuffle.unplayed.clone())
            .unwrap_or_default();
        unplayed.sort_unstable();
        unplayed
    }

    pub fn history(&self) -> &[usize] {
        self.shuffle
            .as_ref()
            .map(|shuffle| shuffle.history.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}
