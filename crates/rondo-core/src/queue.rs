//! Pending tracks, in play order.
//!
//! The queue never holds the engine's current track: `pop_front` hands a
//! track over, and only the finish path (looping) puts it back.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use rand::seq::SliceRandom;

use crate::error::{PlayerError, PlayerResult};
use crate::models::Track;

#[derive(Debug, Default, Clone)]
pub struct Queue {
    tracks: VecDeque<Track>,
    looping: bool,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn push_front(&mut self, track: Track) {
        self.tracks.push_front(track);
    }

    pub fn pop_front(&mut self) -> PlayerResult<Track> {
        self.tracks.pop_front().ok_or(PlayerError::EmptyQueue)
    }

    /// Remove the track at `index`. Negative or out-of-range indexes are
    /// ignored.
    pub fn delete_at(&mut self, index: isize) -> Option<Track> {
        let index = usize::try_from(index).ok()?;
        self.tracks.remove(index)
    }

    /// Uniform random permutation of the pending tracks.
    pub fn shuffle(&mut self) {
        self.tracks
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_loop(&self) -> bool {
        self.looping
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write one absolute path per line. Goes through a temp file in the
    /// same directory so a crash never leaves a half-written queue.
    pub fn save(&self, path: &Path) -> PlayerResult<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| PlayerError::io(dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PlayerError::io(dir, e))?;
        for track in &self.tracks {
            writeln!(tmp, "{}", track.path().display()).map_err(|e| PlayerError::io(path, e))?;
        }
        tmp.persist(path).map_err(|e| PlayerError::io(path, e.error))?;

        log::debug!("rondo: saved {} queued tracks to {}", self.len(), path.display());
        Ok(())
    }

    /// Load a queue saved by `save`. A missing file is an empty queue;
    /// paths that no longer resolve are skipped.
    pub fn restore(path: &Path) -> PlayerResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(PlayerError::io(path, e)),
        };

        let mut queue = Self::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match Track::from_path(line) {
                Ok(track) => queue.push_back(track),
                Err(e) => log::warn!("rondo: dropping queued track: {}", e),
            }
        }
        log::info!("rondo: restored {} queued tracks", queue.len());
        Ok(queue)
    }
}
