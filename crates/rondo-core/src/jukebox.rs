//! Jukebox: keeps the engine fed from the queue.
//!
//! Registers itself as the engine's finish subscriber. Each finish re-queues
//! the track when looping, then pops and runs until something starts or the
//! queue runs dry. Advancement is serialized by `advance`; a second
//! transition for the same stream never reaches us because the engine hands
//! each stream's teardown to exactly one caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::PlaybackEngine;
use crate::error::{PlayerError, PlayerResult};
use crate::models::{PlaybackCommand, Track};
use crate::queue::Queue;
use crate::volume;

pub struct Jukebox {
    engine: Arc<PlaybackEngine>,
    queue: Mutex<Queue>,
    advance: Mutex<()>,
}

impl Jukebox {
    pub fn new(engine: Arc<PlaybackEngine>, queue: Queue) -> Arc<Self> {
        let jukebox = Arc::new(Self {
            engine,
            queue: Mutex::new(queue),
            advance: Mutex::new(()),
        });

        let weak = Arc::downgrade(&jukebox);
        jukebox.engine.on_song_finish(move |track| {
            if let Some(jukebox) = weak.upgrade() {
                jukebox.song_finished(track);
            }
        });
        jukebox
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    fn song_finished(&self, track: &Track) {
        let _advance = self.advance.lock();
        {
            let mut queue = self.queue.lock();
            if queue.is_loop() {
                queue.push_back(track.clone());
            }
        }
        // Someone started a track while this one was finishing.
        if self.is_active() {
            return;
        }
        self.advance_locked();
    }

    /// A stream is loaded. False while a finished track is being handed
    /// over, even though the engine still reports it as current.
    fn is_active(&self) -> bool {
        self.engine.is_running() || self.engine.is_paused()
    }

    /// Pop and run until a track starts. Unplayable files are dropped;
    /// any other failure puts the track back and stops.
    fn advance_locked(&self) -> bool {
        loop {
            let next = match self.queue.lock().pop_front() {
                Ok(track) => track,
                Err(_) => {
                    log::info!("rondo: queue finished");
                    return false;
                }
            };
            match self.engine.run(next.clone()) {
                Ok(()) => return true,
                Err(e @ PlayerError::Io { .. }) => {
                    log::warn!("rondo: dropping {}: {}", next, e);
                }
                Err(e) => {
                    log::error!("rondo: cannot advance: {}", e);
                    self.queue.lock().push_front(next);
                    return false;
                }
            }
        }
    }

    /// Start playing from the queue if the engine is idle. Returns whether
    /// something is playing afterwards.
    pub fn start(&self) -> bool {
        let _advance = self.advance.lock();
        if self.is_active() {
            return true;
        }
        self.advance_locked()
    }

    // -----------------------------------------------------------------------
    // Queue edits
    // -----------------------------------------------------------------------

    pub fn enqueue(&self, track: Track) {
        self.queue.lock().push_back(track);
    }

    pub fn play_next(&self, track: Track) {
        self.queue.lock().push_front(track);
    }

    /// Skip the current track. Advancement happens through the finish hook.
    pub fn skip(&self) -> PlayerResult<()> {
        self.engine.skip()
    }

    pub fn set_loop(&self, looping: bool) {
        self.queue.lock().set_loop(looping);
    }

    /// Flip loop mode, returning the new setting.
    pub fn toggle_loop(&self) -> bool {
        let mut queue = self.queue.lock();
        let looping = !queue.is_loop();
        queue.set_loop(looping);
        looping
    }

    pub fn is_loop(&self) -> bool {
        self.queue.lock().is_loop()
    }

    pub fn shuffle(&self) {
        self.queue.lock().shuffle();
    }

    pub fn delete_at(&self, index: isize) -> Option<Track> {
        self.queue.lock().delete_at(index)
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn queue_snapshot(&self) -> Vec<Track> {
        self.queue.lock().tracks()
    }

    pub fn save(&self, path: &Path) -> PlayerResult<()> {
        let queue = self.queue.lock().clone();
        queue.save(path)
    }

    // -----------------------------------------------------------------------
    // Relative transport
    // -----------------------------------------------------------------------

    /// Seek by `delta_secs`, clamped to `[0, length)`. Returns the new
    /// position.
    pub fn seek_by(&self, delta_secs: i64) -> PlayerResult<Duration> {
        let position = self.engine.position().as_secs_f64();
        let length = self.engine.length();

        let mut target = (position + delta_secs as f64).max(0.0);
        if !length.is_zero() {
            let last = length.saturating_sub(Duration::from_millis(1));
            target = target.min(last.as_secs_f64());
        }
        let target = Duration::from_secs_f64(target);
        self.engine.seek(target)?;
        Ok(target)
    }

    /// Change volume by `delta_percent`, clamped to 0-100. Returns the new
    /// percentage.
    pub fn volume_by(&self, delta_percent: i64) -> i64 {
        let current = self.engine.volume();
        let percent = (volume::volume_to_percent(current) + delta_percent).clamp(0, 100);
        self.engine
            .set_volume(volume::percent_to_volume(percent) - current);
        percent
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Execute a queue or transport command. `List`, `Now` and `Quit` are
    /// the front end's business and do nothing here.
    pub fn dispatch(&self, command: &PlaybackCommand) -> PlayerResult<()> {
        match command {
            PlaybackCommand::Add { path } => {
                self.enqueue(Track::from_path(path)?);
                self.start();
            }
            PlaybackCommand::PlayNext { path } => {
                self.play_next(Track::from_path(path)?);
                self.start();
            }
            PlaybackCommand::Play => {
                if !self.is_active() {
                    if !self.start() {
                        return Err(PlayerError::EmptyQueue);
                    }
                } else {
                    self.engine.play();
                }
            }
            PlaybackCommand::Pause => self.engine.pause(),
            PlaybackCommand::Toggle => self.engine.toggle_pause(),
            PlaybackCommand::Skip => self.skip()?,
            PlaybackCommand::Seek { delta_secs } => {
                self.seek_by(*delta_secs)?;
            }
            PlaybackCommand::Volume { delta_percent } => {
                self.volume_by(*delta_percent);
            }
            PlaybackCommand::Loop => {
                let looping = self.toggle_loop();
                log::info!("rondo: loop {}", if looping { "on" } else { "off" });
            }
            PlaybackCommand::Shuffle => self.shuffle(),
            PlaybackCommand::Delete { index } => {
                if self.delete_at(*index).is_none() {
                    log::debug!("rondo: no queued track at {}", index);
                }
            }
            PlaybackCommand::Clear => self.clear(),
            PlaybackCommand::List | PlaybackCommand::Now | PlaybackCommand::Quit => {}
        }
        Ok(())
    }
}
