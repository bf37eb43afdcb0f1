//! Playback engine: the "currently playing" slot and its state machine.
//!
//! The engine owns one backend and at most one stream. It never decodes
//! anything itself: `run` hands the track to the backend together with an
//! end-of-stream continuation, and the continuation reports back here.
//!
//! Transitions:
//!
//! ```text
//! Idle --run--> Playing --pause--> Paused --play--> Playing
//! Playing|Paused --(end of stream | skip)--> Idle, or Playing again when
//!                                            the finish hook starts a track
//! ```
//!
//! Every `run` allocates a stream id. Whoever takes that id out of the
//! engine state first (the continuation, `skip`, or a replacing `run`) owns
//! the teardown; the others see a different id and do nothing.
//!
//! Continuations only post an event. A notifier thread owned by the engine
//! picks it up and runs the finish hook, so hooks never execute on a render
//! callback or on a backend thread the engine may need to join.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::effects::AudioBackend;
use crate::error::{log_err, PlayerError, PlayerResult};
use crate::models::{PlaybackState, Track};

/// Returned by `position()`/`length()` when no stream is active.
pub const POSITION_SENTINEL: Duration = Duration::ZERO;

/// A transition subscriber. One per hook; registering replaces the last.
pub type Hook = Arc<dyn Fn(&Track) + Send + Sync>;

fn noop_hook() -> Hook {
    Arc::new(|_: &Track| {})
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EngineState {
    current: Option<Track>,
    running: bool,
    paused: bool,
    /// Volume accumulator in backend-native units.
    volume: f64,
    /// Id of the active stream; `None` once it has been torn down.
    stream: Option<u64>,
    last_stream: u64,
    ever_ran: bool,
    length: Option<Duration>,
    shut_down: bool,
}

struct Hooks {
    start: Mutex<Hook>,
    finish: Mutex<Hook>,
    skip: Mutex<Hook>,
}

enum Event {
    StreamEnded(u64),
    Shutdown,
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    state: Mutex<EngineState>,
    hooks: Hooks,
    /// Serializes stream replacement: `run` and `skip` hold it across the
    /// backend call, never across a hook.
    start_lock: Mutex<()>,
}

impl Inner {
    fn stream_ended(&self, id: u64) {
        let track = {
            let mut st = self.state.lock();
            if st.stream != Some(id) {
                return;
            }
            st.stream = None;
            st.running = false;
            st.paused = false;
            match st.current.clone() {
                Some(track) => track,
                None => return,
            }
        };
        log::info!("rondo: finished {}", track);
        self.finish_transition(&track);
    }

    /// Run the finish hook, then go idle unless the hook started something.
    fn finish_transition(&self, track: &Track) {
        let hook = self.hooks.finish.lock().clone();
        hook(track);

        let mut st = self.state.lock();
        if st.stream.is_none() && st.current.as_ref() == Some(track) {
            st.current = None;
            st.running = false;
            st.paused = false;
            st.length = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct PlaybackEngine {
    inner: Arc<Inner>,
    events: Mutex<Sender<Event>>,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Create an engine over `backend`, starting at `volume` native units.
    pub fn new(backend: Arc<dyn AudioBackend>, volume: f64) -> Self {
        let inner = Arc::new(Inner {
            backend,
            state: Mutex::new(EngineState {
                volume,
                ..EngineState::default()
            }),
            hooks: Hooks {
                start: Mutex::new(noop_hook()),
                finish: Mutex::new(noop_hook()),
                skip: Mutex::new(noop_hook()),
            },
            start_lock: Mutex::new(()),
        });

        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&inner);
        let notifier = thread::Builder::new()
            .name("rondo-notifier".into())
            .spawn(move || notify_loop(weak, rx));
        let notifier = match notifier {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("rondo: failed to spawn notifier thread: {}", e);
                None
            }
        };

        Self {
            inner,
            events: Mutex::new(tx),
            notifier: Mutex::new(notifier),
        }
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    /// Called after a track starts, on the thread that called `run`.
    pub fn on_song_start(&self, hook: impl Fn(&Track) + Send + Sync + 'static) {
        *self.inner.hooks.start.lock() = Arc::new(hook);
    }

    /// Called once the track's stream is released, after a natural end or
    /// a skip. Starting a new track from here keeps the engine out of Idle.
    pub fn on_song_finish(&self, hook: impl Fn(&Track) + Send + Sync + 'static) {
        *self.inner.hooks.finish.lock() = Arc::new(hook);
    }

    /// Called by `skip` while the stream is still open, before it is closed
    /// and before the finish hook.
    pub fn on_song_skip(&self, hook: impl Fn(&Track) + Send + Sync + 'static) {
        *self.inner.hooks.skip.lock() = Arc::new(hook);
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Start `track`, replacing whatever is playing without firing hooks
    /// for it. On failure the engine is left Idle.
    pub fn run(&self, track: Track) -> PlayerResult<()> {
        {
            let _start = self.inner.start_lock.lock();
            let (id, volume) = {
                let mut st = self.inner.state.lock();
                if st.shut_down {
                    return Err(PlayerError::State("engine is shut down"));
                }
                st.last_stream += 1;
                let id = st.last_stream;
                st.stream = Some(id);
                st.current = Some(track.clone());
                st.running = true;
                st.paused = false;
                st.ever_ran = true;
                st.length = None;
                (id, st.volume)
            };

            let tx = self.events.lock().clone();
            let on_end = Box::new(move || {
                let _ = tx.send(Event::StreamEnded(id));
            });

            match self.inner.backend.start(&track, volume, on_end) {
                Ok(info) => {
                    let mut st = self.inner.state.lock();
                    if st.stream == Some(id) {
                        st.length = info.length;
                    }
                }
                Err(e) => {
                    log_err(self.inner.backend.close(), "close after failed start");
                    let mut st = self.inner.state.lock();
                    if st.stream == Some(id) {
                        st.stream = None;
                        st.current = None;
                        st.running = false;
                        st.paused = false;
                    }
                    log::warn!("rondo: cannot start {}: {}", track, e);
                    return Err(e);
                }
            }
        }

        log::info!("rondo: playing {}", track);
        let hook = self.inner.hooks.start.lock().clone();
        hook(&track);
        Ok(())
    }

    // Transport calls hold `start_lock` across the backend round-trip so they
    // cannot interleave with a replacement, but never the state lock: a slow
    // daemon must not block `position()` or the notifier.

    pub fn pause(&self) {
        let _start = self.inner.start_lock.lock();
        {
            let st = self.inner.state.lock();
            if st.stream.is_none() || st.paused {
                return;
            }
        }
        if log_err(self.inner.backend.pause(), "pause") {
            let mut st = self.inner.state.lock();
            if st.stream.is_some() {
                st.paused = true;
                st.running = false;
            }
        }
    }

    pub fn play(&self) {
        let _start = self.inner.start_lock.lock();
        {
            let st = self.inner.state.lock();
            if st.stream.is_none() || !st.paused {
                return;
            }
        }
        if log_err(self.inner.backend.resume(), "resume") {
            let mut st = self.inner.state.lock();
            if st.stream.is_some() {
                st.paused = false;
                st.running = true;
            }
        }
    }

    /// Pause if playing, resume if paused. Does nothing before the first
    /// `run`.
    pub fn toggle_pause(&self) {
        let (ever_ran, paused) = {
            let st = self.inner.state.lock();
            (st.ever_ran, st.paused)
        };
        if !ever_ran {
            return;
        }
        if paused {
            self.play();
        } else {
            self.pause();
        }
    }

    /// Add `delta` native units to the volume. Applied to the active
    /// stream right away, otherwise only to the next `run`.
    pub fn set_volume(&self, delta: f64) {
        let _start = self.inner.start_lock.lock();
        let (active, volume) = {
            let mut st = self.inner.state.lock();
            st.volume += delta;
            (st.stream.is_some(), st.volume)
        };
        if active {
            log_err(self.inner.backend.set_volume(volume), "set volume");
        }
    }

    /// Move the active stream to `position`. The caller keeps it inside
    /// `[0, length)`.
    pub fn seek(&self, position: Duration) -> PlayerResult<()> {
        let _start = self.inner.start_lock.lock();
        if self.inner.state.lock().stream.is_none() {
            return Err(PlayerError::State("no active stream"));
        }
        self.inner.backend.seek(position)
    }

    /// Force the current track to finish: skip hook, close, finish hook.
    /// Fails with `State` when nothing is playing or the track is already
    /// on its way out, in which case no hook runs.
    pub fn skip(&self) -> PlayerResult<()> {
        let track = {
            let _start = self.inner.start_lock.lock();
            let mut st = self.inner.state.lock();
            let Some(track) = st.current.clone() else {
                return Err(PlayerError::State("nothing is playing"));
            };
            // Taking the id keeps the continuation from finishing it twice.
            if st.stream.take().is_none() {
                return Err(PlayerError::State("track is already finishing"));
            }
            track
        };

        log::info!("rondo: skipped {}", track);
        let hook = self.inner.hooks.skip.lock().clone();
        hook(&track);

        {
            let _start = self.inner.start_lock.lock();
            // The skip hook may have started a replacement already.
            let replaced = self.inner.state.lock().stream.is_some();
            if !replaced {
                log_err(self.inner.backend.close(), "close stream");
                let mut st = self.inner.state.lock();
                st.running = false;
                st.paused = false;
            }
        }

        self.inner.finish_transition(&track);
        Ok(())
    }

    /// Close the active stream and stop the notifier. No hooks fire, and
    /// later `run` calls fail.
    pub fn shutdown(&self) {
        {
            let _start = self.inner.start_lock.lock();
            let had_stream = {
                let mut st = self.inner.state.lock();
                st.shut_down = true;
                let had = st.stream.take().is_some();
                st.current = None;
                st.running = false;
                st.paused = false;
                had
            };
            if had_stream {
                log_err(self.inner.backend.close(), "close on shutdown");
            }
        }

        let _ = self.events.lock().send(Event::Shutdown);
        if let Some(handle) = self.notifier.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn position(&self) -> Duration {
        let st = self.inner.state.lock();
        if st.stream.is_none() {
            return POSITION_SENTINEL;
        }
        self.inner.backend.position().unwrap_or(POSITION_SENTINEL)
    }

    pub fn length(&self) -> Duration {
        let st = self.inner.state.lock();
        if st.stream.is_none() {
            return POSITION_SENTINEL;
        }
        self.inner
            .backend
            .length()
            .or(st.length)
            .unwrap_or(POSITION_SENTINEL)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Volume in native units.
    pub fn volume(&self) -> f64 {
        self.inner.state.lock().volume
    }

    pub fn current_song(&self) -> Option<Track> {
        self.inner.state.lock().current.clone()
    }

    pub fn state(&self) -> PlaybackState {
        let st = self.inner.state.lock();
        match (&st.current, st.paused) {
            (None, _) => PlaybackState::Idle,
            (Some(_), true) => PlaybackState::Paused,
            (Some(_), false) => PlaybackState::Playing,
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn notify_loop(inner: Weak<Inner>, rx: Receiver<Event>) {
    for event in rx {
        match event {
            Event::Shutdown => break,
            Event::StreamEnded(id) => match inner.upgrade() {
                Some(inner) => inner.stream_ended(id),
                None => break,
            },
        }
    }
}
