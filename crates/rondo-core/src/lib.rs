//! rondo-core: playback engine and queue orchestrator.
//!
//! One track plays at a time. The queue feeds the engine; the engine tells
//! the jukebox when a track is done; the jukebox picks the next one.
//!
//! # Architecture
//!
//! ```text
//! Queue ──pop_front──▶ Jukebox ──run──▶ PlaybackEngine ──start──▶ AudioBackend
//!   ▲                     │                  │                       │
//!   └──push_back (loop)───┘◀──on_song_finish─┘◀──end of stream───────┘
//!
//! ProgressReporter ──position()──▶ PlaybackEngine   (independent ticker)
//! ```
//!
//! Backends: `effects::audio::LocalBackend` decodes in process and plays
//! through the default output device; `effects::daemon::DaemonBackend`
//! drives an MPD-protocol daemon over TCP.

pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod jukebox;
pub mod models;
pub mod progress;
pub mod queue;
pub mod volume;

pub use config::{BackendKind, Config};
pub use engine::{PlaybackEngine, POSITION_SENTINEL};
pub use error::{PlayerError, PlayerResult};
pub use jukebox::Jukebox;
pub use models::*;
pub use progress::{Progress, ProgressReporter};
pub use queue::Queue;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::scripted::{wait_for, ScriptedBackend};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn track(name: &str) -> Track {
        Track::new(format!("/music/{}.mp3", name), name)
    }

    fn jukebox(names: &[&str]) -> (Arc<ScriptedBackend>, Arc<Jukebox>) {
        let backend = Arc::new(ScriptedBackend::new());
        let engine = Arc::new(PlaybackEngine::new(backend.clone(), 0.0));
        let mut queue = Queue::new();
        for name in names {
            queue.push_back(track(name));
        }
        (backend, Jukebox::new(engine, queue))
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|n| PathBuf::from(format!("/music/{}.mp3", n)))
            .collect()
    }

    #[test]
    fn plays_queue_in_order_then_goes_idle() {
        let (backend, jukebox) = jukebox(&["a", "b", "c"]);
        let engine = Arc::clone(jukebox.engine());

        assert!(jukebox.start());
        assert_eq!(engine.current_song(), Some(track("a")));

        assert!(backend.finish());
        assert!(wait_for(|| backend.started().len() == 2));
        assert_eq!(engine.current_song(), Some(track("b")));
        assert_eq!(jukebox.queue_snapshot(), vec![track("c")]);

        assert!(backend.finish());
        assert!(wait_for(|| backend.started().len() == 3));
        assert_eq!(engine.current_song(), Some(track("c")));

        assert!(backend.finish());
        assert!(wait_for(|| engine.state() == PlaybackState::Idle));
        assert_eq!(backend.started(), paths(&["a", "b", "c"]));
        assert!(jukebox.queue_snapshot().is_empty());
        assert!(!engine.is_running());
    }

    #[test]
    fn looping_single_track_never_reports_idle() {
        let (backend, jukebox) = jukebox(&["a"]);
        jukebox.set_loop(true);
        let engine = Arc::clone(jukebox.engine());
        assert!(jukebox.start());

        let done = Arc::new(AtomicBool::new(false));
        let saw_idle = Arc::new(AtomicBool::new(false));
        let watcher = {
            let (engine, done, saw_idle) =
                (Arc::clone(&engine), Arc::clone(&done), Arc::clone(&saw_idle));
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    if engine.state() == PlaybackState::Idle {
                        saw_idle.store(true, Ordering::SeqCst);
                    }
                }
            })
        };

        for round in 2..=4 {
            assert!(backend.finish());
            assert!(wait_for(|| backend.started().len() == round));
        }
        done.store(true, Ordering::SeqCst);
        watcher.join().unwrap();

        assert!(!saw_idle.load(Ordering::SeqCst));
        assert_eq!(engine.current_song(), Some(track("a")));
        // The playing track is never also queued.
        assert!(jukebox.queue_snapshot().is_empty());
    }

    #[test]
    fn skip_advances_exactly_once() {
        let (backend, jukebox) = jukebox(&["a", "b", "c"]);
        jukebox.start();

        jukebox.skip().unwrap();
        assert_eq!(jukebox.engine().current_song(), Some(track("b")));
        assert_eq!(jukebox.queue_snapshot(), vec![track("c")]);
        assert_eq!(backend.started(), paths(&["a", "b"]));
    }

    #[test]
    fn skip_with_loop_requeues_the_skipped_track() {
        let (_, jukebox) = jukebox(&["a", "b"]);
        jukebox.set_loop(true);
        jukebox.start();

        jukebox.skip().unwrap();
        assert_eq!(jukebox.engine().current_song(), Some(track("b")));
        assert_eq!(jukebox.queue_snapshot(), vec![track("a")]);
    }

    #[test]
    fn skip_on_last_track_goes_idle() {
        let (_, jukebox) = jukebox(&["a"]);
        jukebox.start();

        jukebox.skip().unwrap();
        assert_eq!(jukebox.engine().state(), PlaybackState::Idle);
        assert!(matches!(jukebox.skip(), Err(PlayerError::State(_))));
    }

    #[test]
    fn start_hook_sees_each_track() {
        let (backend, jukebox) = jukebox(&["a", "b"]);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        jukebox
            .engine()
            .on_song_start(move |t| sink.lock().push(t.name().to_string()));

        jukebox.start();
        backend.finish();
        assert!(wait_for(|| seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn position_reads_sentinel_between_tracks() {
        let (backend, jukebox) = jukebox(&["a"]);
        let engine = Arc::clone(jukebox.engine());
        assert_eq!(engine.position(), POSITION_SENTINEL);

        jukebox.start();
        backend.finish();
        assert!(wait_for(|| engine.state() == PlaybackState::Idle));
        assert_eq!(engine.position(), POSITION_SENTINEL);
    }

    #[test]
    fn queue_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<_> = ["one.flac", "two.flac"]
            .iter()
            .map(|n| {
                let p = dir.path().join(n);
                std::fs::write(&p, b"").unwrap();
                p
            })
            .collect();

        let (_, jukebox) = jukebox(&[]);
        for f in &files {
            jukebox.enqueue(Track::from_path(f).unwrap());
        }
        let saved = dir.path().join("queue");
        jukebox.save(&saved).unwrap();

        let restored = Queue::restore(&saved).unwrap();
        let names: Vec<_> = restored.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
