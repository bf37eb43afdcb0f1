//! In-memory backend for engine tests. Records every call and hands the
//! end-of-stream continuation back to the test, which fires it with
//! `finish()` to simulate a natural end.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioBackend, EndOfStream, StreamInfo};
use crate::error::{PlayerError, PlayerResult};
use crate::models::Track;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start(PathBuf, f64),
    Pause,
    Resume,
    Close,
    Seek(Duration),
    SetVolume(f64),
}

#[derive(Default)]
pub struct ScriptedBackend {
    calls: Mutex<Vec<Call>>,
    on_end: Mutex<Option<EndOfStream>>,
    active: Mutex<Option<Stream>>,
    broken: Mutex<HashSet<PathBuf>>,
    pause_gate: Mutex<Option<Receiver<()>>>,
    length: Option<Duration>,
}

struct Stream {
    position: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_length(length: Duration) -> Self {
        Self {
            length: Some(length),
            ..Self::default()
        }
    }

    /// Make `start` fail with an `Io` error for this path.
    pub fn break_path(&self, path: impl Into<PathBuf>) {
        self.broken.lock().insert(path.into());
    }

    /// Make the next `pause` block until the returned sender fires.
    pub fn hold_pause(&self) -> Sender<()> {
        let (tx, rx) = mpsc::channel();
        *self.pause_gate.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Paths passed to `start`, in order.
    pub fn started(&self) -> Vec<PathBuf> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Start(path, _) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// End the active stream as if it ran out. Returns false when there
    /// was nothing to finish.
    pub fn finish(&self) -> bool {
        let on_end = self.on_end.lock().take();
        match on_end {
            Some(on_end) => {
                *self.active.lock() = None;
                on_end();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl AudioBackend for ScriptedBackend {
    fn start(&self, track: &Track, volume: f64, on_end: EndOfStream) -> PlayerResult<StreamInfo> {
        self.calls
            .lock()
            .push(Call::Start(track.path().to_path_buf(), volume));
        // A new stream replaces the old one without firing its continuation.
        self.on_end.lock().take();
        *self.active.lock() = None;

        if self.broken.lock().contains(track.path()) {
            return Err(PlayerError::io(track.path(), "scripted failure"));
        }
        *self.on_end.lock() = Some(on_end);
        *self.active.lock() = Some(Stream {
            position: Duration::ZERO,
        });
        Ok(StreamInfo {
            length: self.length,
        })
    }

    fn pause(&self) -> PlayerResult<()> {
        self.calls.lock().push(Call::Pause);
        let gate = self.pause_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        Ok(())
    }

    fn resume(&self) -> PlayerResult<()> {
        self.calls.lock().push(Call::Resume);
        Ok(())
    }

    fn close(&self) -> PlayerResult<()> {
        self.calls.lock().push(Call::Close);
        self.on_end.lock().take();
        *self.active.lock() = None;
        Ok(())
    }

    fn seek(&self, position: Duration) -> PlayerResult<()> {
        self.calls.lock().push(Call::Seek(position));
        if let Some(stream) = self.active.lock().as_mut() {
            stream.position = position;
        }
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> PlayerResult<()> {
        self.calls.lock().push(Call::SetVolume(volume));
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        self.active.lock().as_ref().map(|s| s.position)
    }

    fn length(&self) -> Option<Duration> {
        self.active.lock().as_ref().and(self.length)
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
