//! Output backends.
//!
//! The engine drives one of these per process. Both implementations share
//! the same transport contract and no state:
//!
//! - `audio::LocalBackend`: symphonia decode + cpal output, in process.
//! - `daemon::DaemonBackend`: an MPD-protocol daemon over TCP.

use std::time::Duration;

use crate::error::PlayerResult;
use crate::models::Track;

/// Continuation fired once when a stream runs out naturally.
///
/// Backends call it from their own decode/poll thread after the stream has
/// been released, never from a render callback. `close()` guarantees it is
/// not called for the closed stream.
pub type EndOfStream = Box<dyn FnOnce() + Send + 'static>;

/// What a backend learned about a stream when it started.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamInfo {
    pub length: Option<Duration>,
}

/// Trait for audio output backends.
///
/// All methods take `&self`; backends manage their own concurrency. At most
/// one stream is active at a time: `start` replaces whatever was playing.
pub trait AudioBackend: Send + Sync {
    /// Open and start `track` at `volume` (native units).
    fn start(&self, track: &Track, volume: f64, on_end: EndOfStream) -> PlayerResult<StreamInfo>;
    fn pause(&self) -> PlayerResult<()>;
    fn resume(&self) -> PlayerResult<()>;
    /// Force-close the active stream. Blocks until it is released.
    fn close(&self) -> PlayerResult<()>;
    /// Reposition the decode cursor to an absolute offset.
    fn seek(&self, position: Duration) -> PlayerResult<()>;
    fn set_volume(&self, volume: f64) -> PlayerResult<()>;
    /// Elapsed time of the active stream, `None` when nothing is active.
    fn position(&self) -> Option<Duration>;
    fn length(&self) -> Option<Duration>;
}

#[cfg(feature = "native")]
pub mod audio;
pub mod daemon;
pub(crate) mod resample;
#[cfg(test)]
pub(crate) mod scripted;
