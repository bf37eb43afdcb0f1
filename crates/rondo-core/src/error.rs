//! Error taxonomy for the playback core.
//!
//! None of these terminate the process. Callers decide: an `Io` error
//! skips the track, a `State` error is logged and ignored, `EmptyQueue`
//! means "go idle", and `Connection` is what a daemon call surfaces after
//! its one reconnect-and-retry.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// File could not be opened or decoded.
    #[error("cannot play {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    /// Operation is not valid in the engine's current state.
    #[error("invalid state: {0}")]
    State(&'static str),

    #[error("queue is empty")]
    EmptyQueue,

    /// Media daemon unreachable after reconnect + one retry.
    #[error("daemon connection failed: {0}")]
    Connection(String),

    /// Output device could not be initialized.
    #[error("output device: {0}")]
    Device(String),

    #[error("config: {0}")]
    Config(String),
}

impl PlayerError {
    pub(crate) fn io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PlayerError::Io {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

/// Log errors from non-critical operations without propagating them.
pub(crate) fn log_err<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("rondo: {} failed: {}", context, e);
            false
        }
    }
}
