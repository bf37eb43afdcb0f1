//! Progress reporter: polls the engine position on a timer.
//!
//! One ticker thread per track. `start` replaces any previous ticker, so a
//! finished track never leaves a timer behind. The ticker skips ticks while
//! paused and exits on its own once the engine is neither running nor
//! paused.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::engine::PlaybackEngine;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Elapsed and total time of the current track.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub elapsed: Duration,
    pub total: Duration,
}

impl Progress {
    /// `[=====     ] 1:05 / 3:30`, with `width` cells between the brackets.
    pub fn render(&self, width: usize) -> String {
        let filled = if self.total.is_zero() {
            0
        } else {
            let ratio = self.elapsed.as_secs_f64() / self.total.as_secs_f64();
            ((ratio * width as f64) as usize).min(width)
        };
        format!(
            "[{}{}] {} / {}",
            "=".repeat(filled),
            " ".repeat(width - filled),
            format_time(self.elapsed),
            format_time(self.total),
        )
    }
}

/// `m:ss`
pub fn format_time(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

struct Ticker {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct ProgressReporter {
    interval: Duration,
    progress: Arc<Mutex<Progress>>,
    ticker: Mutex<Option<Ticker>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            progress: Arc::new(Mutex::new(Progress::default())),
            ticker: Mutex::new(None),
        }
    }

    /// Reset to zero and start ticking for the engine's current track.
    /// `sink` receives the progress after every tick.
    pub fn start(&self, engine: &Arc<PlaybackEngine>, sink: impl Fn(Progress) + Send + 'static) {
        self.stop();

        *self.progress.lock() = Progress {
            elapsed: Duration::ZERO,
            total: engine.length(),
        };

        let (cancel, rx) = mpsc::channel::<()>();
        let engine = Arc::downgrade(engine);
        let progress = Arc::clone(&self.progress);
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("rondo-progress".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                match tick(&engine, &progress) {
                    Tick::Report(p) => sink(p),
                    Tick::Skip => {}
                    Tick::Done => return,
                }
            });

        match thread {
            Ok(thread) => *self.ticker.lock() = Some(Ticker { cancel, thread }),
            Err(e) => log::warn!("rondo: progress ticker not started: {}", e),
        }
    }

    /// Cancel the ticker, if any.
    pub fn stop(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            let _ = ticker.cancel.send(());
            if ticker.thread.thread().id() != thread::current().id() {
                let _ = ticker.thread.join();
            }
        }
    }

    /// Whether a ticker thread is still alive.
    pub fn is_active(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .map_or(false, |t| !t.thread.is_finished())
    }

    /// Shift the cached elapsed time by the same delta a seek applied, so
    /// the display moves before the next tick.
    pub fn seek_by(&self, delta_secs: i64) {
        let mut progress = self.progress.lock();
        let elapsed = progress.elapsed.as_secs_f64() + delta_secs as f64;
        let mut elapsed = Duration::from_secs_f64(elapsed.max(0.0));
        if !progress.total.is_zero() {
            elapsed = elapsed.min(progress.total);
        }
        progress.elapsed = elapsed;
    }

    pub fn progress(&self) -> Progress {
        *self.progress.lock()
    }

    pub fn render(&self, width: usize) -> String {
        self.progress().render(width)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Tick {
    Report(Progress),
    Skip,
    Done,
}

fn tick(engine: &Weak<PlaybackEngine>, progress: &Mutex<Progress>) -> Tick {
    let Some(engine) = engine.upgrade() else {
        return Tick::Done;
    };
    if engine.is_paused() {
        return Tick::Skip;
    }
    if !engine.is_running() {
        return Tick::Done;
    }

    let mut progress = progress.lock();
    progress.elapsed = engine.position();
    let total = engine.length();
    if !total.is_zero() {
        progress.total = total;
    }
    Tick::Report(*progress)
}
