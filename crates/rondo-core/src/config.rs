//! rondo configuration.
//!
//! Everything lives under one root directory: `$RONDO_ROOT` if set, else
//! the platform config dir (`~/.config/rondo` on Linux), else `~/.rondo`.
//!
//! ```text
//! <root>/config.json   settings, all optional
//! <root>/queue         saved queue, one path per line
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, PlayerResult};
use crate::volume;

pub const ROOT_ENV: &str = "RONDO_ROOT";
pub const CONFIG_FILE: &str = "config.json";
pub const QUEUE_FILE: &str = "queue";

const MAX_POLL_MS: u64 = 1000;

pub fn root_dir() -> PathBuf {
    if let Some(root) = std::env::var_os(ROOT_ENV) {
        return PathBuf::from(root);
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("rondo");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".rondo")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process decode and output.
    #[default]
    Local,
    /// An MPD-protocol daemon.
    Daemon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Starting volume, 0-100.
    pub volume: i64,
    pub backend: BackendKind,
    pub daemon_address: String,
    /// The daemon's library root; tracks under it are sent as relative paths.
    pub music_dir: Option<PathBuf>,
    pub loop_on_start: bool,
    pub persist_queue: bool,
    pub queue_file: Option<PathBuf>,
    pub progress_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: 80,
            backend: BackendKind::Local,
            daemon_address: "127.0.0.1:6600".into(),
            music_dir: None,
            loop_on_start: false,
            persist_queue: true,
            queue_file: None,
            progress_interval_ms: 1000,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Load `<root>/config.json`.
    pub fn load() -> PlayerResult<Self> {
        Self::load_from(&root_dir().join(CONFIG_FILE))
    }

    /// Missing file means defaults. A file that does not parse is an error.
    pub fn load_from(path: &Path) -> PlayerResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("rondo: no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(PlayerError::Config(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&text)
            .map_err(|e| PlayerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Starting volume in native units. Out-of-range settings start muted.
    pub fn initial_volume(&self) -> f64 {
        let percent = if (0..=100).contains(&self.volume) {
            self.volume
        } else {
            log::warn!("rondo: volume {} out of range, starting at 0", self.volume);
            0
        };
        volume::percent_to_volume(percent)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.queue_file
            .clone()
            .unwrap_or_else(|| root_dir().join(QUEUE_FILE))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    /// Daemon status poll period, never slower than once a second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, MAX_POLL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn temp_root() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
        let guard = ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = TempDir::new().expect("tempdir");
        std::env::set_var(ROOT_ENV, dir.path());
        (dir, guard)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (_dir, _guard) = temp_root();
        let config = Config::load().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.volume, 80);
        assert!(config.persist_queue);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (dir, _guard) = temp_root();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"backend": "daemon", "daemon_address": "10.0.0.2:6600", "volume": 55}"#,
        )
        .unwrap();

        let config = Config::load().unwrap();
        assert_eq!(config.backend, BackendKind::Daemon);
        assert_eq!(config.daemon_address, "10.0.0.2:6600");
        assert_eq!(config.volume, 55);
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let (dir, _guard) = temp_root();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ volume: ").unwrap();
        assert!(matches!(Config::load(), Err(PlayerError::Config(_))));
    }

    #[test]
    fn queue_path_defaults_under_root() {
        let (dir, _guard) = temp_root();
        let config = Config::default();
        assert_eq!(config.queue_path(), dir.path().join(QUEUE_FILE));

        let custom = Config {
            queue_file: Some("/tmp/q".into()),
            ..Config::default()
        };
        assert_eq!(custom.queue_path(), PathBuf::from("/tmp/q"));
    }

    #[test]
    fn out_of_range_volume_starts_muted() {
        let loud = Config {
            volume: 140,
            ..Config::default()
        };
        assert_eq!(loud.initial_volume(), volume::MIN_VOLUME);
        assert_eq!(Config::default().initial_volume(), -2.0);
    }

    #[test]
    fn poll_interval_is_capped() {
        let slow = Config {
            poll_interval_ms: 5000,
            ..Config::default()
        };
        assert_eq!(slow.poll_interval(), Duration::from_secs(1));
    }
}
