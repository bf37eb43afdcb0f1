//! Track: a playable item identified by its path.
//!
//! Display names come from the title tag when the file has one, else the
//! file stem. Identity is the path alone: two tracks with the same path and
//! different names are the same track.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use lofty::prelude::*;
use lofty::probe::Probe;

use crate::error::{PlayerError, PlayerResult};

/// Extensions `from_path` accepts.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "aac", "ogg", "wav", "opus", "aiff", "alac",
];

#[derive(Debug, Clone)]
pub struct Track {
    path: PathBuf,
    name: String,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Resolve `path` to an absolute audio file and read its display name.
    pub fn from_path(path: impl AsRef<Path>) -> PlayerResult<Self> {
        let path = path.as_ref();
        let abs = std::fs::canonicalize(path).map_err(|e| PlayerError::io(path, e))?;
        if !abs.is_file() {
            return Err(PlayerError::io(abs, "not a regular file"));
        }
        let mut track = Self::new(abs, String::new());
        if !track.is_audio() {
            return Err(PlayerError::io(track.path, "not an audio file"));
        }
        track.name = display_name(&track.path);
        Ok(track)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercased file extension, used as the decoder probe hint.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    pub fn is_audio(&self) -> bool {
        self.extension()
            .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn display_name(path: &Path) -> String {
    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string();

    let tagged = match Probe::open(path).and_then(|p| p.read()) {
        Ok(t) => t,
        Err(_) => return fallback,
    };

    tagged
        .primary_tag()
        .or_else(|| tagged.first_tag())
        .and_then(|t| t.title().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}
