//! rondo data models.
//!
//! Track is the only entity the core owns; the rest are small enums for
//! dispatch and state reporting.

pub mod playback;
pub mod track;

pub use playback::{PlaybackCommand, PlaybackState};
pub use track::Track;
