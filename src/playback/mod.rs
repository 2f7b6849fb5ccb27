//! Playback arrangement building and mixing.

pub mod arrangement;
pub mod mixer;

pub use arrangement::{EventKind, PlaybackArrangement, PlaybackClip, PlaybackEvent};
