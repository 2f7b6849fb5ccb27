//! `recorder-engine`: an audio recording and multi-track playback engine.
//!
//! [`Engine`] is the single entry point — initialize it, configure a
//! sample rate, load or record clips, build a playback arrangement out of
//! them, and drive the transport directly against `cpal`.

pub mod clip;
pub mod device;
pub mod engine;
pub mod error;
pub mod playback;
pub mod recording;
pub mod wav;

pub use clip::{Clip, ClipId};
pub use engine::{Engine, TransportMode};
pub use error::{EngineError, EngineResult};
