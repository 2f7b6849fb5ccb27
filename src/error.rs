use std::fmt;

/// Errors surfaced to clients of [`crate::engine::Engine`].
///
/// Covers the full taxonomy a binding layer needs to translate into
/// host-language exceptions: precondition failures, transport-state
/// failures, "should not happen" host failures, and I/O/format failures
/// each get their own variant rather than a single stringly-typed error.
#[derive(Debug)]
pub enum EngineError {
    /// Out-of-range index, non-positive sample rate/frame count, invalid
    /// clip id, invalid sample bounds, negative sample count query.
    Precondition(String),
    /// Operation attempted in the wrong transport state, sample rate
    /// unset, clips exist when changing rate, already/not initialized.
    State(String),
    /// File open/read/write failure.
    Io(std::io::Error),
    /// WAV container invalid or sample-rate mismatch.
    Wav(crate::wav::WavError),
    /// Host audio library failure (device query, format support, stream
    /// open/start/stop/close), carrying its textual error message.
    Host(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Precondition(msg) => write!(f, "{msg}"),
            EngineError::State(msg) => write!(f, "{msg}"),
            EngineError::Io(e) => write!(f, "I/O error: {e}"),
            EngineError::Wav(e) => write!(f, "WAV error: {e}"),
            EngineError::Host(msg) => write!(f, "audio host error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Wav(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<crate::wav::WavError> for EngineError {
    fn from(e: crate::wav::WavError) -> Self {
        EngineError::Wav(e)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
