use thiserror::Error;

/// Errors produced while building, sampling, or serializing a melody continuation.
#[derive(Debug, Error)]
pub enum Error {
    /// The transition model has no recorded successors and no scale degrees to fall back on, so
    /// it cannot produce a single note.
    #[error("transition model is empty and has no scale degrees to fall back on")]
    InvalidModel,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("MIDI parse error: {0}")]
    Midi(#[from] midly::Error),
    #[error("unsupported MIDI file: {0}")]
    UnsupportedMidi(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
