use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = VoiceError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("model file not found: {}", .0.display())]
    MissingModel(PathBuf),
    #[error("timed out: {0}")]
    Timeout(&'static str),
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, VoiceError::Interrupted)
    }
}
