use crate::audio::{AudioCaptureError, AudioError};
use crate::config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoachError>;

#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Audio capture error: {0}")]
    Capture(#[from] AudioCaptureError),

    #[error("Audio playback error: {0}")]
    Playback(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
