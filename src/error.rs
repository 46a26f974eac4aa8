//! Error types for loading and configuring the rig.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading an amp model. The previously active model is never
/// affected by one of these.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("staging queue is full, try again")]
    QueueFull,
}

/// Failures while loading an impulse response.
#[derive(Error, Debug)]
pub enum IrLoadError {
    #[error("impulse response not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid impulse response: {0}")]
    InvalidFormat(String),

    #[error("impulse response load failed: {0}")]
    Other(String),
}

/// Channel or block layouts the pipeline refuses to run with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("output must be stereo, got {0} channels")]
    OutputChannels(usize),

    #[error("at least one input channel is required")]
    NoInputChannels,

    #[error("channel {channel} has {actual} frames, expected {expected}")]
    FrameMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },
}

impl From<hound::Error> for IrLoadError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => IrLoadError::Other(e.to_string()),
            hound::Error::FormatError(msg) => IrLoadError::InvalidFormat(msg.to_string()),
            hound::Error::Unsupported => {
                IrLoadError::InvalidFormat("unsupported WAV encoding".to_string())
            }
            other => IrLoadError::InvalidFormat(other.to_string()),
        }
    }
}

impl From<crate::dsp::OfflineResampleError> for IrLoadError {
    fn from(err: crate::dsp::OfflineResampleError) -> Self {
        IrLoadError::Other(err.to_string())
    }
}
