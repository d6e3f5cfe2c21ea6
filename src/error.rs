//! Error types for engines and synthesis requests.

use std::fmt;

/// Errors raised by a [`VoiceCloneEngine`](crate::VoiceCloneEngine).
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Failed to load model '{model}': {message}")]
    LoadFailed { model: String, message: String },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Worker protocol error: {0}")]
    Protocol(String),
    #[error("Worker process exited unexpectedly")]
    WorkerExited,
}

/// Category of a failed synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Empty text or unsupported language; detected before the model runs.
    InvalidInput,
    /// The uploaded reference audio could not be read or persisted.
    SpeakerFileError,
    /// The model invocation failed or produced no audio.
    SynthesisError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidInput => "invalid input",
            FailureKind::SpeakerFileError => "speaker file error",
            FailureKind::SynthesisError => "synthesis error",
        };
        f.write_str(name)
    }
}

/// A typed synthesis failure handed back to front-end adapters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SynthesisFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SynthesisFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn speaker_file(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SpeakerFileError, message)
    }

    pub fn synthesis(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SynthesisError, message)
    }
}

impl From<EngineError> for SynthesisFailure {
    fn from(err: EngineError) -> Self {
        Self::synthesis(err.to_string())
    }
}
