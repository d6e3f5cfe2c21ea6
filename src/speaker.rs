//! Speaker reference resolution.
//!
//! Each request resolves at most one reference recording for voice cloning:
//! an uploaded file wins over the configured default voice, and with neither
//! the model falls back to its built-in voice.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::error::SynthesisFailure;

/// Reference audio as received from a front end.
#[derive(Debug, Clone)]
pub enum SpeakerUpload {
    /// Raw uploaded bytes; persisted to a request-scoped temp file.
    Bytes(Vec<u8>),
    /// A file already on disk; read in place and never deleted.
    Path(PathBuf),
}

impl SpeakerUpload {
    /// An upload with no content counts as "no upload".
    fn is_empty(&self) -> bool {
        match self {
            SpeakerUpload::Bytes(bytes) => bytes.is_empty(),
            SpeakerUpload::Path(path) => {
                path.as_os_str().is_empty()
                    || fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false)
            }
        }
    }
}

/// What to do when an uploaded reference cannot be read or persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadPolicy {
    /// Fail the request with `SpeakerFileError`.
    #[default]
    Strict,
    /// Log a warning and continue as if nothing was uploaded.
    Lenient,
}

/// An uploaded reference file. Temp files created from raw bytes are deleted
/// when this value is dropped.
#[derive(Debug)]
pub struct UploadedFile {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl UploadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this reference owns (and will delete) its file.
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// The effective speaker reference for one request.
#[derive(Debug)]
pub enum SpeakerReference {
    None,
    UploadedFile(UploadedFile),
    DefaultVoice(PathBuf),
}

impl SpeakerReference {
    /// Path handed to the model, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SpeakerReference::None => None,
            SpeakerReference::UploadedFile(file) => Some(file.path()),
            SpeakerReference::DefaultVoice(path) => Some(path),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SpeakerReference::None => "none",
            SpeakerReference::UploadedFile(_) => "uploaded",
            SpeakerReference::DefaultVoice(_) => "default",
        }
    }
}

/// Resolves uploads and the configured default voice into a [`SpeakerReference`].
#[derive(Debug, Clone)]
pub struct SpeakerResolver {
    default_voice: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    policy: UploadPolicy,
}

impl SpeakerResolver {
    /// Create a resolver with an optional default voice recording.
    ///
    /// A configured default voice that does not exist is logged once here;
    /// resolution then silently skips it until the file appears.
    pub fn new(default_voice: Option<PathBuf>) -> Self {
        if let Some(path) = &default_voice {
            if path.is_file() {
                log::info!("Default speaker voice: {}", path.display());
            } else {
                log::warn!(
                    "Default speaker voice {} not found; requests without an upload use the model's built-in voice",
                    path.display()
                );
            }
        }

        Self {
            default_voice,
            scratch_dir: None,
            policy: UploadPolicy::default(),
        }
    }

    /// Directory for persisted uploads. Defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_voice(&self) -> Option<&Path> {
        self.default_voice.as_deref()
    }

    pub fn policy(&self) -> UploadPolicy {
        self.policy
    }

    /// Pick the speaker reference for one request.
    ///
    /// Priority: non-empty upload, then an existing default voice, then none.
    /// Upload failures follow the configured [`UploadPolicy`].
    pub fn resolve(
        &self,
        uploaded: Option<SpeakerUpload>,
    ) -> Result<SpeakerReference, SynthesisFailure> {
        if let Some(upload) = uploaded.filter(|u| !u.is_empty()) {
            match self.persist(upload) {
                Ok(file) => return Ok(SpeakerReference::UploadedFile(file)),
                Err(failure) => match self.policy {
                    UploadPolicy::Strict => return Err(failure),
                    UploadPolicy::Lenient => {
                        log::warn!("Ignoring unusable speaker upload: {}", failure.message);
                    }
                },
            }
        }

        Ok(self.fallback())
    }

    fn fallback(&self) -> SpeakerReference {
        match &self.default_voice {
            Some(path) if path.is_file() => SpeakerReference::DefaultVoice(path.clone()),
            _ => SpeakerReference::None,
        }
    }

    fn persist(&self, upload: SpeakerUpload) -> Result<UploadedFile, SynthesisFailure> {
        match upload {
            SpeakerUpload::Path(path) => {
                validate_wav(&path)?;
                Ok(UploadedFile { path, temp: None })
            }
            SpeakerUpload::Bytes(bytes) => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("speaker-").suffix(".wav");
                let mut file = match &self.scratch_dir {
                    Some(dir) => builder.tempfile_in(dir),
                    None => builder.tempfile(),
                }
                .map_err(|e| {
                    SynthesisFailure::speaker_file(format!("failed to create speaker temp file: {e}"))
                })?;

                file.write_all(&bytes)
                    .and_then(|_| file.flush())
                    .map_err(|e| {
                        SynthesisFailure::speaker_file(format!("failed to write speaker file: {e}"))
                    })?;

                let temp = file.into_temp_path();
                validate_wav(&temp)?;
                log::debug!("Persisted {} byte speaker upload to {}", bytes.len(), temp.display());

                Ok(UploadedFile {
                    path: temp.to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }
}

/// Check that `path` is a WAV file with at least one sample.
fn validate_wav(path: &Path) -> Result<(), SynthesisFailure> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        SynthesisFailure::speaker_file(format!("speaker reference is not a readable WAV file: {e}"))
    })?;
    if reader.duration() == 0 {
        return Err(SynthesisFailure::speaker_file(
            "speaker reference contains no audio",
        ));
    }
    Ok(())
}
