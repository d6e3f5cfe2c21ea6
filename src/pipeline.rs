//! The synthesis request pipeline.
//!
//! `validate -> resolve speaker -> allocate output -> model call -> inspect`.
//! Every request is attempted at most once. Request-scoped files (the
//! persisted upload and the output) are RAII guards: anything not handed back
//! to the caller is deleted when `synthesize` returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use derive_builder::Builder;
use tempfile::TempPath;

use crate::error::SynthesisFailure;
use crate::model::{normalize_language, ModelHandle};
use crate::speaker::{SpeakerResolver, SpeakerUpload};

/// Default upper bound on input text length, in characters.
pub const DEFAULT_MAX_TEXT_CHARS: usize = 5000;

/// One inbound synthesis call.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct SynthesisRequest {
    text: String,
    language: String,
    #[builder(default, setter(strip_option))]
    speaker: Option<SpeakerUpload>,
}

impl SynthesisRequest {
    pub fn builder() -> SynthesisRequestBuilder {
        SynthesisRequestBuilder::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn speaker(&self) -> Option<&SpeakerUpload> {
        self.speaker.as_ref()
    }
}

/// Generated audio. Owns its output file: dropping this value deletes the
/// file unless [`SynthesizedAudio::keep`] was called.
#[derive(Debug)]
pub struct SynthesizedAudio {
    path: TempPath,
    sample_rate: u32,
    num_samples: u32,
    speaker: &'static str,
}

impl SynthesizedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_samples as f64 / self.sample_rate.max(1) as f64
    }

    /// Which speaker reference was used: `"uploaded"`, `"default"` or `"none"`.
    pub fn speaker(&self) -> &'static str {
        self.speaker
    }

    /// Detach the file from this value so it outlives it.
    pub fn keep(self) -> Result<PathBuf, SynthesisFailure> {
        self.path
            .keep()
            .map_err(|e| SynthesisFailure::synthesis(format!("failed to keep output file: {e}")))
    }
}

/// Outcome of one pipeline run.
pub type SynthesisResult = Result<SynthesizedAudio, SynthesisFailure>;

/// Orchestrates speaker resolution, the model call and output handling.
#[derive(Debug, Clone)]
pub struct Pipeline {
    model: Arc<ModelHandle>,
    resolver: SpeakerResolver,
    output_dir: Option<PathBuf>,
    max_text_chars: usize,
}

impl Pipeline {
    pub fn new(model: Arc<ModelHandle>, resolver: SpeakerResolver) -> Self {
        Self {
            model,
            resolver,
            output_dir: None,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    /// Directory for generated audio. Defaults to the system temp dir.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_max_text_chars(mut self, max: usize) -> Self {
        self.max_text_chars = max;
        self
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn resolver(&self) -> &SpeakerResolver {
        &self.resolver
    }

    /// Run one synthesis request to completion.
    ///
    /// Blocks for the duration of the model call; async callers should run it
    /// on a blocking thread.
    pub fn synthesize(&self, request: SynthesisRequest) -> SynthesisResult {
        let start = Instant::now();
        let chars = request.text.chars().count();
        let language = request.language.clone();

        let result = self.run(request);
        match &result {
            Ok(audio) => log::info!(
                "Synthesized {:.2}s of audio ({chars} chars, lang={language}, speaker={}) in {:.2?}",
                audio.duration_secs(),
                audio.speaker(),
                start.elapsed()
            ),
            Err(failure) => log::warn!(
                "Synthesis failed after {:.2?} (lang={language}): {failure}",
                start.elapsed()
            ),
        }
        result
    }

    fn run(&self, request: SynthesisRequest) -> SynthesisResult {
        let SynthesisRequest {
            text,
            language,
            speaker,
        } = request;

        let language = self.validate(&text, &language)?;
        let speaker = self.resolver.resolve(speaker)?;
        let output = self.allocate_output()?;

        self.model
            .synthesize_to_file(&text, &language, speaker.path(), &output)?;

        let (sample_rate, num_samples) = inspect_output(&output)?;
        Ok(SynthesizedAudio {
            path: output,
            sample_rate,
            num_samples,
            speaker: speaker.kind(),
        })
    }

    /// Check text and language; returns the normalized language code.
    fn validate(&self, text: &str, language: &str) -> Result<String, SynthesisFailure> {
        if text.trim().is_empty() {
            return Err(SynthesisFailure::invalid_input("text must not be empty"));
        }
        let chars = text.chars().count();
        if chars > self.max_text_chars {
            return Err(SynthesisFailure::invalid_input(format!(
                "text is {chars} characters long; the limit is {}",
                self.max_text_chars
            )));
        }

        let language = normalize_language(language);
        if language.is_empty() {
            return Err(SynthesisFailure::invalid_input("language is required"));
        }
        if !self.model.supports_language(&language) {
            return Err(SynthesisFailure::invalid_input(format!(
                "unsupported language '{language}' (supported: {})",
                self.model.supported_languages().join(", ")
            )));
        }
        Ok(language)
    }

    fn allocate_output(&self) -> Result<TempPath, SynthesisFailure> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("synth-").suffix(".wav");
        let file = match &self.output_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| SynthesisFailure::synthesis(format!("failed to allocate output file: {e}")))?;
        Ok(file.into_temp_path())
    }
}

/// Read back the model output; an unreadable or empty WAV is a failure.
fn inspect_output(path: &Path) -> Result<(u32, u32), SynthesisFailure> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        SynthesisFailure::synthesis(format!("model output is not a readable WAV file: {e}"))
    })?;
    let frames = reader.duration();
    if frames == 0 {
        return Err(SynthesisFailure::synthesis("model produced empty audio"));
    }
    Ok((reader.spec().sample_rate, frames))
}
