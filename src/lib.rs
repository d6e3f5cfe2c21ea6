//! # voiceclone-rs
//!
//! A voice-cloning text-to-speech service: a pre-trained multilingual model is
//! loaded once and exposed through a synthesis pipeline, an HTTP API and a
//! small web UI.
//!
//! ## Features
//!
//! - **Voice cloning**: condition synthesis on an uploaded reference WAV or a
//!   configured default voice
//! - **Load-once model handle**: one process-wide engine instance shared by
//!   all requests, with inference calls serialized
//! - **Request-scoped files**: uploaded references and generated audio live in
//!   temp files that are cleaned up on every exit path
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use voiceclone::engines::worker::{WorkerCommand, WorkerEngine};
//! use voiceclone::model::{Device, ModelHandle};
//! use voiceclone::pipeline::{Pipeline, SynthesisRequest};
//! use voiceclone::speaker::SpeakerResolver;
//!
//! let engine = WorkerEngine::new(WorkerCommand::new("python3").arg("worker/tts_worker.py"));
//! let model = ModelHandle::load(
//!     Box::new(engine),
//!     "tts_models/multilingual/multi-dataset/your_tts",
//!     Device::Cpu,
//! )?;
//!
//! let pipeline = Pipeline::new(Arc::new(model), SpeakerResolver::new(None));
//! let request = SynthesisRequest::builder()
//!     .text("Hello world")
//!     .language("en")
//!     .build()?;
//!
//! let audio = pipeline.synthesize(request)?;
//! println!("{:.2}s of audio at {}", audio.duration_secs(), audio.path().display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod engines;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod speaker;

use std::path::Path;

pub use error::{EngineError, FailureKind, SynthesisFailure};
pub use model::{Device, ModelHandle};
pub use pipeline::{Pipeline, SynthesisRequest, SynthesisResult, SynthesizedAudio};
pub use speaker::{SpeakerReference, SpeakerResolver, SpeakerUpload, UploadPolicy};

/// Mono audio produced by an engine.
#[derive(Debug, Clone)]
pub struct Waveform {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
}

impl Waveform {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), EngineError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Read a WAV file of any sample format, downmixing to mono.
    pub fn read_wav(path: &Path) -> Result<Self, EngineError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for voice-cloning synthesis engines.
///
/// An engine wraps one pre-trained model. It is loaded once and then driven
/// through `&mut self`, so callers sharing an engine must serialize access
/// (see [`ModelHandle`]).
pub trait VoiceCloneEngine: Send {
    /// Load the model identified by `model_name` onto `device`.
    fn load_model(&mut self, model_name: &str, device: Device) -> Result<(), EngineError>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Whether a model is currently loaded.
    fn is_loaded(&self) -> bool;

    /// Language codes the loaded model accepts (e.g. `"en"`, `"fr-fr"`).
    fn supported_languages(&self) -> Vec<String>;

    /// Synthesize speech, optionally cloning the voice in `speaker_wav`.
    fn synthesize(
        &mut self,
        text: &str,
        language: &str,
        speaker_wav: Option<&Path>,
    ) -> Result<Waveform, EngineError>;

    /// Synthesize speech and write it to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `Waveform::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        language: &str,
        speaker_wav: Option<&Path>,
        out_path: &Path,
    ) -> Result<(), EngineError> {
        self.synthesize(text, language, speaker_wav)?
            .write_wav(out_path)
    }
}
