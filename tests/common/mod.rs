#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voiceclone::{Device, EngineError, ModelHandle, VoiceCloneEngine, Waveform};

pub const SAMPLE_RATE: u32 = 16_000;

/// What the engine saw for one inference call.
#[derive(Debug, Clone)]
pub struct Call {
    pub text: String,
    pub language: String,
    pub speaker: Option<PathBuf>,
    pub speaker_existed: bool,
}

/// Deterministic engine producing a short tone per character of input.
pub struct ToneEngine {
    loaded: bool,
    languages: Vec<String>,
    pub calls: Arc<Mutex<Vec<Call>>>,
    in_flight: Arc<AtomicBool>,
    pub fail_with: Option<String>,
    pub delay: Duration,
}

impl ToneEngine {
    pub fn new() -> Self {
        Self {
            loaded: false,
            languages: ["en", "hi", "fr-fr", "pt-br"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
            fail_with: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Load into a shared handle, returning the call log alongside it.
    pub fn into_handle(self) -> (Arc<ModelHandle>, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::clone(&self.calls);
        let handle = ModelHandle::load(Box::new(self), "tone", Device::Cpu).unwrap();
        (Arc::new(handle), calls)
    }
}

impl VoiceCloneEngine for ToneEngine {
    fn load_model(&mut self, _model_name: &str, _device: Device) -> Result<(), EngineError> {
        self.loaded = true;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.loaded = false;
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn supported_languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    fn synthesize(
        &mut self,
        text: &str,
        language: &str,
        speaker_wav: Option<&Path>,
    ) -> Result<Waveform, EngineError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Inference("concurrent inference".into()));
        }

        self.calls.lock().unwrap().push(Call {
            text: text.to_string(),
            language: language.to_string(),
            speaker: speaker_wav.map(Path::to_path_buf),
            speaker_existed: speaker_wav.map(Path::exists).unwrap_or(false),
        });
        std::thread::sleep(self.delay);

        let result = match &self.fail_with {
            Some(message) => Err(EngineError::Inference(message.clone())),
            None => {
                let len = text.chars().count() * (SAMPLE_RATE as usize / 20);
                let samples = (0..len)
                    .map(|i| (i as f32 / SAMPLE_RATE as f32 * 440.0 * std::f32::consts::TAU).sin() * 0.3)
                    .collect();
                Ok(Waveform {
                    samples,
                    sample_rate: SAMPLE_RATE,
                })
            }
        };

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

/// A mono 16-bit reference recording of `seconds` length, as WAV bytes.
pub fn reference_wav(seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(SAMPLE_RATE as f32 * seconds) as usize {
            let t = i as f32 / SAMPLE_RATE as f32;
            writer
                .write_sample(((t * 180.0 * std::f32::consts::TAU).sin() * 6_000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
