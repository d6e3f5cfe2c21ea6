//! The process-wide model handle.
//!
//! A [`ModelHandle`] owns the one loaded [`VoiceCloneEngine`] and is shared by
//! every request. Engines are driven through `&mut self`, so the handle keeps
//! the engine behind a mutex that is held only for the duration of a single
//! inference call; validation, speaker resolution and file handling run
//! outside the lock.
//!
//! The global instance moves through `Uninitialized -> Loading -> Ready` exactly
//! once. A load failure is reported to the caller (the server aborts startup)
//! and the state returns to `Uninitialized`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::VoiceCloneEngine;

/// Compute device the model is loaded onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu => f.write_str("gpu"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            _ => Err(format!("unknown device: {s}")),
        }
    }
}

/// Lifecycle of the global model handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Uninitialized,
    Loading,
    Ready,
}

const STATE_UNINITIALIZED: u8 = 0;
const STATE_LOADING: u8 = 1;
const STATE_READY: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(STATE_UNINITIALIZED);
static GLOBAL: OnceLock<Arc<ModelHandle>> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("model handle is already initialized or loading")]
    AlreadyInitialized,
    #[error(transparent)]
    Load(#[from] EngineError),
}

/// Loaded, ready-to-use voice-cloning model shared across requests.
pub struct ModelHandle {
    engine: Mutex<Box<dyn VoiceCloneEngine>>,
    model_name: String,
    device: Device,
    languages: Vec<String>,
}

impl ModelHandle {
    /// Load `model_name` into `engine` synchronously and wrap it in a handle.
    pub fn load(
        mut engine: Box<dyn VoiceCloneEngine>,
        model_name: &str,
        device: Device,
    ) -> Result<Self, EngineError> {
        log::info!("Loading model '{model_name}' on {device}");
        let start = Instant::now();

        engine.load_model(model_name, device)?;
        if !engine.is_loaded() {
            return Err(EngineError::LoadFailed {
                model: model_name.to_string(),
                message: "engine reported not loaded after load_model()".to_string(),
            });
        }

        let mut languages: Vec<String> = engine
            .supported_languages()
            .iter()
            .map(|l| normalize_language(l))
            .filter(|l| !l.is_empty())
            .collect();
        languages.sort_unstable();
        languages.dedup();

        log::info!(
            "Model '{model_name}' ready in {:.2?} ({} languages: {})",
            start.elapsed(),
            languages.len(),
            languages.join(", ")
        );

        Ok(Self {
            engine: Mutex::new(engine),
            model_name: model_name.to_string(),
            device,
            languages,
        })
    }

    /// Narrow the accepted languages to those in `allowed`.
    ///
    /// Codes the model does not support are dropped with a warning. Fails if
    /// none of `allowed` is supported, since every request would be rejected.
    pub fn restrict_languages(mut self, allowed: &[String]) -> Result<Self, EngineError> {
        let allowed: Vec<String> = allowed.iter().map(|l| normalize_language(l)).collect();
        for code in &allowed {
            if !self.languages.contains(code) {
                log::warn!("Configured language '{code}' is not supported by the model, ignoring");
            }
        }
        self.languages.retain(|l| allowed.contains(l));
        if self.languages.is_empty() {
            return Err(EngineError::LoadFailed {
                model: self.model_name.clone(),
                message: format!(
                    "none of the configured languages [{}] is supported by the model",
                    allowed.join(", ")
                ),
            });
        }
        Ok(self)
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Sorted, lower-cased language codes accepted by this handle.
    pub fn supported_languages(&self) -> &[String] {
        &self.languages
    }

    pub fn supports_language(&self, code: &str) -> bool {
        let code = normalize_language(code);
        self.languages.iter().any(|l| *l == code)
    }

    /// Run one inference call, writing WAV audio to `out_path`.
    ///
    /// The engine lock is held only for this call. A panic inside the engine
    /// is turned into an [`EngineError::Inference`] so the handle stays usable.
    pub fn synthesize_to_file(
        &self,
        text: &str,
        language: &str,
        speaker_wav: Option<&Path>,
        out_path: &Path,
    ) -> Result<(), EngineError> {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.synthesize_to_file(text, language, speaker_wav, out_path)
        }));

        match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "engine panicked".to_string());
                log::error!("Engine panicked during synthesis: {message}");
                Err(EngineError::Inference(message))
            }
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_name", &self.model_name)
            .field("device", &self.device)
            .field("languages", &self.languages)
            .finish_non_exhaustive()
    }
}

/// Lower-case and trim a language code for comparison.
pub fn normalize_language(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Current state of the global model handle.
pub fn state() -> ModelState {
    match STATE.load(Ordering::Acquire) {
        STATE_LOADING => ModelState::Loading,
        STATE_READY => ModelState::Ready,
        _ => ModelState::Uninitialized,
    }
}

/// The global model handle, if it has been initialized.
pub fn global() -> Option<Arc<ModelHandle>> {
    GLOBAL.get().cloned()
}

/// Initialize the global model handle exactly once.
///
/// `load` runs synchronously on the calling thread. Any second call, including
/// one racing a load in progress, fails with [`InitError::AlreadyInitialized`].
pub fn init_global<F>(load: F) -> Result<Arc<ModelHandle>, InitError>
where
    F: FnOnce() -> Result<ModelHandle, EngineError>,
{
    STATE
        .compare_exchange(
            STATE_UNINITIALIZED,
            STATE_LOADING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| InitError::AlreadyInitialized)?;

    let handle = match load() {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            STATE.store(STATE_UNINITIALIZED, Ordering::Release);
            return Err(e.into());
        }
    };

    GLOBAL
        .set(Arc::clone(&handle))
        .map_err(|_| InitError::AlreadyInitialized)?;
    STATE.store(STATE_READY, Ordering::Release);
    Ok(handle)
}
