//! Engine backed by a persistent model worker process.
//!
//! The pre-trained model lives in a separate process that is started once by
//! [`WorkerEngine::load_model`] and kept alive until the engine is unloaded.
//! Requests and replies are single-line JSON objects on the worker's stdin and
//! stdout; the worker's stderr is passed through to ours.
//!
//! # Protocol
//!
//! ```text
//! -> {"op":"load","model":"tts_models/multilingual/multi-dataset/your_tts","device":"cpu"}
//! <- {"status":"ready","languages":["en","fr-fr","pt-br"]}
//!
//! -> {"op":"synthesize","text":"Hello","language":"en","speaker_wav":"/tmp/ref.wav","out_path":"/tmp/out.wav"}
//! <- {"status":"ok"}
//!
//! -> {"op":"shutdown"}
//! ```
//!
//! Any request may be answered with `{"status":"error","message":"..."}`.
//! Stdout lines that are not JSON objects with a `status` key (progress output
//! from model libraries) are skipped.
//!
//! `worker/tts_worker.py` is a reference worker hosting a Coqui TTS model.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::Device;
use crate::{VoiceCloneEngine, Waveform};

/// How long an unloading worker gets to exit before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Command line used to start the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    Load {
        model: &'a str,
        device: Device,
    },
    Synthesize {
        text: &'a str,
        language: &'a str,
        speaker_wav: Option<&'a Path>,
        out_path: &'a Path,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WorkerReply {
    Ready {
        #[serde(default)]
        languages: Vec<String>,
    },
    Ok,
    Error {
        message: String,
    },
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn start(command: &WorkerCommand) -> std::io::Result<Self> {
        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok(Self {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            }),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(std::io::Error::other("worker stdio was not captured"))
            }
        }
    }

    /// Send one request and wait for its reply.
    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerReply, EngineError> {
        let line = serde_json::to_string(request)
            .map_err(|e| EngineError::Protocol(format!("failed to encode request: {e}")))?;

        writeln!(self.stdin, "{line}")
            .and_then(|_| self.stdin.flush())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::BrokenPipe => EngineError::WorkerExited,
                _ => EngineError::Io(e),
            })?;

        self.read_reply()
    }

    fn read_reply(&mut self) -> Result<WorkerReply, EngineError> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stdout.read_line(&mut buf)? == 0 {
                return Err(EngineError::WorkerExited);
            }

            let line = buf.trim();
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) if value.get("status").is_some() => {
                    return serde_json::from_value(value)
                        .map_err(|e| EngineError::Protocol(format!("bad reply {line:?}: {e}")));
                }
                _ if line.is_empty() => {}
                _ => log::debug!("worker: {line}"),
            }
        }
    }

    /// Ask the worker to exit, killing it if it does not within the grace period.
    fn shutdown(mut self) {
        let _ = self.call_no_reply(&WorkerRequest::Shutdown);
        drop(self.stdin);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("Worker exited with {status}");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => break,
            }
        }

        log::warn!("Worker did not exit within {SHUTDOWN_GRACE:?}, killing it");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn call_no_reply(&mut self, request: &WorkerRequest<'_>) -> std::io::Result<()> {
        let line = serde_json::to_string(request).map_err(std::io::Error::other)?;
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()
    }
}

/// Voice-cloning engine that delegates inference to a worker process.
///
/// # Example
///
/// ```rust,no_run
/// use voiceclone::engines::worker::{WorkerCommand, WorkerEngine};
/// use voiceclone::{Device, VoiceCloneEngine};
/// use std::path::Path;
///
/// let mut engine = WorkerEngine::new(WorkerCommand::new("python3").arg("worker/tts_worker.py"));
/// engine.load_model("tts_models/multilingual/multi-dataset/your_tts", Device::Cpu)?;
/// engine.synthesize_to_file("Hello world", "en", None, Path::new("out.wav"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct WorkerEngine {
    command: WorkerCommand,
    process: Option<WorkerProcess>,
    model_name: Option<String>,
    languages: Vec<String>,
    fallback_languages: Vec<String>,
}

impl WorkerEngine {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            process: None,
            model_name: None,
            languages: Vec::new(),
            fallback_languages: Vec::new(),
        }
    }

    /// Languages to assume when the worker's ready reply lists none.
    pub fn with_fallback_languages(mut self, languages: Vec<String>) -> Self {
        self.fallback_languages = languages;
        self
    }

    fn load_failed(&self, model_name: &str, message: impl Into<String>) -> EngineError {
        EngineError::LoadFailed {
            model: model_name.to_string(),
            message: message.into(),
        }
    }

    /// Forward a call to the running worker; a dead worker is reaped and stays dead.
    fn call(&mut self, request: &WorkerRequest<'_>) -> Result<WorkerReply, EngineError> {
        let process = match self.process.as_mut() {
            Some(process) => process,
            None if self.model_name.is_some() => return Err(EngineError::WorkerExited),
            None => return Err(EngineError::ModelNotLoaded),
        };

        let reply = process.call(request);
        if matches!(reply, Err(EngineError::WorkerExited)) {
            if let Some(mut dead) = self.process.take() {
                let status = dead.child.wait();
                log::error!("Model worker exited: {status:?}");
            }
        }
        reply
    }
}

impl Drop for WorkerEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl VoiceCloneEngine for WorkerEngine {
    fn load_model(&mut self, model_name: &str, device: Device) -> Result<(), EngineError> {
        self.unload_model();

        log::info!(
            "Starting model worker {} {}",
            self.command.program.display(),
            self.command.args.join(" ")
        );
        let mut process = WorkerProcess::start(&self.command).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => self.load_failed(
                model_name,
                format!("worker program '{}' not found", self.command.program.display()),
            ),
            _ => self.load_failed(model_name, format!("failed to start worker: {e}")),
        })?;

        let reply = process.call(&WorkerRequest::Load {
            model: model_name,
            device,
        });
        let languages = match reply {
            Ok(WorkerReply::Ready { languages }) => languages,
            Ok(WorkerReply::Error { message }) => {
                process.shutdown();
                return Err(self.load_failed(model_name, message));
            }
            Ok(WorkerReply::Ok) => {
                process.shutdown();
                return Err(EngineError::Protocol(
                    "expected a ready reply to load".to_string(),
                ));
            }
            Err(EngineError::WorkerExited) => {
                let _ = process.child.wait();
                return Err(self.load_failed(model_name, "worker exited before reporting ready"));
            }
            Err(e) => {
                process.shutdown();
                return Err(e);
            }
        };

        self.languages = if languages.is_empty() {
            log::warn!("Worker reported no languages, using configured fallback");
            self.fallback_languages.clone()
        } else {
            languages
        };
        self.process = Some(process);
        self.model_name = Some(model_name.to_string());
        Ok(())
    }

    fn unload_model(&mut self) {
        if let Some(process) = self.process.take() {
            process.shutdown();
        }
        self.model_name = None;
        self.languages.clear();
    }

    fn is_loaded(&self) -> bool {
        self.process.is_some()
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
        let out = tempfile::Builder::new()
            .prefix("worker-")
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();
        self.synthesize_to_file(text, language, speaker_wav, &out)?;
        Waveform::read_wav(&out)
    }

    fn synthesize_to_file(
        &mut self,
        text: &str,
        language: &str,
        speaker_wav: Option<&Path>,
        out_path: &Path,
    ) -> Result<(), EngineError> {
        let reply = self.call(&WorkerRequest::Synthesize {
            text,
            language,
            speaker_wav,
            out_path,
        })?;

        match reply {
            WorkerReply::Ok => Ok(()),
            WorkerReply::Error { message } => Err(EngineError::Inference(message)),
            WorkerReply::Ready { .. } => Err(EngineError::Protocol(
                "unexpected ready reply to synthesize".to_string(),
            )),
        }
    }
}
