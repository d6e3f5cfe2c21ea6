//! HTTP front ends for the synthesis pipeline.
//!
//! Two adapters share one [`AppState`]:
//! - the JSON/binary API under `/api` (`language` is required)
//! - the web UI at `/` and `/ui/synthesize` (`language` defaults from config)
//!
//! Pipeline runs are blocking and move onto tokio's blocking pool. The
//! generated file is read into the response body and then dropped, which
//! deletes it.

pub mod api;
pub mod ui;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::multipart::Multipart;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::signal;
use tokio::sync::{watch, Semaphore};

use crate::config::{AppConfig, UiConfig};
use crate::error::{FailureKind, SynthesisFailure};
use crate::pipeline::{Pipeline, SynthesisRequest, SynthesizedAudio};
use crate::speaker::SpeakerUpload;

/// Shared state for all handlers.
pub struct AppState {
    pipeline: Pipeline,
    ui: UiConfig,
    limiter: Option<Arc<Semaphore>>,
    start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: Pipeline, ui: UiConfig, max_concurrent_requests: Option<usize>) -> Self {
        if !pipeline.model().supports_language(&ui.default_language) {
            log::warn!(
                "UI default language '{}' is not supported by the model",
                ui.default_language
            );
        }
        Self {
            pipeline,
            ui,
            limiter: max_concurrent_requests.map(|n| Arc::new(Semaphore::new(n))),
            start_time: Instant::now(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

/// A failed request, with the status code and message shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub message: String,
}

impl Rejection {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SynthesisFailure> for Rejection {
    fn from(failure: SynthesisFailure) -> Self {
        let status = match failure.kind {
            FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
            FailureKind::SpeakerFileError => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::SynthesisError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: failure.message,
        }
    }
}

/// Fields of a synthesis form, shared by both adapters.
#[derive(Debug, Default)]
struct SynthesisForm {
    text: Option<String>,
    language: Option<String>,
    speaker_file: Option<Vec<u8>>,
}

impl SynthesisForm {
    async fn read(mut multipart: Multipart) -> Result<Self, Rejection> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_rejection)? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "text" => form.text = Some(field.text().await.map_err(multipart_rejection)?),
                "language" => {
                    let value = field.text().await.map_err(multipart_rejection)?;
                    form.language = Some(value).filter(|v| !v.trim().is_empty());
                }
                "speaker_file" => {
                    let bytes = field.bytes().await.map_err(multipart_rejection)?;
                    form.speaker_file = Some(bytes.to_vec()).filter(|b| !b.is_empty());
                }
                other => log::debug!("Ignoring unknown form field '{other}'"),
            }
        }

        Ok(form)
    }

    fn into_request(self, language: String) -> Result<SynthesisRequest, Rejection> {
        let mut builder = SynthesisRequest::builder();
        builder
            .text(self.text.unwrap_or_default())
            .language(language);
        if let Some(bytes) = self.speaker_file {
            builder.speaker(SpeakerUpload::Bytes(bytes));
        }
        builder
            .build()
            .map_err(|e| Rejection::internal(format!("failed to build request: {e}")))
    }
}

fn multipart_rejection(err: axum::extract::multipart::MultipartError) -> Rejection {
    Rejection {
        status: err.status(),
        message: format!("invalid multipart form: {}", err.body_text()),
    }
}

/// Run the pipeline on the blocking pool, honoring the concurrency limit.
///
/// The permit moves into the blocking task, so a request whose client went
/// away still counts against the limit until its synthesis finishes.
async fn run_pipeline(
    state: &Arc<AppState>,
    request: SynthesisRequest,
) -> Result<SynthesizedAudio, Rejection> {
    let permit = match &state.limiter {
        Some(limiter) => Some(
            Arc::clone(limiter)
                .acquire_owned()
                .await
                .map_err(|e| Rejection::internal(format!("request limiter closed: {e}")))?,
        ),
        None => None,
    };

    let worker_state = Arc::clone(state);
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        worker_state.pipeline.synthesize(request)
    })
    .await
        .map_err(|e| Rejection::internal(format!("synthesis task failed: {e}")))?;

    Ok(result?)
}

/// Read the generated file into a `audio/wav` response, then delete it.
async fn audio_response(audio: SynthesizedAudio) -> Result<Response, Rejection> {
    let bytes = tokio::fs::read(audio.path())
        .await
        .map_err(|e| Rejection::internal(format!("failed to read generated audio: {e}")))?;
    let duration = format!("{:.3}", audio.duration_secs());
    let speaker = audio.speaker();
    drop(audio);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "inline; filename=\"speech.wav\"".to_string(),
            ),
            (header::HeaderName::from_static("x-audio-duration"), duration),
            (
                header::HeaderName::from_static("x-speaker-reference"),
                speaker.to_string(),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    device: String,
    uptime_secs: u64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let model = state.pipeline.model();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model: model.model_name().to_string(),
        device: model.device().to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Build the router for both front ends.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(ui::index))
        .route("/ui/synthesize", post(ui::synthesize))
        .route("/api/synthesize", post(api::synthesize))
        .route("/api/languages", get(api::languages))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// The voice-cloning HTTP server.
pub struct VoiceCloneServer {
    bind: SocketAddr,
    max_upload_bytes: usize,
    shutdown_timeout: Duration,
    state: Arc<AppState>,
}

impl VoiceCloneServer {
    pub fn new(config: &AppConfig, pipeline: Pipeline) -> Self {
        let state = AppState::new(
            pipeline,
            config.ui.clone(),
            config.server.max_concurrent_requests,
        );
        Self {
            bind: config.server.bind,
            max_upload_bytes: config.server.max_upload_bytes,
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_secs),
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state), self.max_upload_bytes)
    }

    /// Serve until SIGINT/SIGTERM, then drain in-flight requests.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        log::info!("Listening on http://{}", listener.local_addr()?);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let app = self.router();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        shutdown_signal().await;
        log::info!("Shutdown signal received, draining requests...");
        let _ = shutdown_tx.send(true);

        tokio::select! {
            _ = tokio::time::sleep(self.shutdown_timeout) => {
                log::warn!("Shutdown timeout after {:?}, forcing exit", self.shutdown_timeout);
                Ok(())
            }
            joined = server => match joined {
                Ok(result) => result,
                Err(e) => Err(std::io::Error::other(e)),
            },
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::model::{Device, ModelHandle};
    use crate::speaker::SpeakerResolver;
    use crate::{EngineError, VoiceCloneEngine, Waveform};

    struct SlowEngine {
        delay: Duration,
    }

    impl VoiceCloneEngine for SlowEngine {
        fn load_model(&mut self, _model_name: &str, _device: Device) -> Result<(), EngineError> {
            Ok(())
        }

        fn unload_model(&mut self) {}

        fn is_loaded(&self) -> bool {
            true
        }

        fn supported_languages(&self) -> Vec<String> {
            vec!["en".to_string()]
        }

        fn synthesize(
            &mut self,
            _text: &str,
            _language: &str,
            _speaker_wav: Option<&Path>,
        ) -> Result<Waveform, EngineError> {
            std::thread::sleep(self.delay);
            Ok(Waveform {
                samples: vec![0.1; 1600],
                sample_rate: 16_000,
            })
        }
    }

    fn slow_state(output_dir: &Path, delay: Duration) -> Arc<AppState> {
        let model = ModelHandle::load(Box::new(SlowEngine { delay }), "slow", Device::Cpu).unwrap();
        let pipeline = Pipeline::new(Arc::new(model), SpeakerResolver::new(None))
            .with_output_dir(output_dir);
        Arc::new(AppState::new(pipeline, UiConfig::default(), Some(1)))
    }

    #[tokio::test]
    async fn abandoned_request_holds_its_permit_until_synthesis_ends() {
        let dir = tempfile::tempdir().unwrap();
        let state = slow_state(dir.path(), Duration::from_millis(300));
        let limiter = Arc::clone(state.limiter.as_ref().unwrap());
        let request = SynthesisRequest::builder()
            .text("Hello")
            .language("en")
            .build()
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), run_pipeline(&state, request)).await;
        assert!(abandoned.is_err());
        assert_eq!(limiter.available_permits(), 0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while limiter.available_permits() == 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(limiter.available_permits(), 1);
    }

    #[test]
    fn failure_kinds_map_to_status_codes() {
        let cases = [
            (SynthesisFailure::invalid_input("x"), StatusCode::BAD_REQUEST),
            (
                SynthesisFailure::speaker_file("x"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                SynthesisFailure::synthesis("x"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (failure, status) in cases {
            assert_eq!(Rejection::from(failure).status, status);
        }
    }

    #[test]
    fn form_without_speaker_builds_request_without_upload() {
        let form = SynthesisForm {
            text: Some("Hello".into()),
            language: None,
            speaker_file: None,
        };
        let request = form.into_request("en".into()).unwrap();
        assert_eq!(request.text(), "Hello");
        assert_eq!(request.language(), "en");
        assert!(request.speaker().is_none());
    }
}
