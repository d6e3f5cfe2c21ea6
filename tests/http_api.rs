mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{file_count, reference_wav, ToneEngine};
use tempfile::TempDir;
use tower::ServiceExt;
use voiceclone::config::UiConfig;
use voiceclone::server::{router, AppState};
use voiceclone::{Pipeline, SpeakerResolver};

const BOUNDARY: &str = "voiceclone-test-boundary";

enum Part<'a> {
    Text(&'a str),
    File(Vec<u8>),
}

struct TestApp {
    router: Router,
    output: TempDir,
    scratch: TempDir,
}

fn app(engine: ToneEngine) -> TestApp {
    let output = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let (model, _calls) = engine.into_handle();
    let pipeline = Pipeline::new(
        model,
        SpeakerResolver::new(None).with_scratch_dir(scratch.path()),
    )
    .with_output_dir(output.path());
    let ui = UiConfig {
        title: "Clone <Lab>".to_string(),
        default_language: "hi".to_string(),
        ..UiConfig::default()
    };
    let state = Arc::new(AppState::new(pipeline, ui, Some(2)));
    TestApp {
        router: router(state, 4 * 1024 * 1024),
        output,
        scratch,
    }
}

fn multipart(uri: &str, parts: Vec<(&str, Part<'_>)>) -> Request<Body> {
    let mut body = Vec::new();
    for (name, part) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"ref.wav\"\r\n\
                         Content-Type: audio/wav\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn error_message(response: axum::response::Response) -> String {
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn api_returns_wav_and_cleans_up() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![("text", Part::Text("Hello world")), ("language", Part::Text("en"))],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    assert_eq!(response.headers()["x-speaker-reference"], "none");
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[0..4], b"RIFF");
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    assert!(reader.duration() > 0);
    assert_eq!(file_count(app.output.path()), 0);
}

#[tokio::test]
async fn api_uses_uploaded_speaker() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![
                ("text", Part::Text("नमस्ते")),
                ("language", Part::Text("hi")),
                ("speaker_file", Part::File(reference_wav(3.0))),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-speaker-reference"], "uploaded");
    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(file_count(app.scratch.path()), 0);
    assert_eq!(file_count(app.output.path()), 0);
}

#[tokio::test]
async fn api_requires_language() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![("text", Part::Text("Hello"))],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "language is required");
}

#[tokio::test]
async fn api_rejects_empty_text_and_unknown_language() {
    let app = app(ToneEngine::new());

    let empty = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![("text", Part::Text("")), ("language", Part::Text("en"))],
        ))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(empty).await, "text must not be empty");

    let unknown = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![("text", Part::Text("Bonjour")), ("language", Part::Text("xx"))],
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(unknown).await.contains("unsupported language 'xx'"));
}

#[tokio::test]
async fn api_reports_bad_speaker_file_as_unprocessable() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![
                ("text", Part::Text("Hello")),
                ("language", Part::Text("en")),
                ("speaker_file", Part::File(b"definitely not a wav".to_vec())),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_message(response).await.contains("WAV"));
    assert_eq!(file_count(app.scratch.path()), 0);
}

#[tokio::test]
async fn api_reports_model_failure_as_server_error() {
    let app = app(ToneEngine::failing("speaker embedding mismatch"));

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/api/synthesize",
            vec![("text", Part::Text("Hello")), ("language", Part::Text("en"))],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(response)
        .await
        .contains("speaker embedding mismatch"));
    assert_eq!(file_count(app.output.path()), 0);
}

#[tokio::test]
async fn ui_defaults_language_from_config() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/ui/synthesize",
            vec![("text", Part::Text("नमस्ते दोस्तों"))],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
}

#[tokio::test]
async fn ui_errors_render_as_escaped_banner() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(multipart(
            "/ui/synthesize",
            vec![("text", Part::Text("<b>hi</b>")), ("language", Part::Text("<xx>"))],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.starts_with(r#"<div class="error-banner""#));
    assert!(html.contains("&lt;xx&gt;"));
    assert!(!html.contains("<xx>"));
}

#[tokio::test]
async fn index_page_lists_languages_with_default_selected() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let html = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(html.contains("<title>Clone &lt;Lab&gt;</title>"));
    assert!(html.contains(r#"<option value="hi" selected>hi</option>"#));
    assert!(html.contains(r#"<option value="pt-br">pt-br</option>"#));
}

#[tokio::test]
async fn languages_and_health_endpoints() {
    let app = app(ToneEngine::new());

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/api/languages").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["default"], "hi");
    assert_eq!(json["languages"], serde_json::json!(["en", "fr-fr", "hi", "pt-br"]));

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model"], "tone");
    assert_eq!(json["device"], "cpu");
}
