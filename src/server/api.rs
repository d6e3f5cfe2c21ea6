//! HTTP API adapter.
//!
//! `POST /api/synthesize` takes multipart fields `text`, `language` and an
//! optional `speaker_file`, and answers with `audio/wav` or `{"error": ...}`.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::{audio_response, run_pipeline, AppState, Rejection, SynthesisForm};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// JSON error body for API callers.
#[derive(Debug)]
pub struct ApiError(Rejection);

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        Self(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::warn!("API request rejected ({}): {}", self.0.status, self.0.message);
        let body = Json(ErrorResponse {
            error: self.0.message,
        });
        (self.0.status, body).into_response()
    }
}

pub async fn synthesize(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = SynthesisForm::read(multipart).await?;
    let language = form
        .language
        .take()
        .ok_or_else(|| Rejection::bad_request("language is required"))?;
    if form.text.is_none() {
        return Err(Rejection::bad_request("text is required").into());
    }

    let request = form.into_request(language)?;
    let audio = run_pipeline(&state, request).await?;
    Ok(audio_response(audio).await?)
}

#[derive(Debug, Serialize)]
struct LanguagesResponse<'a> {
    languages: &'a [String],
    default: &'a str,
}

pub async fn languages(State(state): State<Arc<AppState>>) -> Response {
    Json(LanguagesResponse {
        languages: state.pipeline.model().supported_languages(),
        default: &state.ui.default_language,
    })
    .into_response()
}
