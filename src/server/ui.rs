//! Web UI adapter: a single form page and its submit endpoint.
//!
//! The form posts to `/ui/synthesize`. A missing language falls back to the
//! configured default; failures come back as an HTML banner fragment that the
//! page drops into place.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::{Html, IntoResponse, Response};

use super::{audio_response, run_pipeline, AppState, Rejection, SynthesisForm};

/// Error rendered as an HTML banner.
#[derive(Debug)]
pub struct UiError(Rejection);

impl From<Rejection> for UiError {
    fn from(rejection: Rejection) -> Self {
        Self(rejection)
    }
}

impl IntoResponse for UiError {
    fn into_response(self) -> Response {
        log::warn!("UI request rejected ({}): {}", self.0.status, self.0.message);
        let banner = format!(
            r#"<div class="error-banner" role="alert">{}</div>"#,
            escape_html(&self.0.message)
        );
        (self.0.status, Html(banner)).into_response()
    }
}

pub async fn synthesize(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, UiError> {
    let mut form = SynthesisForm::read(multipart).await?;
    let language = form
        .language
        .take()
        .unwrap_or_else(|| state.ui.default_language.clone());

    let request = form.into_request(language)?;
    let audio = run_pipeline(&state, request).await?;
    Ok(audio_response(audio).await?)
}

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_page(&state))
}

fn render_page(state: &AppState) -> String {
    let ui = &state.ui;
    let options: String = state
        .pipeline
        .model()
        .supported_languages()
        .iter()
        .map(|code| {
            let selected = if code.eq_ignore_ascii_case(&ui.default_language) {
                " selected"
            } else {
                ""
            };
            let code = escape_html(code);
            format!(r#"<option value="{code}"{selected}>{code}</option>"#)
        })
        .collect();

    PAGE_TEMPLATE
        .replace("{{title}}", &escape_html(&ui.title))
        .replace("{{description}}", &escape_html(&ui.description))
        .replace("{{placeholder}}", &escape_html(&ui.placeholder))
        .replace("{{languages}}", &options)
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<style>
  body { font-family: sans-serif; max-width: 44rem; margin: 2rem auto; padding: 0 1rem; }
  textarea, select, input { width: 100%; margin-bottom: 1rem; }
  .error-banner { background: #fde2e2; color: #8a1c1c; padding: .75rem; border-radius: 4px; }
</style>
</head>
<body>
<h1>{{title}}</h1>
<p>{{description}}</p>
<form id="synth-form">
  <label for="text">Input Text</label>
  <textarea id="text" name="text" rows="5" placeholder="{{placeholder}}"></textarea>
  <label for="language">Language</label>
  <select id="language" name="language">{{languages}}</select>
  <label for="speaker_file">Speaker Reference (Optional)</label>
  <input id="speaker_file" name="speaker_file" type="file" accept="audio/wav,.wav">
  <button type="submit">Synthesize</button>
</form>
<div id="status"></div>
<h2>Generated Speech</h2>
<audio id="output" controls></audio>
<script>
const form = document.getElementById("synth-form");
const statusEl = document.getElementById("status");
const output = document.getElementById("output");
form.addEventListener("submit", async (event) => {
  event.preventDefault();
  statusEl.textContent = "Synthesizing...";
  const response = await fetch("/ui/synthesize", { method: "POST", body: new FormData(form) });
  if (response.ok) {
    if (output.src) URL.revokeObjectURL(output.src);
    output.src = URL.createObjectURL(await response.blob());
    statusEl.textContent = "";
  } else {
    statusEl.innerHTML = await response.text();
  }
});
</script>
</body>
</html>
"#;
