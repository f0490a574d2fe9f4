use axum::Form;
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{Value, json};

use super::ApiError;
use crate::tts::{TtsError, convert_to_speech, edge_client};
use crate::web::state::AppState;

/// GET /api/voices — available voices for the configured language.
pub(crate) async fn api_voices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let prefix = state.config.voice_language.clone();
    let voices = tokio::task::spawn_blocking(move || edge_client::list_voices(&prefix))
        .await
        .map_err(|_| ApiError::internal())?
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!(voices)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct TestVoiceForm {
    pub(crate) voice: Option<String>,
}

/// POST /api/test-voice — short sample clip for the selected voice. The
/// clip is synthesized into a temp file, read back, and never kept.
pub(crate) async fn api_test_voice(
    State(state): State<AppState>,
    Form(form): Form<TestVoiceForm>,
) -> Result<Response, ApiError> {
    let voice = form
        .voice
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| state.config.default_voice.clone());

    // "en-US-AriaNeural" → "Aria"
    let parts: Vec<&str> = voice.split('-').collect();
    let short_name = if parts.len() >= 3 {
        parts[parts.len() - 1].replace("Neural", "")
    } else {
        voice.clone()
    };
    let text = format!(
        "Hi there, welcome to Narrio, your personal file narrator. \
         I'm {short_name}. This is my reading voice."
    );

    let engines = state.engines.clone();
    let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TtsError> {
        let tmp = tempfile::Builder::new().suffix(".mp3").tempfile()?;
        let mut engine = engines.create();
        convert_to_speech(engine.as_mut(), &text, tmp.path(), &voice, "+0%", None)?;
        Ok(std::fs::read(tmp.path())?)
    })
    .await
    .map_err(|_| ApiError::internal())?
    .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .body(Body::from(bytes))
        .map_err(|_| ApiError::internal())
}
