use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};

use super::{ApiError, TokenQuery, read_upload_form};
use crate::web::auth;
use crate::web::state::AppState;

/// POST /api/convert — single-file conversion, free tier allowed.
pub(crate) async fn api_convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;

    let form = read_upload_form(&mut multipart).await?;
    let voice = form
        .voice
        .clone()
        .unwrap_or_else(|| state.config.default_voice.clone());
    let rate = form
        .rate
        .clone()
        .unwrap_or_else(|| state.config.default_rate.clone());
    let (name, bytes) = form.file()?;

    let orchestrator = state.orchestrator.clone();
    let job_id = tokio::task::spawn_blocking(move || {
        orchestrator.convert_single(&bytes, &name, &voice, &rate, user.as_ref())
    })
    .await
    .map_err(|_| ApiError::internal())??;

    Ok(Json(json!({ "job_id": job_id })))
}
