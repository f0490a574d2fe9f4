use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::{Value, json};

use super::{ApiError, TokenQuery, read_upload_form};
use crate::analyzer::ManualSegment;
use crate::jobs::orchestrator::SubmitError;
use crate::web::auth;
use crate::web::state::AppState;

/// POST /api/analyze — premium chapter analysis. Optional `segments` field
/// carries a JSON array of `{name, start_page, end_page}` for manual PDF
/// splits.
pub(crate) async fn api_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let Some(user) = auth::current_user(&state, &headers, query.token.as_deref()).await else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Authentication required.",
        ));
    };

    let form = read_upload_form(&mut multipart).await?;
    let voice = form
        .voice
        .clone()
        .unwrap_or_else(|| state.config.default_voice.clone());
    let rate = form
        .rate
        .clone()
        .unwrap_or_else(|| state.config.default_rate.clone());
    let segments: Option<Vec<ManualSegment>> = match &form.segments {
        Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(raw).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid segments: {e}"))
        })?),
        _ => None,
    };
    let (name, bytes) = form.file()?;

    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        orchestrator.analyze(&bytes, &name, &voice, &rate, &user, segments)
    })
    .await
    .map_err(|_| ApiError::internal())??;

    Ok(Json(json!(outcome)))
}

/// GET /api/books/:book_id — chapter list of an analyzed book.
pub(crate) async fn api_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;
    let record = state
        .orchestrator
        .books()
        .authorized(&book_id, user.as_ref())
        .map_err(|e| {
            ApiError::from(match e {
                crate::jobs::book_store::BookAccess::NotFound => SubmitError::BookNotFound,
                crate::jobs::book_store::BookAccess::Unauthorized => SubmitError::Unauthorized,
            })
        })?;

    Ok(Json(json!({
        "book_id": record.id,
        "filename": record.filename,
        "detection_method": record.detection_method,
        "voice": record.voice,
        "rate": record.rate,
        "chapters": record.chapters,
    })))
}

/// POST /api/books/:book_id/chapters/:index/convert
pub(crate) async fn api_convert_chapter(
    State(state): State<AppState>,
    Path((book_id, index)): Path<(String, usize)>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;
    let orchestrator = state.orchestrator.clone();
    let job_id = tokio::task::spawn_blocking(move || {
        orchestrator.convert_chapter(&book_id, index, user.as_ref())
    })
    .await
    .map_err(|_| ApiError::internal())??;
    Ok(Json(json!({ "job_id": job_id })))
}

/// POST /api/books/:book_id/convert-all
pub(crate) async fn api_convert_all(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;
    let orchestrator = state.orchestrator.clone();
    let refs =
        tokio::task::spawn_blocking(move || orchestrator.convert_all(&book_id, user.as_ref()))
            .await
            .map_err(|_| ApiError::internal())??;
    Ok(Json(json!({ "jobs": refs })))
}
