use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use tokio_stream::StreamExt;

use super::{ApiError, TokenQuery};
use crate::jobs::progress;
use crate::web::auth;
use crate::web::state::AppState;

/// GET /api/progress/:job_id — server-sent `{status, progress, message}`
/// snapshots every 500 ms until the job reaches a terminal state. The
/// caller's identity is captured here, once, and not re-checked per tick.
pub(crate) async fn api_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;

    let events = progress::subscribe(state.jobs.clone(), job_id, user.map(|u| u.user_id));
    let body = Body::from_stream(events.map(|event| Ok::<_, Infallible>(Bytes::from(event))));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|_| ApiError::internal())
}
