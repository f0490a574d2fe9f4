use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};

use super::{ApiError, TokenQuery};
use crate::web::auth;
use crate::web::state::AppState;

/// POST /api/jobs/:id/cancel — flag a job cancelled; the worker observes
/// the signal within one audio chunk or one gate poll.
pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;
    state.orchestrator.cancel_job(&job_id, user.as_ref())?;
    Ok(Json(json!({ "ok": true, "status": "cancelled" })))
}
