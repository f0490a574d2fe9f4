use axum::body::Body;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use tokio_util::io::ReaderStream;

use super::{ApiError, TokenQuery};
use crate::jobs::job_store::JobStatus;
use crate::web::auth;
use crate::web::state::AppState;

fn make_content_disposition(filename: &str) -> Option<header::HeaderValue> {
    // RFC 5987 filename* for UTF-8 names, plus ASCII fallback for legacy clients.
    fn is_unreserved(b: u8) -> bool {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for &b in filename.as_bytes() {
        if is_unreserved(b) {
            encoded.push(char::from(b));
        } else {
            encoded.push('%');
            encoded.push_str(&format!("{b:02X}"));
        }
    }

    let ascii_fallback = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback, encoded
    );
    header::HeaderValue::from_str(&value).ok()
}

/// GET /api/download/:job_id — stream the finished MP3.
pub(crate) async fn api_download(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<String>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let user = auth::current_user(&state, &headers, query.token.as_deref()).await;

    let job = state
        .jobs
        .snapshot(&job_id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Job not found."))?;
    if let Some(owner) = &job.user_id
        && user.as_ref().map(|u| u.user_id.as_str()) != Some(owner.as_str())
    {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Unauthorized."));
    }
    if job.status != JobStatus::Completed {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Conversion not complete.",
        ));
    }

    let output_file = job
        .output_file
        .as_deref()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Output file not found."))?;
    let path = state.config.output_dir().join(output_file);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "Output file not found."))?;

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("audio/mpeg"),
    );
    let download_name = job.download_name.as_deref().unwrap_or(output_file);
    if let Some(value) = make_content_disposition(download_name) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
