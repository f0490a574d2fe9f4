use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum::middleware::{Next, from_fn};
use axum::response::Response;
use axum::routing::{get, post};

use tracing::info;

use super::routes;
use super::state::AppState;

// Body limit leaves headroom over the upload cap for multipart framing.
const BODY_LIMIT_SLACK: u64 = 2 * 1024 * 1024;

pub(crate) fn build_router(state: AppState) -> Router {
    let body_limit = (state.config.max_upload_bytes() + BODY_LIMIT_SLACK) as usize;

    Router::new()
        .route("/api/voices", get(routes::voices::api_voices))
        .route("/api/test-voice", post(routes::voices::api_test_voice))
        .route("/api/convert", post(routes::convert::api_convert))
        .route("/api/progress/:job_id", get(routes::progress::api_progress))
        .route("/api/download/:job_id", get(routes::download::api_download))
        .route("/api/jobs/:job_id/cancel", post(routes::jobs::cancel_job))
        .route("/api/analyze", post(routes::books::api_analyze))
        .route("/api/books/:book_id", get(routes::books::api_book))
        .route(
            "/api/books/:book_id/chapters/:index/convert",
            post(routes::books::api_convert_chapter),
        )
        .route(
            "/api/books/:book_id/convert-all",
            post(routes::books::api_convert_all),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(access_log_mw))
        .with_state(state)
}

async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|c| c.0.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = next.run(req).await;
    info!(
        target: "web_access",
        ip = %ip,
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        "request"
    );
    response
}
