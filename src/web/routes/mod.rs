pub(crate) mod books;
pub(crate) mod convert;
pub(crate) mod download;
pub(crate) mod jobs;
pub(crate) mod progress;
pub(crate) mod voices;

use axum::Json;
use axum::body::Bytes;
use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::jobs::orchestrator::SubmitError;

#[derive(Debug, Deserialize)]
pub(crate) struct TokenQuery {
    pub(crate) token: Option<String>,
}

pub(crate) struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }

    pub(crate) fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::QuotaExceeded {
                ref message,
                requires_premium,
            } => Self {
                status: StatusCode::BAD_REQUEST,
                body: json!({ "error": message, "requiresPremium": requires_premium }),
            },
            SubmitError::PremiumRequired => Self {
                status: StatusCode::FORBIDDEN,
                body: json!({ "error": err.to_string(), "requiresPremium": true }),
            },
            SubmitError::Unauthorized => Self::new(StatusCode::FORBIDDEN, err.to_string()),
            SubmitError::BookNotFound
            | SubmitError::ChapterNotFound
            | SubmitError::JobNotFound => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            SubmitError::Io(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            SubmitError::UnsupportedFileType
            | SubmitError::TooLarge(_)
            | SubmitError::Invalid(_)
            | SubmitError::Extraction(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
        }
    }
}

#[derive(Default)]
pub(crate) struct UploadForm {
    pub(crate) file_name: Option<String>,
    pub(crate) file_bytes: Option<Bytes>,
    pub(crate) voice: Option<String>,
    pub(crate) rate: Option<String>,
    pub(crate) segments: Option<String>,
}

impl UploadForm {
    /// The uploaded file, refused with the original error messages when the
    /// part is missing or unnamed.
    pub(crate) fn file(self) -> Result<(String, Bytes), ApiError> {
        let bytes = self
            .file_bytes
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file uploaded."))?;
        let name = self
            .file_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file selected."))?;
        Ok((name, bytes))
    }
}

pub(crate) async fn read_upload_form(multipart: &mut Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                form.file_name = field.file_name().map(str::to_string);
                form.file_bytes = Some(field.bytes().await.map_err(|e| {
                    ApiError::new(StatusCode::BAD_REQUEST, format!("Upload failed: {e}"))
                })?);
            }
            Some("voice") => form.voice = field.text().await.ok(),
            Some("rate") => form.rate = field.text().await.ok(),
            Some("segments") => form.segments = field.text().await.ok(),
            _ => {
                let _ = field.bytes().await;
            }
        }
    }
    Ok(form)
}
