use axum::{
    extract::{
        multipart::MultipartError, rejection::QueryRejection, DefaultBodyLimit, Multipart, Query,
        State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

use super::dto::{HistoryQuery, HistoryResponse, PredictResponse, PredictionHealthResponse};

const FILE_FIELD: &str = "file";

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/prediction/history", get(history))
        .route("/prediction/health", get(health))
}

/// The body limit sits above the upload limit so oversized files reach
/// validation and get a proper `file_too_large` answer.
pub fn write_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/prediction/predict", post(predict))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_mul(2).saturating_add(MULTIPART_OVERHEAD),
        ))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::validation("file_too_large", "Uploaded file is too large")
    } else {
        ApiError::validation("invalid_multipart", e.body_text())
    }
}

/// POST /prediction/predict (multipart, field `file`)
#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<PredictResponse>> {
    let mut upload: Option<(Bytes, String)> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field.bytes().await.map_err(multipart_error)?;
        upload = Some((body, content_type));
        break;
    }

    let (body, content_type) = upload.ok_or_else(|| {
        ApiError::validation("missing_file", "multipart field `file` is required")
    })?;

    let outcome = state
        .predictions
        .submit(user_id, body, &content_type)
        .await?;
    Ok(Json(outcome.into()))
}

#[instrument(skip(state, query))]
pub async fn history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(q) = query.map_err(|e| ApiError::validation("invalid_pagination", e.body_text()))?;
    let page = state
        .predictions
        .history(user_id, q.page, q.page_size)
        .await?;
    Ok(Json(page.into()))
}

pub async fn health(State(state): State<AppState>) -> Json<PredictionHealthResponse> {
    Json(state.predictions.health().await.into())
}
