use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use services::events::BucketEventNotification;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// Object-store notification sink.
pub async fn create(
    State(state): State<AppState>,
    Json(event): Json<BucketEventNotification>,
) -> Result<StatusCode, ApiError> {
    debug!(records = event.records.len(), "bucket event received");
    state.events.handle(event).await?;
    Ok(StatusCode::OK)
}

/// MinIO issues a HEAD probe against the webhook endpoint on startup.
pub async fn probe() -> StatusCode {
    StatusCode::OK
}
