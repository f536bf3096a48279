use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::ApiKeyResponse;
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ApiKeyResponse>>, ApiError> {
    let keys = state.db.api_keys.list_for_user(user.0.id).await?;
    Ok(Json(
        keys.into_iter()
            .map(|key| ApiKeyResponse::from_key(key, None))
            .collect(),
    ))
}

/// Issue a new key. The secret appears in this response and nowhere else.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<(StatusCode, Json<ApiKeyResponse>), ApiError> {
    let (key, secret) = state.db.api_keys.create(user.0.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiKeyResponse::from_key(key, Some(secret))),
    ))
}
