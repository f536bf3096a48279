use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use services::shares::CreateShare;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{CreateShareRequest, ShareResponse};
use crate::AppState;

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateShareRequest>,
) -> Result<(StatusCode, Json<ShareResponse>), ApiError> {
    let share = state
        .shares
        .create(
            &user.0,
            CreateShare {
                workspace_id: request.workspace_id,
                workspace: request.workspace,
                sharee_id: request.sharee_id,
                sharee: request.sharee,
                permission: request.permission,
                expiration: request.expiration,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(share.into())))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ShareResponse>>, ApiError> {
    let shares = state.shares.list(&user.0).await?;
    Ok(Json(shares.into_iter().map(ShareResponse::from).collect()))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(share_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.shares.revoke(&user.0, share_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
