use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use database::CreateNodeParams;
use services::ServiceError;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{CreateNodeRequest, NodeResponse};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<NodeResponse>>, ApiError> {
    let nodes = state.db.nodes.list().await?;
    Ok(Json(
        nodes
            .into_iter()
            .map(|node| NodeResponse::for_requester(node, user.0.id))
            .collect(),
    ))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<NodeResponse>), ApiError> {
    debug!("Creating node: {} by user: {}", request.name, user.0.id);
    let node = state
        .db
        .nodes
        .create(
            user.0.id,
            CreateNodeParams {
                name: request.name,
                api_url: request.api_url,
                sts_api_url: request.sts_api_url,
                region: request.region,
                access_key_id: request.access_key_id,
                secret_access_key: request.secret_access_key,
                assume_role_arn: request.assume_role_arn,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(NodeResponse::for_requester(node, user.0.id)),
    ))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(node_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = state
        .db
        .nodes
        .get_by_id(node_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("node".to_string()))?;
    if node.creator_id != user.0.id {
        return Err(ApiError(ServiceError::PermissionDenied(
            "Only the creator can delete a node".to_string(),
        )));
    }
    state.db.nodes.delete(node_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
