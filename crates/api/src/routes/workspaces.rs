use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use database::CreateWorkspaceParams;
use services::clients::put_prefix_marker;
use services::crawl::CrawlBatch;
use services::keys::{sanitize, workspace_key};
use services::models::{RootType, WorkspaceContext};
use services::ports::{WorkspaceFilter, WorkspaceStore};
use services::ServiceError;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{
    CrawlRoundResponse, CreateWorkspaceRequest, WorkspaceQuery, WorkspaceResponse,
};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<Vec<WorkspaceResponse>>, ApiError> {
    let filter = WorkspaceFilter {
        name: query.name,
        owner_id: query.owner_id,
        like: query.like,
        public: query.public,
    };
    let contexts = state
        .db
        .workspaces
        .search_accessible(user.0.id, &filter)
        .await?;
    Ok(Json(
        contexts.into_iter().map(WorkspaceResponse::from).collect(),
    ))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<WorkspaceResponse>, ApiError> {
    let ctx = accessible_context(&state, &user, workspace_id).await?;
    Ok(Json(ctx.into()))
}

async fn accessible_context(
    state: &AppState,
    user: &CurrentUser,
    workspace_id: Uuid,
) -> Result<WorkspaceContext, ApiError> {
    let ctx = state
        .db
        .workspaces
        .get_context(workspace_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?;
    let accessible = ctx.workspace.owner_id == user.0.id
        || ctx.root.root_type == RootType::Public
        || services::ports::ShareStore::find_for_sharee(
            state.db.shares.as_ref(),
            workspace_id,
            user.0.id,
        )
        .await?
        .is_some();
    if !accessible {
        return Err(ApiError(ServiceError::PermissionDenied(
            "Workspace is not accessible".to_string(),
        )));
    }
    Ok(ctx)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<WorkspaceResponse>), ApiError> {
    sanitize(&request.name)?;

    // Resolve the target root: an explicit id, or the first root of the
    // requested visibility (optionally on a named node).
    let root = match request.root_id {
        Some(root_id) => state
            .db
            .roots
            .get_by_id(root_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("root".to_string()))?,
        None => {
            let wanted = if request.unmanaged {
                RootType::Unmanaged
            } else if request.public {
                RootType::Public
            } else {
                RootType::Private
            };
            let node_id = match request.node_name {
                Some(ref name) => Some(
                    state
                        .db
                        .nodes
                        .get_by_name(name)
                        .await?
                        .ok_or_else(|| ServiceError::NotFound("node".to_string()))?
                        .id,
                ),
                None => None,
            };
            state
                .db
                .roots
                .list(node_id)
                .await?
                .into_iter()
                .find(|root| root.root_type == wanted)
                .ok_or_else(|| {
                    ServiceError::InvalidArgument(format!(
                        "no {} root available",
                        wanted.as_str()
                    ))
                })?
        }
    };

    let unmanaged = root.root_type == RootType::Unmanaged;
    if unmanaged {
        // Unmanaged workspaces are registered by the node operator and
        // carry their own prefix.
        let node = state
            .db
            .nodes
            .get_by_id(root.node_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("node".to_string()))?;
        if node.creator_id != user.0.id {
            return Err(ApiError(ServiceError::PermissionDenied(
                "Only the node operator can create unmanaged workspaces".to_string(),
            )));
        }
        if request.base_path.is_none() {
            return Err(ApiError(ServiceError::InvalidArgument(
                "unmanaged workspaces require base_path".to_string(),
            )));
        }
    }

    let ctx = state
        .db
        .workspaces
        .create(CreateWorkspaceParams {
            name: request.name,
            base_path: if unmanaged { request.base_path } else { None },
            owner_id: user.0.id,
            root_id: root.id,
        })
        .await?;

    // Managed workspaces get an empty prefix marker so listings show the
    // directory immediately.
    if !unmanaged {
        let key = workspace_key(&ctx.workspace, &ctx.owner.username, &ctx.root)?;
        let s3 = state.clients.s3(&ctx.node);
        put_prefix_marker(&s3, &ctx.root.bucket, &format!("{key}/")).await?;
    }

    debug!("Created workspace: {} for user: {}", ctx.workspace.name, user.0.id);
    Ok((StatusCode::CREATED, Json(ctx.into())))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = state
        .db
        .workspaces
        .get_context(workspace_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("workspace".to_string()))?;
    if ctx.workspace.owner_id != user.0.id {
        return Err(ApiError(ServiceError::PermissionDenied(
            "Only the owner can delete a workspace".to_string(),
        )));
    }
    state.db.workspaces.delete(workspace_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn crawl(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(workspace_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CrawlRoundResponse>), ApiError> {
    let round = state.crawl.create_round(&user.0, workspace_id).await?;
    Ok((StatusCode::CREATED, Json(round.into())))
}

pub async fn bulk_index(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(workspace_id): Path<Uuid>,
    Json(batch): Json<CrawlBatch>,
) -> Result<(StatusCode, Json<CrawlRoundResponse>), ApiError> {
    let round = state
        .crawl
        .bulk_ingest(&user.0, workspace_id, batch)
        .await?;
    Ok((StatusCode::CREATED, Json(round.into())))
}
