use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use database::CreateRootParams;
use services::clients::{ensure_bucket, list_objects_page};
use services::models::StorageNode;
use services::ports::{IndexStore, SearchIndex};
use services::ServiceError;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{
    CreateRootRequest, DeleteRootQuery, RootImportEntry, RootImportResponse, RootIndexResponse,
    RootQuery, RootResponse,
};
use crate::AppState;

const DEFAULT_INDEX_TYPE: &str = "default";

async fn operator_node(
    state: &AppState,
    root_id: Uuid,
    requester_id: Uuid,
) -> Result<(services::models::WorkspaceRoot, StorageNode), ApiError> {
    let root = state
        .db
        .roots
        .get_by_id(root_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("root".to_string()))?;
    let node = state
        .db
        .nodes
        .get_by_id(root.node_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("node".to_string()))?;
    if node.creator_id != requester_id {
        return Err(ApiError(ServiceError::PermissionDenied(
            "User must be node operator".to_string(),
        )));
    }
    Ok((root, node))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Query(query): Query<RootQuery>,
) -> Result<Json<Vec<RootResponse>>, ApiError> {
    let node_id = match query.node_name {
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
    let roots = state.db.roots.list(node_id).await?;
    Ok(Json(roots.into_iter().map(RootResponse::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateRootRequest>,
) -> Result<(StatusCode, Json<RootResponse>), ApiError> {
    let node = state
        .db
        .nodes
        .get_by_name(&request.node_name)
        .await?
        .ok_or_else(|| ServiceError::NotFound("node".to_string()))?;
    if node.creator_id != user.0.id {
        return Err(ApiError(ServiceError::PermissionDenied(
            "User must be node operator to create roots".to_string(),
        )));
    }

    // The bucket must exist before notifications can be wired up.
    let s3 = state.clients.s3(&node);
    ensure_bucket(&s3, &request.bucket).await?;

    let root = state
        .db
        .roots
        .create(CreateRootParams {
            root_type: request.root_type,
            bucket: request.bucket,
            base_path: request.base_path,
            node_id: node.id,
        })
        .await?;
    debug!("Created root: {} on node: {}", root.id, node.name);
    Ok((StatusCode::CREATED, Json(root.into())))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(root_id): Path<Uuid>,
    Query(query): Query<DeleteRootQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    operator_node(&state, root_id, user.0.id).await?;
    state.db.roots.delete(root_id, query.cascade).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// List the immediate children of a root so the operator can register
/// unmanaged workspaces for pre-existing data.
pub async fn import(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(root_id): Path<Uuid>,
) -> Result<Json<RootImportResponse>, ApiError> {
    let (root, node) = operator_node(&state, root_id, user.0.id).await?;
    let s3 = state.clients.s3(&node);
    let prefix = if root.base_path.is_empty() {
        String::new()
    } else {
        format!("{}/", root.base_path.trim_matches('/'))
    };
    let page = list_objects_page(&s3, &root.bucket, &prefix, None, Some("/")).await?;
    Ok(Json(RootImportResponse {
        prefixes: page.common_prefixes,
        objects: page
            .keys
            .into_iter()
            .map(|entry| RootImportEntry {
                key: entry.key,
                size: entry.size,
            })
            .collect(),
    }))
}

/// Subscribe a root for indexing: make sure the search index exists with
/// the document mapping, then upsert the subscription row.
pub async fn create_index(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(root_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RootIndexResponse>), ApiError> {
    operator_node(&state, root_id, user.0.id).await?;
    state.search.ensure_index(DEFAULT_INDEX_TYPE).await?;
    let index = state
        .db
        .root_indexes
        .upsert(root_id, DEFAULT_INDEX_TYPE)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RootIndexResponse {
            id: index.id,
            root_id: index.root_id,
            index_type: index.index_type,
            created: index.created,
        }),
    ))
}

/// Unsubscribe a root. When the last subscription on an index type goes
/// away, the search index itself is dropped.
pub async fn delete_index(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(root_id): Path<Uuid>,
) -> Result<Json<RootIndexResponse>, ApiError> {
    operator_node(&state, root_id, user.0.id).await?;
    let index = state
        .db
        .root_indexes
        .delete_for_root(root_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("root index".to_string()))?;
    let remaining = state.db.root_indexes.count_for_type(&index.index_type).await?;
    if remaining == 0 {
        state.search.delete_index(&index.index_type).await?;
    }
    Ok(Json(RootIndexResponse {
        id: index.id,
        root_id: index.root_id,
        index_type: index.index_type,
        created: index.created,
    }))
}
