use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;
use services::ServiceError;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::models::{
    CreateTokenRequest, NodeResponse, TokenNodeResponse, TokenResponse, TokenSearchMatch,
    TokenSearchRequest, TokenSearchResponse,
};
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<TokenResponse>>, ApiError> {
    let tokens = state.broker.list(&user.0).await?;
    Ok(Json(tokens.into_iter().map(TokenResponse::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<Vec<TokenNodeResponse>>), ApiError> {
    if request.workspaces.is_empty() {
        return Err(ApiError(ServiceError::InvalidArgument(
            "workspaces must not be empty".to_string(),
        )));
    }
    let issued = state.broker.issue(&user.0, &request.workspaces).await?;
    let response = issued
        .into_iter()
        .map(|issued| TokenNodeResponse {
            token: issued.token.into(),
            node: NodeResponse::for_requester(issued.node, user.0.id),
        })
        .collect();
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn search(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<TokenSearchRequest>,
) -> Result<Json<TokenSearchResponse>, ApiError> {
    let outcome = state
        .broker
        .search_tokens(&user.0, &request.search_terms)
        .await?;
    Ok(Json(TokenSearchResponse {
        tokens: outcome
            .tokens
            .into_iter()
            .map(|issued| TokenNodeResponse {
                token: issued.token.into(),
                node: NodeResponse::for_requester(issued.node, user.0.id),
            })
            .collect(),
        workspaces: outcome
            .workspaces
            .into_iter()
            .map(|(term, matched)| {
                (
                    term,
                    TokenSearchMatch {
                        workspace: matched.workspace.into(),
                        path: matched.path,
                    },
                )
            })
            .collect(),
    }))
}

pub async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.broker.revoke(&user.0, token_id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn revoke_all(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<u64>, ApiError> {
    let count = state.broker.revoke_all(&user.0).await?;
    Ok(Json(count))
}
