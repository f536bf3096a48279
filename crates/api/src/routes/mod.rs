pub mod apikeys;
pub mod events;
pub mod nodes;
pub mod roots;
pub mod shares;
pub mod tokens;
pub mod workspaces;

use axum::extract::{Extension, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::middleware::{auth_middleware, AuthState, CurrentUser};
use crate::models::{SearchQuery, ServerInfo, UserResponse};
use crate::AppState;

/// The full `/api` router: authenticated management surface plus the
/// unauthenticated object-store notification sink.
pub fn build_router(state: AppState, auth_state: AuthState) -> Router {
    let authenticated = Router::new()
        .route("/users/me", get(current_user))
        .route("/node", get(nodes::list).post(nodes::create))
        .route("/node/{node_id}", delete(nodes::remove))
        .route("/root", get(roots::list).post(roots::create))
        .route("/root/{root_id}", delete(roots::remove))
        .route("/root/{root_id}/import", post(roots::import))
        .route(
            "/root/{root_id}/index",
            post(roots::create_index).delete(roots::delete_index),
        )
        .route(
            "/workspace",
            get(workspaces::list).post(workspaces::create),
        )
        .route(
            "/workspace/share",
            get(shares::list).post(shares::create),
        )
        .route("/workspace/share/{share_id}", delete(shares::remove))
        .route(
            "/workspace/{workspace_id}",
            get(workspaces::get_one).delete(workspaces::remove),
        )
        .route("/workspace/{workspace_id}/crawl", post(workspaces::crawl))
        .route(
            "/workspace/{workspace_id}/bulk_index",
            post(workspaces::bulk_index),
        )
        .route(
            "/token",
            get(tokens::list).post(tokens::create).delete(tokens::revoke_all),
        )
        .route("/token/search", post(tokens::search))
        .route("/token/{token_id}", delete(tokens::revoke))
        .route("/apikey", get(apikeys::list).post(apikeys::create))
        .route("/search", get(search))
        .layer(from_fn_with_state(auth_state, auth_middleware));

    // MinIO posts notifications without broker credentials.
    let hooks = Router::new()
        .route("/minio/events", post(events::create).head(events::probe));

    Router::new()
        .route("/info", get(info))
        .merge(authenticated)
        .merge(hooks)
        .with_state(state)
}

async fn info(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        public_address: state.settings.public_name.clone(),
    })
}

async fn current_user(Extension(user): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(user.0.into())
}

/// Free-text search over the default index, proxied to the search engine.
async fn search(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hits = state.search.search("default", &query.q).await?;
    Ok(Json(hits))
}
