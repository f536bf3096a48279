// Authentication middleware.
//
// Two credential forms are accepted:
// 1. HTTP Basic with an api-key id and secret, validated against the
//    stored digest (new clients use this).
// 2. An OIDC id token, either in the `session` cookie or as a Bearer
//    token (compatibility form), verified against the provider's JWKS.
//
// On success the resolved user lands in request extensions as
// `CurrentUser`.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::{AUTHORIZATION, COOKIE},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use database::{ApiKeyRepository, Database};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use services::models::User;
use services::ServiceError;
use tracing::{debug, warn};

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<Database>,
    pub oidc: Arc<OidcVerifier>,
}

impl AuthState {
    pub fn new(db: Arc<Database>, oidc: Arc<OidcVerifier>) -> Self {
        Self { db, oidc }
    }
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let session = session_cookie(&request);

    let user = authenticate(&state, authorization, session).await?;
    debug!("Authenticated user: {}", user.username);
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

async fn authenticate(
    state: &AuthState,
    authorization: Option<String>,
    session: Option<String>,
) -> Result<User, ApiError> {
    if let Some(value) = authorization {
        if let Some(encoded) = value.strip_prefix("Basic ") {
            return basic_auth(state, encoded).await;
        }
        if let Some(token) = value.strip_prefix("Bearer ") {
            return oidc_auth(state, token).await;
        }
    }

    if let Some(token) = session {
        return oidc_auth(state, &token).await;
    }

    Err(ApiError(ServiceError::Unauthorized(
        "missing credentials".to_string(),
    )))
}

async fn basic_auth(state: &AuthState, encoded: &str) -> Result<User, ApiError> {
    let unauthorized = || ApiError(ServiceError::Unauthorized("invalid api key".to_string()));

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| unauthorized())?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized())?;
    let (key_id, secret) = decoded.split_once(':').ok_or_else(unauthorized)?;

    let api_key = state
        .db
        .api_keys
        .get_by_key_id(key_id)
        .await?
        .ok_or_else(unauthorized)?;
    if !ApiKeyRepository::verify_secret(secret, &api_key.secret_hash) {
        warn!("Rejected api key: {}", key_id);
        return Err(unauthorized());
    }
    state
        .db
        .users
        .get_by_id(api_key.user_id)
        .await?
        .ok_or_else(unauthorized)
}

async fn oidc_auth(state: &AuthState, token: &str) -> Result<User, ApiError> {
    let claims = state.oidc.verify(token).await?;
    let username = claims
        .preferred_username
        .or_else(|| {
            claims
                .email
                .clone()
                .map(|e| e.split('@').next().unwrap_or_default().to_string())
        })
        .unwrap_or_else(|| claims.sub.clone());
    let email = claims.email.unwrap_or_default();
    let user = state.db.users.get_or_create(&username, &email).await?;
    Ok(user)
}

fn session_cookie(request: &Request) -> Option<String> {
    let cookies = request.headers().get(COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        if let Some(value) = cookie.trim().strip_prefix("session=") {
            return Some(value.to_string());
        }
    }
    None
}

#[derive(Debug, Deserialize)]
pub struct IdClaims {
    pub sub: String,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WellKnown {
    jwks_uri: String,
}

/// Verifies OIDC id tokens against the provider's JWKS, with decoding
/// keys cached by `kid`.
pub struct OidcVerifier {
    config: config::OidcConfig,
    http: reqwest::Client,
    keys: moka::future::Cache<String, Arc<DecodingKey>>,
}

impl OidcVerifier {
    pub fn new(config: config::OidcConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            keys: moka::future::Cache::builder()
                .time_to_live(std::time::Duration::from_secs(3600))
                .build(),
        }
    }

    fn allowed_algorithms(&self) -> Vec<Algorithm> {
        self.config
            .algos
            .iter()
            .filter_map(|name| Algorithm::from_str(name).ok())
            .collect()
    }

    async fn key_for(&self, kid: &str) -> Result<Arc<DecodingKey>, ServiceError> {
        if let Some(key) = self.keys.get(kid).await {
            return Ok(key);
        }

        let well_known: WellKnown = self
            .http
            .get(&self.config.well_known_url)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("oidc discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("oidc discovery body: {e}")))?;
        let jwks: jsonwebtoken::jwk::JwkSet = self
            .http
            .get(&well_known.jwks_uri)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(format!("jwks fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(format!("jwks body: {e}")))?;

        for jwk in &jwks.keys {
            if let Some(key_id) = &jwk.common.key_id {
                match DecodingKey::from_jwk(jwk) {
                    Ok(key) => self.keys.insert(key_id.clone(), Arc::new(key)).await,
                    Err(e) => warn!("skipping unusable jwk {}: {}", key_id, e),
                }
            }
        }

        self.keys
            .get(kid)
            .await
            .ok_or_else(|| ServiceError::Unauthorized(format!("unknown signing key '{kid}'")))
    }

    pub async fn verify(&self, token: &str) -> Result<IdClaims, ServiceError> {
        let header = decode_header(token)
            .map_err(|_| ServiceError::Unauthorized("malformed id token".to_string()))?;
        let allowed = self.allowed_algorithms();
        if !allowed.contains(&header.alg) {
            return Err(ServiceError::Unauthorized(
                "id token algorithm not allowed".to_string(),
            ));
        }
        let kid = header
            .kid
            .ok_or_else(|| ServiceError::Unauthorized("id token missing kid".to_string()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.config.client_id.as_str()]);
        let data = decode::<IdClaims>(token, &key, &validation)
            .map_err(|e| ServiceError::Unauthorized(format!("id token rejected: {e}")))?;
        Ok(data.claims)
    }
}
