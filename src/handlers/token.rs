use axum::{
    extract::{Extension, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, AuthError};
use crate::middleware::ClientIp;
use crate::services::{credentials, credentials::LoginMethod, session};
use crate::state::AppState;
use crate::tenant::TenantCtx;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub grant_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub provider: Option<String>,
    pub id_token: Option<String>,
    pub nonce: Option<String>,
}

/// POST /auth/v1/token?grant_type=...
///
/// Single token endpoint with three grants. The password grant runs inside
/// the brute-force guard: a lockout check before the attempt, a failure
/// registered on bad credentials, and the counter cleared on success.
pub async fn token_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<Value>, ApiError> {
    match query.grant_type.as_str() {
        "password" => password_grant(&state, &tenant, &ip, body).await,
        "refresh_token" => refresh_grant(&state, &tenant, body).await,
        "id_token" => id_token_grant(&state, &tenant, body).await,
        other => Err(ApiError::bad_request(format!(
            "Unsupported grant_type: {other}"
        ))),
    }
}

async fn password_grant(
    state: &AppState,
    tenant: &TenantCtx,
    ip: &str,
    body: TokenRequest,
) -> Result<Json<Value>, ApiError> {
    let email = body
        .email
        .ok_or_else(|| ApiError::bad_request("email is required"))?;
    let password = body
        .password
        .ok_or_else(|| ApiError::bad_request("password is required"))?;

    state.lockout.check(&tenant.id, ip, &email).await?;

    let store = state.tenant_store(tenant).await?;
    let resolved = credentials::resolve(
        &store,
        tenant,
        &state.http,
        LoginMethod::Password {
            email: email.clone(),
            password,
        },
    )
    .await;

    let user = match resolved {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            state.lockout.register_failure(&tenant.id, ip, &email).await;
            return Err(AuthError::InvalidCredentials.into());
        }
        Err(e) => return Err(e.into()),
    };

    state.lockout.clear_failures(&tenant.id, ip, &email).await;
    credentials::queue_login_effects(tenant, &state.dispatcher, &user);

    let session = session::issue_session(&store, user, &state.config.security).await?;
    tracing::info!(tenant = %tenant.id, user_id = %session.user.id, "password login");
    Ok(Json(json!(session)))
}

async fn refresh_grant(
    state: &AppState,
    tenant: &TenantCtx,
    body: TokenRequest,
) -> Result<Json<Value>, ApiError> {
    let raw = body
        .refresh_token
        .ok_or_else(|| ApiError::bad_request("refresh_token is required"))?;

    let store = state.tenant_store(tenant).await?;
    let session = session::refresh_session(&store, &raw, &state.config.security).await?;
    Ok(Json(json!(session)))
}

async fn id_token_grant(
    state: &AppState,
    tenant: &TenantCtx,
    body: TokenRequest,
) -> Result<Json<Value>, ApiError> {
    let provider = body
        .provider
        .ok_or_else(|| ApiError::bad_request("provider is required"))?;
    let id_token = body
        .id_token
        .ok_or_else(|| ApiError::bad_request("id_token is required"))?;

    let store = state.tenant_store(tenant).await?;
    let user = credentials::resolve(
        &store,
        tenant,
        &state.http,
        LoginMethod::OAuthIdToken {
            provider: provider.clone(),
            id_token,
            nonce: body.nonce,
        },
    )
    .await?;

    credentials::queue_login_effects(tenant, &state.dispatcher, &user);
    let session = session::issue_session(&store, user, &state.config.security).await?;
    tracing::info!(tenant = %tenant.id, provider, user_id = %session.user.id, "id_token login");
    Ok(Json(json!(session)))
}
