//! Legacy token surface kept for pre-v1 clients.

use axum::{
    extract::{Extension, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, AuthError};
use crate::middleware::ClientIp;
use crate::services::{credentials, credentials::LoginMethod, otp, session};
use crate::state::AppState;
use crate::tenant::TenantCtx;

#[derive(Debug, Deserialize)]
pub struct LegacyTokenRequest {
    pub email: String,
    pub password: String,
}

/// POST /auth/token
///
/// Plain password grant predating the versioned surface. Same brute-force
/// guard as the v1 endpoint, older body shape.
pub async fn legacy_token_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(body): Json<LegacyTokenRequest>,
) -> Result<Json<Value>, ApiError> {
    state.lockout.check(&tenant.id, &ip, &body.email).await?;

    let store = state.tenant_store(&tenant).await?;
    let resolved = credentials::resolve(
        &store,
        &tenant,
        &state.http,
        LoginMethod::Password {
            email: body.email.clone(),
            password: body.password,
        },
    )
    .await;

    let user = match resolved {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            state
                .lockout
                .register_failure(&tenant.id, &ip, &body.email)
                .await;
            return Err(AuthError::InvalidCredentials.into());
        }
        Err(e) => return Err(e.into()),
    };

    state.lockout.clear_failures(&tenant.id, &ip, &body.email).await;
    credentials::queue_login_effects(&tenant, &state.dispatcher, &user);
    let session = session::issue_session(&store, user, &state.config.security).await?;
    Ok(Json(json!(session)))
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub provider: String,
    pub identifier: String,
}

/// POST /auth/challenge
///
/// Issues a passwordless challenge code, superseding any active one, and
/// delivers it through the tenant's signed webhook transport.
pub async fn challenge_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Json(body): Json<ChallengeRequest>,
) -> Result<Json<Value>, ApiError> {
    let store = state.tenant_store(&tenant).await?;
    otp::issue_challenge(
        &store,
        state.webhooks.as_ref(),
        &tenant.settings.webhook_secret,
        &body.provider,
        &body.identifier,
        &tenant.settings.otp,
    )
    .await?;

    tracing::info!(tenant = %tenant.id, provider = %body.provider, "challenge issued");
    Ok(Json(json!({ "success": true, "expires_in": tenant.settings.otp.expiry_secs })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyChallengeRequest {
    pub provider: String,
    pub identifier: String,
    pub code: String,
}

/// POST /auth/verify-challenge
pub async fn verify_challenge_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Json(body): Json<VerifyChallengeRequest>,
) -> Result<Json<Value>, ApiError> {
    let store = state.tenant_store(&tenant).await?;
    let user = credentials::resolve(
        &store,
        &tenant,
        &state.http,
        LoginMethod::PasswordlessOtp {
            provider: body.provider,
            identifier: body.identifier,
            code: body.code,
        },
    )
    .await?;

    credentials::queue_login_effects(&tenant, &state.dispatcher, &user);
    let session = session::issue_session(&store, user, &state.config.security).await?;
    Ok(Json(json!(session)))
}
