use axum::{
    extract::{Extension, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::password;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::session;
use crate::state::AppState;
use crate::store::AuthBackend;
use crate::tenant::TenantCtx;

/// GET /auth/v1/user
pub async fn user_get(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let store = state.tenant_store(&tenant).await?;
    let user = store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub password: Option<String>,
    pub data: Option<Value>,
}

/// PUT /auth/v1/user
///
/// Password and metadata updates for the authenticated user. A password
/// change revokes every outstanding refresh token.
pub async fn user_put(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    let store = state.tenant_store(&tenant).await?;
    store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if let Some(new_password) = &body.password {
        if new_password.len() < 8 {
            return Err(ApiError::bad_request(
                "Password must be at least 8 characters",
            ));
        }
        let hash = password::hash_password(new_password)?;
        store.update_password(auth.user_id, &hash).await?;
        store.revoke_all_refresh_tokens(auth.user_id).await?;
        tracing::info!(tenant = %tenant.id, user_id = %auth.user_id, "password changed, sessions revoked");
    }

    if let Some(metadata) = &body.data {
        store.update_metadata(auth.user_id, metadata).await?;
    }

    let user = store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!(user)))
}

/// POST /auth/v1/logout
pub async fn logout_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Extension(auth): Extension<AuthUser>,
) -> Result<axum::http::StatusCode, ApiError> {
    let store = state.tenant_store(&tenant).await?;
    session::logout(&store, auth.user_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
