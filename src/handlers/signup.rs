use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::{credentials, session};
use crate::state::AppState;
use crate::tenant::TenantCtx;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// POST /auth/v1/signup
///
/// Creates the account and, when the tenant does not require email
/// confirmation, returns a live session straight away. Otherwise the
/// response carries the user only and the session waits on the verify link.
pub async fn signup_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(ApiError::bad_request("A valid email address is required"));
    }
    if body.password.len() < 8 {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters",
        ));
    }

    let store = state.tenant_store(&tenant).await?;
    let outcome = credentials::signup(
        &store,
        &tenant,
        &state.dispatcher,
        &body.email,
        &body.password,
        body.data,
    )
    .await?;

    if outcome.pending_confirmation {
        tracing::info!(tenant = %tenant.id, "signup pending email confirmation");
        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "user": outcome.user,
                "session": null,
                "confirmation_sent": true,
            })),
        ));
    }

    let session = session::issue_session(&store, outcome.user, &state.config.security).await?;
    tracing::info!(tenant = %tenant.id, user_id = %session.user.id, "signup complete");
    Ok((StatusCode::CREATED, Json(json!(session))))
}
