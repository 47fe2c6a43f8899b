use axum::{
    extract::{Extension, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::secrets;
use crate::error::{ApiError, AuthError};
use crate::services::{credentials, oauth, session};
use crate::state::AppState;
use crate::store::AuthBackend;
use crate::tenant::TenantCtx;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub provider: String,
}

/// GET /auth/v1/authorize?provider=...
///
/// Starts the browser code flow: redirects to the provider with a signed
/// state token carrying the provider name and a fresh nonce.
pub async fn authorize_get(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    let cfg = tenant
        .find_provider(&query.provider)
        .ok_or_else(|| AuthError::ProviderMisconfigured(query.provider.clone()))?;

    let nonce = secrets::link_token();
    let flow_state =
        oauth::encode_flow_state(&cfg.name, &nonce, &state.config.security.jwt_secret)?;
    let target = oauth::authorize_url(cfg, &flow_state, &nonce)?;

    tracing::debug!(tenant = %tenant.id, provider = %cfg.name, "authorization redirect");
    Ok(Redirect::to(&target))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /auth/v1/callback?code=...&state=...
///
/// Finishes the code flow. The state token binds the callback to the
/// provider and nonce chosen at authorize time; the code is exchanged and
/// the resulting identity upserted like any other external login.
pub async fn callback_get(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let flow =
        oauth::decode_flow_state(&query.state, &state.config.security.jwt_secret)?;
    let cfg = tenant
        .find_provider(&flow.provider)
        .ok_or_else(|| AuthError::ProviderMisconfigured(flow.provider.clone()))?;

    let verified = oauth::exchange_code(&state.http, cfg, &query.code, &flow.nonce).await?;

    let store = state.tenant_store(&tenant).await?;
    let user = store
        .upsert_external_identity(
            &verified.provider,
            &verified.subject,
            verified.email.as_deref(),
            verified.profile,
        )
        .await?;

    credentials::queue_login_effects(&tenant, &state.dispatcher, &user);
    let session = session::issue_session(&store, user, &state.config.security).await?;
    tracing::info!(tenant = %tenant.id, provider = %flow.provider, user_id = %session.user.id, "code flow login");

    match &state.config.security.site_url {
        Some(site) => {
            let target = format!(
                "{}#access_token={}&refresh_token={}&token_type=bearer&expires_in={}",
                site.trim_end_matches('/'),
                session.access_token,
                session.refresh_token,
                session.expires_in,
            );
            Ok(Redirect::to(&target).into_response())
        }
        None => Ok(Json(json!(session)).into_response()),
    }
}
