use axum::{
    extract::{Extension, Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::models::OtpType;
use crate::error::{ApiError, AuthError};
use crate::services::{otp, outbound, session};
use crate::state::AppState;
use crate::store::AuthBackend;
use crate::tenant::TenantCtx;

const LINK_EXPIRY_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: String,
    #[serde(rename = "type")]
    pub verify_type: String,
    pub redirect_to: Option<String>,
}

/// GET /auth/v1/verify?token=...&type=signup|recovery|magiclink
///
/// Redeems an emailed link token. With a configured site URL the response
/// is a redirect carrying the session in the URL fragment (so it never
/// transits a server log); otherwise the session comes back as JSON.
pub async fn verify_get(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Query(query): Query<VerifyQuery>,
) -> Result<Response, ApiError> {
    let store = state.tenant_store(&tenant).await?;

    let user = match query.verify_type.as_str() {
        "signup" => store.confirm_email(&query.token).await?,
        "recovery" | "magiclink" => {
            let otp_type = if query.verify_type == "recovery" {
                OtpType::Recovery
            } else {
                OtpType::Magiclink
            };
            let record = otp::verify_link_token(&store, &query.token, otp_type).await?;
            store
                .find_user_by_email(&record.identifier)
                .await?
                .ok_or(AuthError::InvalidOrExpiredToken)?
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "Unsupported verification type: {other}"
            )))
        }
    };

    let session = session::issue_session(&store, user, &state.config.security).await?;
    tracing::info!(tenant = %tenant.id, user_id = %session.user.id, kind = %query.verify_type, "link verified");

    let site = redirect_target(
        query.redirect_to.as_deref(),
        state.config.security.site_url.as_deref(),
    );
    match site {
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

/// Resolve the post-verification redirect. The fragment carries live
/// session tokens, so a requested target is honored only when its origin
/// matches the configured site URL; anything else falls back to the
/// configured URL itself.
fn redirect_target(requested: Option<&str>, site: Option<&str>) -> Option<String> {
    let site = site?;
    if let Some(requested) = requested {
        if same_origin(requested, site) {
            return Some(requested.to_string());
        }
        tracing::warn!(requested, "rejected cross-origin redirect target");
    }
    Some(site.to_string())
}

fn same_origin(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme()
                && a.host_str() == b.host_str()
                && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub email: String,
}

/// POST /auth/v1/recover
///
/// Always answers success so the endpoint cannot be used to enumerate
/// accounts; the email only goes out when the user exists.
pub async fn recover_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Json(body): Json<LinkRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    issue_link(&state, &tenant, &body.email, OtpType::Recovery, "recovery").await?;
    Ok(Json(json!({ "success": true })))
}

/// POST /auth/v1/magiclink
pub async fn magiclink_post(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantCtx>,
    Json(body): Json<LinkRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    issue_link(&state, &tenant, &body.email, OtpType::Magiclink, "magiclink").await?;
    Ok(Json(json!({ "success": true })))
}

async fn issue_link(
    state: &AppState,
    tenant: &TenantCtx,
    email: &str,
    otp_type: OtpType,
    link_type: &'static str,
) -> Result<(), ApiError> {
    let store = state.tenant_store(tenant).await?;
    if store.find_user_by_email(email).await?.is_none() {
        tracing::debug!(tenant = %tenant.id, kind = link_type, "link requested for unknown email");
        return Ok(());
    }

    let token = otp::issue_link_token(&store, email, otp_type, LINK_EXPIRY_SECS).await?;
    state.dispatcher.enqueue(outbound::OutboundEvent::LinkEmail {
        tenant: tenant.id.clone(),
        email: email.to_string(),
        token,
        link_type,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: Option<&str> = Some("https://app.acme.test");

    #[test]
    fn same_origin_paths_may_differ() {
        let target = redirect_target(Some("https://app.acme.test/welcome?step=2"), SITE);
        assert_eq!(target.as_deref(), Some("https://app.acme.test/welcome?step=2"));
    }

    #[test]
    fn cross_origin_targets_fall_back_to_the_site() {
        for requested in [
            "https://evil.example.com/",
            "http://app.acme.test/",
            "https://app.acme.test.evil.example.com/",
            "not a url",
        ] {
            let target = redirect_target(Some(requested), SITE);
            assert_eq!(target.as_deref(), Some("https://app.acme.test"));
        }
    }

    #[test]
    fn no_configured_site_means_no_redirect_at_all() {
        assert_eq!(redirect_target(Some("https://evil.example.com/"), None), None);
        assert_eq!(redirect_target(None, None), None);
    }

    #[test]
    fn absent_request_uses_the_site() {
        assert_eq!(redirect_target(None, SITE).as_deref(), Some("https://app.acme.test"));
    }
}
