//! Session issuance, refresh rotation, and logout.

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::auth::{generate_jwt, secrets, Claims};
use crate::config::SecurityConfig;
use crate::database::models::User;
use crate::error::AuthError;
use crate::store::AuthBackend;

/// The session body returned by every issuing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub expires_at: i64,
    pub refresh_token: String,
    pub user: User,
}

/// Mint an access/refresh pair for `user` and persist the refresh link.
pub async fn issue_session(
    store: &dyn AuthBackend,
    user: User,
    security: &SecurityConfig,
) -> Result<Session, AuthError> {
    if user.banned {
        return Err(AuthError::Banned);
    }

    let claims = Claims::new(
        user.id,
        user.role.clone(),
        security.jwt_audience.clone(),
        security.jwt_expiry_secs,
    );
    let expires_at = claims.exp;
    let access_token = generate_jwt(&claims, &security.jwt_secret)
        .map_err(|e| AuthError::ProviderMisconfigured(e.to_string()))?;

    let raw_refresh = secrets::refresh_secret();
    let refresh_expiry = Utc::now() + Duration::days(security.refresh_expiry_days);
    store
        .insert_refresh_token(user.id, &secrets::sha256_hex(&raw_refresh), refresh_expiry)
        .await?;

    Ok(Session {
        access_token,
        token_type: "bearer",
        expires_in: security.jwt_expiry_secs,
        expires_at,
        refresh_token: raw_refresh,
        user,
    })
}

/// Rotate the presented refresh token and issue a fresh session.
///
/// Reuse of an already-revoked link fails with `TokenReused`; callers must
/// treat the whole chain as compromised and force re-authentication.
pub async fn refresh_session(
    store: &dyn AuthBackend,
    raw_token: &str,
    security: &SecurityConfig,
) -> Result<Session, AuthError> {
    let presented_hash = secrets::sha256_hex(raw_token);
    let raw_successor = secrets::refresh_secret();
    let successor_hash = secrets::sha256_hex(&raw_successor);
    let refresh_expiry = Utc::now() + Duration::days(security.refresh_expiry_days);

    let rotated = store
        .rotate_refresh_token(&presented_hash, &successor_hash, refresh_expiry)
        .await;

    let successor = match rotated {
        Ok(token) => token,
        Err(AuthError::TokenReused) => {
            tracing::warn!("refresh token reuse detected, session chain compromised");
            return Err(AuthError::TokenReused);
        }
        Err(e) => return Err(e),
    };

    let user = store
        .find_user(successor.user_id)
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    if user.banned {
        return Err(AuthError::Banned);
    }

    let claims = Claims::new(
        user.id,
        user.role.clone(),
        security.jwt_audience.clone(),
        security.jwt_expiry_secs,
    );
    let expires_at = claims.exp;
    let access_token = generate_jwt(&claims, &security.jwt_secret)
        .map_err(|e| AuthError::ProviderMisconfigured(e.to_string()))?;

    Ok(Session {
        access_token,
        token_type: "bearer",
        expires_in: security.jwt_expiry_secs,
        expires_at,
        refresh_token: raw_successor,
        user,
    })
}

/// Revoke every live refresh token for the user.
pub async fn logout(store: &dyn AuthBackend, user_id: uuid::Uuid) -> Result<(), AuthError> {
    let revoked = store.revoke_all_refresh_tokens(user_id).await?;
    tracing::debug!(%user_id, revoked, "session logout");
    Ok(())
}
