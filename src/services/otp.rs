//! Passwordless challenges and single-use link tokens.

use chrono::{Duration, Utc};
use regex::Regex;
use serde_json::{json, Value};

use crate::auth::secrets;
use crate::database::models::{OtpCode, OtpType};
use crate::error::AuthError;
use crate::services::outbound::WebhookSender;
use crate::store::AuthBackend;
use crate::tenant::OtpSettings;

/// Attempts allowed before a challenge is destroyed.
pub const MAX_VERIFY_ATTEMPTS: i32 = 5;

/// Identity resolved by a successful challenge, ready for upsert.
#[derive(Debug, Clone)]
pub struct ChallengeProfile {
    pub provider: String,
    pub identifier: String,
    pub metadata: Value,
}

/// Issue a new challenge code for `(provider, identifier)`, superseding any
/// prior one, and deliver it through the tenant's signed webhook transport.
pub async fn issue_challenge(
    store: &dyn AuthBackend,
    sender: &dyn WebhookSender,
    webhook_secret: &str,
    provider: &str,
    identifier: &str,
    settings: &OtpSettings,
) -> Result<(), AuthError> {
    if let Some(pattern) = &settings.identifier_pattern {
        let re = Regex::new(pattern)
            .map_err(|_| AuthError::ProviderMisconfigured(format!("bad identifier pattern for {provider}")))?;
        if !re.is_match(identifier) {
            return Err(AuthError::InvalidCredentials);
        }
    }

    let delivery_url = settings
        .delivery_url
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{provider}: no delivery url")))?;

    let code = secrets::challenge_code(&settings.charset, settings.length);
    if code.is_empty() {
        return Err(AuthError::ProviderMisconfigured(format!("{provider}: empty otp charset")));
    }

    let expires_at = Utc::now() + Duration::seconds(settings.expiry_secs);
    store
        .replace_otp(
            provider,
            identifier,
            &secrets::sha256_hex(&code),
            OtpType::Otp,
            json!({ "delivery": "webhook" }),
            expires_at,
        )
        .await?;

    // Challenge delivery is part of the operation's contract, not a
    // fire-and-forget side effect; its failure surfaces to the caller.
    sender
        .send(
            delivery_url,
            webhook_secret,
            &json!({
                "type": "otp",
                "provider": provider,
                "identifier": identifier,
                "code": code,
            }),
        )
        .await
}

/// Verify a presented code. The record is deleted on success and on attempt
/// exhaustion; a mismatch increments the attempt counter.
pub async fn verify_challenge(
    store: &dyn AuthBackend,
    provider: &str,
    identifier: &str,
    code: &str,
) -> Result<ChallengeProfile, AuthError> {
    let record = store
        .find_active_otp(provider, identifier, OtpType::Otp)
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;

    if record.attempts >= MAX_VERIFY_ATTEMPTS {
        store.delete_otp(record.id).await?;
        tracing::warn!(provider, identifier, "challenge destroyed after attempt exhaustion");
        return Err(AuthError::TooManyAttempts);
    }

    if record.code_hash != secrets::sha256_hex(code) {
        store.increment_otp_attempts(record.id).await?;
        return Err(AuthError::InvalidCode);
    }

    store.delete_otp(record.id).await?;
    Ok(ChallengeProfile {
        provider: record.provider,
        identifier: record.identifier,
        metadata: record.metadata,
    })
}

/// Issue a single-use link token (magic link / recovery / signup verify).
/// Returns the raw token for URL embedding; only its digest is stored.
pub async fn issue_link_token(
    store: &dyn AuthBackend,
    email: &str,
    otp_type: OtpType,
    expiry_secs: i64,
) -> Result<String, AuthError> {
    let raw = secrets::link_token();
    let expires_at = Utc::now() + Duration::seconds(expiry_secs);
    store
        .replace_otp(
            "email",
            email,
            &secrets::sha256_hex(&raw),
            otp_type,
            json!({}),
            expires_at,
        )
        .await?;
    Ok(raw)
}

/// Redeem a link token by digest. Single use: the row is deleted before the
/// resolved record is returned.
pub async fn verify_link_token(
    store: &dyn AuthBackend,
    raw_token: &str,
    otp_type: OtpType,
) -> Result<OtpCode, AuthError> {
    let record = store
        .find_otp_by_hash(&secrets::sha256_hex(raw_token), otp_type)
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;

    store.delete_otp(record.id).await?;
    Ok(record)
}
