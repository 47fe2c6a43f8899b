//! Signup and the closed set of login methods.

use serde_json::{json, Value};

use crate::auth::{password, secrets};
use crate::database::models::{OtpType, User};
use crate::error::AuthError;
use crate::services::{oauth, otp, outbound};
use crate::store::{AuthBackend, NewAccount};
use crate::tenant::TenantCtx;

/// One of the supported login methods, each with its own validation and
/// resolution path behind a common `resolve` entry point.
#[derive(Debug, Clone)]
pub enum LoginMethod {
    Password { email: String, password: String },
    OAuthIdToken { provider: String, id_token: String, nonce: Option<String> },
    PasswordlessOtp { provider: String, identifier: String, code: String },
    MagicLink { token: String },
}

pub struct SignupOutcome {
    pub user: User,
    /// Set when the tenant requires confirmation; the session is withheld
    /// until the emailed token comes back through the verify endpoint.
    pub pending_confirmation: bool,
}

/// Create an account with an email identity.
pub async fn signup(
    store: &dyn AuthBackend,
    tenant: &TenantCtx,
    dispatcher: &outbound::Dispatcher,
    email: &str,
    secret: &str,
    metadata: Option<Value>,
) -> Result<SignupOutcome, AuthError> {
    if store.find_identity("email", email).await?.is_some() {
        return Err(AuthError::AlreadyExists);
    }

    let require_confirmation = tenant.settings.require_email_confirmation;
    let confirmation_token = require_confirmation.then(secrets::link_token);
    let password_hash = password::hash_password(secret)?;

    let user = store
        .create_account(NewAccount {
            email,
            password_hash: Some(&password_hash),
            metadata: metadata.unwrap_or_else(|| json!({})),
            provider: "email",
            identifier: email,
            provider_data: json!({}),
            confirmation_token: confirmation_token.as_deref(),
            confirmed: !require_confirmation,
        })
        .await?;

    if let Some(token) = confirmation_token {
        dispatcher.enqueue(outbound::OutboundEvent::ConfirmationEmail {
            tenant: tenant.id.clone(),
            email: email.to_string(),
            token,
        });
    } else if tenant.settings.send_welcome_email {
        dispatcher.enqueue(outbound::OutboundEvent::WelcomeEmail {
            tenant: tenant.id.clone(),
            email: email.to_string(),
        });
    }

    Ok(SignupOutcome {
        user,
        pending_confirmation: require_confirmation,
    })
}

/// Resolve a login method to its user, applying each method's own checks.
/// The caller issues the session afterwards.
pub async fn resolve(
    store: &dyn AuthBackend,
    tenant: &TenantCtx,
    http: &reqwest::Client,
    method: LoginMethod,
) -> Result<User, AuthError> {
    match method {
        LoginMethod::Password { email, password } => {
            resolve_password(store, tenant, &email, &password).await
        }
        LoginMethod::OAuthIdToken { provider, id_token, nonce } => {
            let cfg = tenant
                .find_provider(&provider)
                .ok_or_else(|| AuthError::ProviderMisconfigured(provider.clone()))?;
            let verified =
                oauth::verify_id_token(http, cfg, &id_token, nonce.as_deref()).await?;
            store
                .upsert_external_identity(
                    &verified.provider,
                    &verified.subject,
                    verified.email.as_deref(),
                    verified.profile,
                )
                .await
        }
        LoginMethod::PasswordlessOtp { provider, identifier, code } => {
            let profile = otp::verify_challenge(store, &provider, &identifier, &code).await?;
            store
                .upsert_external_identity(
                    &profile.provider,
                    &profile.identifier,
                    profile.provider.eq("email").then_some(profile.identifier.as_str()),
                    profile.metadata,
                )
                .await
        }
        LoginMethod::MagicLink { token } => {
            let record = otp::verify_link_token(store, &token, OtpType::Magiclink).await?;
            let user = store
                .find_user_by_email(&record.identifier)
                .await?
                .ok_or(AuthError::InvalidOrExpiredToken)?;
            Ok(user)
        }
    }
}

/// Password login with a constant failure contract: a missing identity and
/// a wrong password are indistinguishable to the caller.
async fn resolve_password(
    store: &dyn AuthBackend,
    tenant: &TenantCtx,
    email: &str,
    candidate: &str,
) -> Result<User, AuthError> {
    let identity = store.find_identity("email", email).await?;

    let (user_id, verified) = match &identity {
        Some(identity) => {
            let stored = identity.password_hash.as_deref().unwrap_or("");
            (Some(identity.user_id), password::verify_password(candidate, stored))
        }
        None => {
            // Burn a verification anyway so the miss path does not return
            // observably faster than a wrong password.
            let _ = password::verify_password(candidate, "");
            (None, false)
        }
    };

    if !verified {
        return Err(AuthError::InvalidCredentials);
    }
    let user_id = user_id.ok_or(AuthError::InvalidCredentials)?;

    let user = store
        .find_user(user_id)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if user.banned {
        return Err(AuthError::Banned);
    }
    if tenant.settings.require_email_confirmation && !user.is_confirmed() {
        return Err(AuthError::EmailNotConfirmed);
    }

    store.update_last_sign_in(user.id).await?;
    Ok(user)
}

/// Post-login side effects, queued without awaiting delivery.
pub fn queue_login_effects(tenant: &TenantCtx, dispatcher: &outbound::Dispatcher, user: &User) {
    let email = match &user.email {
        Some(email) => email.clone(),
        None => return,
    };

    if tenant.settings.send_login_alerts {
        dispatcher.enqueue(outbound::OutboundEvent::LoginAlert {
            tenant: tenant.id.clone(),
            email: email.clone(),
        });
    }
    if let Some(url) = &tenant.settings.login_webhook_url {
        dispatcher.enqueue(outbound::OutboundEvent::LoginWebhook {
            tenant: tenant.id.clone(),
            url: url.clone(),
            secret: tenant.settings.webhook_secret.clone(),
            payload: json!({
                "event": "user.signed_in",
                "user_id": user.id,
                "email": email,
            }),
        });
    }
}
