use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuthError;

/// How strictly the provider-supplied replay nonce is checked.
///
/// `Presence` only requires the claim to exist, mirroring the lenient
/// reference behavior; `Strict` compares it against the value the caller
/// stored at authorization time. Tightening the default would break
/// non-OIDC-compliant clients the platform accommodates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceCheck {
    Disabled,
    Presence,
    Strict,
}

/// Per-provider OAuth configuration, validated at load time.
///
/// The id-token grant only needs `client_ids` and `verify_url`; the
/// browser-redirect code flow additionally requires the `authorize_url`,
/// `token_url`, `client_secret`, and `redirect_url` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub name: String,
    /// Client ids registered for this tenant; the token audience must be
    /// one of them.
    pub client_ids: Vec<String>,
    /// Provider endpoint that validates an id token and returns its claims.
    pub verify_url: String,
    pub nonce_check: NonceCheck,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Callback registered with the provider, pointing back at this service.
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<String>,
}

impl OAuthProviderConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.name.is_empty() {
            return Err(AuthError::ProviderMisconfigured("empty provider name".into()));
        }
        if self.client_ids.is_empty() {
            return Err(AuthError::ProviderMisconfigured(format!(
                "{}: no client ids registered",
                self.name
            )));
        }
        if url::Url::parse(&self.verify_url).is_err() {
            return Err(AuthError::ProviderMisconfigured(format!(
                "{}: invalid verify url",
                self.name
            )));
        }
        Ok(())
    }
}

/// Provider-asserted identity after claim validation.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub profile: Value,
}

/// Validate the claims object returned by the provider's verification
/// endpoint. The audience check is the primary anti-forgery control.
pub fn validate_claims(
    cfg: &OAuthProviderConfig,
    claims: &Value,
    expected_nonce: Option<&str>,
) -> Result<VerifiedIdentity, AuthError> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::InvalidOrExpiredToken)?;

    let audience = claims
        .get("aud")
        .and_then(Value::as_str)
        .ok_or(AuthError::InvalidOrExpiredToken)?;
    if !cfg.client_ids.iter().any(|id| id == audience) {
        return Err(AuthError::InvalidOrExpiredToken);
    }

    match cfg.nonce_check {
        NonceCheck::Disabled => {}
        NonceCheck::Presence => {
            if claims.get("nonce").and_then(Value::as_str).is_none() {
                return Err(AuthError::InvalidOrExpiredToken);
            }
        }
        NonceCheck::Strict => {
            let nonce = claims.get("nonce").and_then(Value::as_str);
            if nonce.is_none() || nonce != expected_nonce {
                return Err(AuthError::InvalidOrExpiredToken);
            }
        }
    }

    Ok(VerifiedIdentity {
        provider: cfg.name.clone(),
        subject: subject.to_string(),
        email: claims
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string),
        profile: claims.clone(),
    })
}

/// Round-trip claims carried through the code flow's `state` parameter as a
/// short-lived signed token, so the callback can recover the provider and
/// nonce without server-side storage.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlowState {
    pub provider: String,
    pub nonce: String,
    pub exp: i64,
}

const FLOW_STATE_TTL_SECS: i64 = 600;

pub fn encode_flow_state(provider: &str, nonce: &str, secret: &str) -> Result<String, AuthError> {
    let claims = FlowState {
        provider: provider.to_string(),
        nonce: nonce.to_string(),
        exp: chrono::Utc::now().timestamp() + FLOW_STATE_TTL_SECS,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::ProviderMisconfigured(e.to_string()))
}

pub fn decode_flow_state(state: &str, secret: &str) -> Result<FlowState, AuthError> {
    let mut validation = jsonwebtoken::Validation::default();
    validation.validate_aud = false;
    jsonwebtoken::decode::<FlowState>(
        state,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidOrExpiredToken)
}

/// Build the provider authorization redirect for the code flow.
pub fn authorize_url(cfg: &OAuthProviderConfig, state: &str, nonce: &str) -> Result<String, AuthError> {
    cfg.validate()?;
    let base = cfg
        .authorize_url
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{}: no authorize url", cfg.name)))?;
    let redirect = cfg
        .redirect_url
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{}: no redirect url", cfg.name)))?;

    let mut url = url::Url::parse(base)
        .map_err(|_| AuthError::ProviderMisconfigured(format!("{}: invalid authorize url", cfg.name)))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &cfg.client_ids[0])
        .append_pair("redirect_uri", redirect)
        .append_pair("state", state)
        .append_pair("nonce", nonce)
        .append_pair("scope", cfg.scopes.as_deref().unwrap_or("openid email profile"));
    Ok(url.into())
}

/// Finish the code flow: exchange the authorization code for an id token,
/// then validate it like the direct id-token grant.
pub async fn exchange_code(
    client: &reqwest::Client,
    cfg: &OAuthProviderConfig,
    code: &str,
    expected_nonce: &str,
) -> Result<VerifiedIdentity, AuthError> {
    cfg.validate()?;
    let token_url = cfg
        .token_url
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{}: no token url", cfg.name)))?;
    let redirect = cfg
        .redirect_url
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{}: no redirect url", cfg.name)))?;
    let secret = cfg
        .client_secret
        .as_deref()
        .ok_or_else(|| AuthError::ProviderMisconfigured(format!("{}: no client secret", cfg.name)))?;

    let response = client
        .post(token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", cfg.client_ids[0].as_str()),
            ("client_secret", secret),
            ("redirect_uri", redirect),
        ])
        .send()
        .await
        .map_err(|e| AuthError::UpstreamProvider(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthError::InvalidOrExpiredToken);
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| AuthError::UpstreamProvider(e.to_string()))?;
    let id_token = body
        .get("id_token")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::UpstreamProvider(format!("{}: token response missing id_token", cfg.name)))?;

    verify_id_token(client, cfg, id_token, Some(expected_nonce)).await
}

/// Exchange an id token for verified claims at the provider endpoint, then
/// validate them locally.
pub async fn verify_id_token(
    client: &reqwest::Client,
    cfg: &OAuthProviderConfig,
    id_token: &str,
    expected_nonce: Option<&str>,
) -> Result<VerifiedIdentity, AuthError> {
    cfg.validate()?;

    let response = client
        .get(&cfg.verify_url)
        .query(&[("id_token", id_token)])
        .send()
        .await
        .map_err(|e| AuthError::UpstreamProvider(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthError::InvalidOrExpiredToken);
    }

    let claims: Value = response
        .json()
        .await
        .map_err(|e| AuthError::UpstreamProvider(e.to_string()))?;

    validate_claims(cfg, &claims, expected_nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(nonce_check: NonceCheck) -> OAuthProviderConfig {
        OAuthProviderConfig {
            name: "acme-id".to_string(),
            client_ids: vec!["client-1".to_string(), "client-2".to_string()],
            verify_url: "https://id.acme.test/verify".to_string(),
            nonce_check,
            authorize_url: Some("https://id.acme.test/authorize".to_string()),
            token_url: Some("https://id.acme.test/token".to_string()),
            client_secret: Some("s3cret".to_string()),
            redirect_url: Some("https://api.acme.test/auth/v1/callback".to_string()),
            scopes: None,
        }
    }

    #[test]
    fn accepts_registered_audience() {
        let claims = json!({"sub": "u-1", "aud": "client-2", "email": "a@b.com"});
        let id = validate_claims(&provider(NonceCheck::Disabled), &claims, None).unwrap();
        assert_eq!(id.subject, "u-1");
        assert_eq!(id.email.as_deref(), Some("a@b.com"));
        assert_eq!(id.provider, "acme-id");
    }

    #[test]
    fn rejects_foreign_audience() {
        let claims = json!({"sub": "u-1", "aud": "someone-elses-client"});
        assert!(matches!(
            validate_claims(&provider(NonceCheck::Disabled), &claims, None),
            Err(AuthError::InvalidOrExpiredToken)
        ));
    }

    #[test]
    fn rejects_missing_subject() {
        let claims = json!({"aud": "client-1"});
        assert!(validate_claims(&provider(NonceCheck::Disabled), &claims, None).is_err());
    }

    #[test]
    fn presence_mode_only_requires_nonce_to_exist() {
        let cfg = provider(NonceCheck::Presence);
        let with_nonce = json!({"sub": "u", "aud": "client-1", "nonce": "whatever"});
        // Presence mode does not compare values.
        assert!(validate_claims(&cfg, &with_nonce, Some("different")).is_ok());

        let without = json!({"sub": "u", "aud": "client-1"});
        assert!(validate_claims(&cfg, &without, None).is_err());
    }

    #[test]
    fn strict_mode_compares_nonce_values() {
        let cfg = provider(NonceCheck::Strict);
        let claims = json!({"sub": "u", "aud": "client-1", "nonce": "n-123"});
        assert!(validate_claims(&cfg, &claims, Some("n-123")).is_ok());
        assert!(validate_claims(&cfg, &claims, Some("n-456")).is_err());
        assert!(validate_claims(&cfg, &claims, None).is_err());
    }

    #[test]
    fn flow_state_round_trips_and_rejects_tampering() {
        let state = encode_flow_state("acme-id", "n-777", "signing-secret").unwrap();
        let decoded = decode_flow_state(&state, "signing-secret").unwrap();
        assert_eq!(decoded.provider, "acme-id");
        assert_eq!(decoded.nonce, "n-777");

        assert!(decode_flow_state(&state, "other-secret").is_err());
        assert!(decode_flow_state("garbage", "signing-secret").is_err());
    }

    #[test]
    fn authorize_url_carries_code_flow_parameters() {
        let cfg = provider(NonceCheck::Presence);
        let url = authorize_url(&cfg, "st-1", "n-1").unwrap();
        assert!(url.starts_with("https://id.acme.test/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("state=st-1"));
        assert!(url.contains("nonce=n-1"));
    }

    #[test]
    fn authorize_url_requires_code_flow_endpoints() {
        let mut cfg = provider(NonceCheck::Presence);
        cfg.authorize_url = None;
        assert!(matches!(
            authorize_url(&cfg, "st", "n"),
            Err(AuthError::ProviderMisconfigured(_))
        ));
    }

    #[test]
    fn config_validation_catches_misconfiguration() {
        let mut cfg = provider(NonceCheck::Disabled);
        assert!(cfg.validate().is_ok());

        cfg.client_ids.clear();
        assert!(matches!(
            cfg.validate(),
            Err(AuthError::ProviderMisconfigured(_))
        ));

        let mut cfg = provider(NonceCheck::Disabled);
        cfg.verify_url = "not a url".to_string();
        assert!(cfg.validate().is_err());
    }
}
