use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::services::oauth::OAuthProviderConfig;

/// One resolved tenant: routing target plus its effective auth settings.
///
/// The platform router injects the tenant id on every request; settings come
/// from platform defaults overlaid with the tenant's stored configuration.
#[derive(Debug, Clone)]
pub struct TenantCtx {
    pub id: String,
    pub database: String,
    pub settings: TenantSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    pub require_email_confirmation: bool,
    pub send_welcome_email: bool,
    pub send_login_alerts: bool,
    pub login_webhook_url: Option<String>,
    pub webhook_secret: String,
    pub otp: OtpSettings,
    pub oauth_providers: Vec<OAuthProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSettings {
    pub charset: String,
    pub length: usize,
    pub expiry_secs: i64,
    /// Optional identifier validation pattern (e.g. phone number shape).
    pub identifier_pattern: Option<String>,
    /// Tenant endpoint that receives the signed challenge payload.
    pub delivery_url: Option<String>,
}

impl Default for OtpSettings {
    fn default() -> Self {
        Self {
            charset: "0123456789".to_string(),
            length: 6,
            expiry_secs: 300,
            identifier_pattern: None,
            delivery_url: None,
        }
    }
}

impl TenantCtx {
    pub fn new(id: String, settings: TenantSettings) -> Self {
        let database = database_name(&id);
        Self { id, database, settings }
    }

    pub fn find_provider(&self, name: &str) -> Option<&OAuthProviderConfig> {
        self.settings
            .oauth_providers
            .iter()
            .find(|p| p.name == name)
    }
}

impl TenantSettings {
    pub fn platform_defaults(require_email_confirmation: bool) -> Self {
        Self {
            require_email_confirmation,
            send_welcome_email: false,
            send_login_alerts: false,
            login_webhook_url: None,
            webhook_secret: String::new(),
            otp: OtpSettings::default(),
            oauth_providers: Vec::new(),
        }
    }
}

/// How long a fetched settings row stays good before the control database
/// is consulted again.
const SETTINGS_TTL: Duration = Duration::from_secs(60);

struct CachedSettings {
    settings: TenantSettings,
    fetched_at: Instant,
    /// Primed entries never expire; provisioning owns their lifecycle.
    pinned: bool,
}

/// Resolves tenant ids to their effective settings.
///
/// Settings live as a jsonb document per tenant in the platform control
/// database and are cached in-process under a short TTL. Any miss or
/// control-plane error falls back to platform defaults, so admission never
/// blocks on the directory.
pub struct TenantDirectory {
    control: Option<PgPool>,
    defaults: TenantSettings,
    cache: RwLock<HashMap<String, CachedSettings>>,
}

impl TenantDirectory {
    pub fn new(control: Option<PgPool>, defaults: TenantSettings) -> Self {
        Self {
            control,
            defaults,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Install settings directly, bypassing the control database. Used at
    /// tenant provisioning time and when settings change mid-flight.
    pub async fn prime(&self, tenant_id: impl Into<String>, settings: TenantSettings) {
        self.cache.write().await.insert(
            tenant_id.into(),
            CachedSettings {
                settings,
                fetched_at: Instant::now(),
                pinned: true,
            },
        );
    }

    pub async fn resolve(&self, tenant_id: &str) -> TenantCtx {
        if let Some(cached) = self.cache.read().await.get(tenant_id) {
            if cached.pinned || cached.fetched_at.elapsed() < SETTINGS_TTL {
                return TenantCtx::new(tenant_id.to_string(), cached.settings.clone());
            }
        }

        let settings = match self.fetch(tenant_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => self.defaults.clone(),
            Err(e) => {
                tracing::warn!(tenant = tenant_id, "tenant settings lookup failed: {}", e);
                self.defaults.clone()
            }
        };

        self.cache.write().await.insert(
            tenant_id.to_string(),
            CachedSettings {
                settings: settings.clone(),
                fetched_at: Instant::now(),
                pinned: false,
            },
        );
        TenantCtx::new(tenant_id.to_string(), settings)
    }

    async fn fetch(&self, tenant_id: &str) -> Result<Option<TenantSettings>, sqlx::Error> {
        let Some(pool) = &self.control else {
            return Ok(None);
        };
        let row: Option<sqlx::types::Json<TenantSettings>> = sqlx::query_scalar(
            "SELECT settings FROM platform.tenant_settings WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|json| json.0))
    }
}

/// Derive the tenant database name from the tenant id: stable, collision
/// resistant, and always a valid identifier.
pub fn database_name(tenant_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("tenant_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::services::oauth::NonceCheck;

    fn settings_with_provider(name: &str) -> TenantSettings {
        let mut settings = TenantSettings::platform_defaults(true);
        settings.webhook_secret = "tenant-secret".to_string();
        settings.otp.delivery_url = Some("https://acme.example.com/sms".to_string());
        settings.oauth_providers.push(OAuthProviderConfig {
            name: name.to_string(),
            client_ids: vec!["client-1".to_string()],
            verify_url: "https://idp.example.com/verify".to_string(),
            nonce_check: NonceCheck::Presence,
            authorize_url: None,
            token_url: None,
            client_secret: None,
            redirect_url: None,
            scopes: None,
        });
        settings
    }

    #[tokio::test]
    async fn primed_settings_drive_resolution() {
        let directory =
            TenantDirectory::new(None, TenantSettings::platform_defaults(true));
        directory.prime("acme", settings_with_provider("github")).await;

        let tenant = directory.resolve("acme").await;
        assert!(tenant.find_provider("github").is_some());
        assert_eq!(tenant.settings.webhook_secret, "tenant-secret");
        assert!(tenant.settings.otp.delivery_url.is_some());
        assert_eq!(tenant.database, database_name("acme"));
    }

    #[tokio::test]
    async fn unknown_tenants_get_platform_defaults() {
        let directory =
            TenantDirectory::new(None, TenantSettings::platform_defaults(false));
        let tenant = directory.resolve("nobody").await;
        assert!(tenant.settings.oauth_providers.is_empty());
        assert!(!tenant.settings.require_email_confirmation);
        assert!(tenant.settings.webhook_secret.is_empty());
    }

    #[test]
    fn database_name_is_stable_and_valid() {
        let a = database_name("acme");
        let b = database_name("acme");
        assert_eq!(a, b);
        assert!(a.starts_with("tenant_"));
        assert_eq!(a.len(), "tenant_".len() + 16);
        assert_ne!(database_name("acme"), database_name("acme2"));
    }
}
