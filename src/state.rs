use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::manager::{PoolManager, PoolOptions};
use crate::error::AuthError;
use crate::guard::counter::{CounterStore, MemoryCounterStore, RedisCounterStore};
use crate::guard::lockout::{LockoutGuard, PanicSwitch};
use crate::guard::rate_limit::RateLimiter;
use crate::guard::rules::RuleCache;
use crate::services::outbound::{Dispatcher, HttpWebhookSender, WebhookSender};
use crate::store::AuthStore;
use crate::tenant::{TenantCtx, TenantDirectory, TenantSettings};

/// Composition root: every process-wide registry lives here and is passed
/// by reference; nothing hides in module-level statics.
pub struct AppState {
    pub config: &'static AppConfig,
    pub pools: Arc<PoolManager>,
    pub limiter: RateLimiter,
    pub lockout: LockoutGuard,
    pub panic: PanicSwitch,
    pub rules: RuleCache,
    pub tenants: TenantDirectory,
    /// Control database handle shared by the tenant directory and the rate
    /// rule refresher. Lazy; absent only when the url fails to parse.
    pub control: Option<sqlx::PgPool>,
    pub dispatcher: Dispatcher,
    pub webhooks: Arc<dyn WebhookSender>,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn build(config: &'static AppConfig) -> Arc<Self> {
        let counters: Arc<dyn CounterStore> = match &config.counters.redis_url {
            Some(url) => match RedisCounterStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    // Guards fail open by policy, so serving without the
                    // store is still correct, just unenforced.
                    tracing::error!("counter store unavailable at startup: {}", e);
                    Arc::new(MemoryCounterStore::new())
                }
            },
            None => {
                tracing::warn!("REDIS_URL not set, using in-process counters");
                Arc::new(MemoryCounterStore::new())
            }
        };

        let webhooks: Arc<dyn WebhookSender> = Arc::new(HttpWebhookSender::new());
        let pools = Arc::new(PoolManager::new(config.database.clone()));
        let _sweeper = pools.spawn_sweeper();

        let control = match sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(&config.database.pooled_url)
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::error!("control database url rejected: {}", e);
                None
            }
        };
        let tenants = TenantDirectory::new(
            control.clone(),
            TenantSettings::platform_defaults(config.security.require_email_confirmation),
        );

        Arc::new(Self {
            config,
            pools,
            limiter: RateLimiter::new(Arc::clone(&counters), config.limits.clone()),
            lockout: LockoutGuard::new(Arc::clone(&counters), config.lockout.clone()),
            panic: PanicSwitch::new(counters),
            rules: RuleCache::new(),
            tenants,
            control,
            dispatcher: Dispatcher::spawn(
                Arc::clone(&webhooks),
                config.security.email_dispatcher_url.clone(),
            ),
            webhooks,
            http: reqwest::Client::new(),
        })
    }

    /// Pooled store handle for a tenant's auth schema.
    pub async fn tenant_store(&self, tenant: &TenantCtx) -> Result<AuthStore, AuthError> {
        let pool = self
            .pools
            .acquire(&tenant.database, &PoolOptions::default())
            .await?;
        Ok(AuthStore::new(pool))
    }
}
