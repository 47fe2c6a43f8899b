use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub counters: CounterConfig,
    pub security: SecurityConfig,
    pub limits: LimitConfig,
    pub lockout: LockoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Database endpoints and pool admission settings.
///
/// `pooled_url` points at the platform's connection multiplexer; `direct_url`
/// bypasses it and is required for listen/notify subscribers. Both are
/// templates whose path segment is swapped for the tenant database name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub pooled_url: String,
    pub direct_url: String,
    /// Hard cap on the sum of pool sizes across every tenant entry.
    pub global_connection_ceiling: u32,
    /// Default per-pool max size when the caller does not ask for one.
    pub default_pool_size: u32,
    /// Idle seconds before the on-demand reaper treats an entry as cold.
    pub reap_idle_secs: u64,
    /// Idle seconds before the background sweep destroys an entry outright.
    pub sweep_idle_secs: u64,
    /// Seconds between background sweep runs.
    pub sweep_interval_secs: u64,
    pub default_statement_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_expiry_secs: u64,
    pub refresh_expiry_days: i64,
    /// Tenants created without an explicit setting inherit this.
    pub require_email_confirmation: bool,
    pub site_url: Option<String>,
    /// External templated-email dispatcher; email side effects are dropped
    /// with a log line when unset.
    pub email_dispatcher_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub enabled: bool,
    /// Platform default when no rule matches a route.
    pub default_rate: u32,
    pub default_burst: u32,
    pub default_window_secs: u64,
    pub rule_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    pub strategy: LockoutStrategy,
    pub max_attempts: u32,
    pub failure_window_secs: u64,
    pub lockout_secs: u64,
    /// Behavior when the counter store is unreachable.
    pub fail_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockoutStrategy {
    Ip,
    Email,
    Hybrid,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Environment-tier defaults first, specific env vars win.
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.pooled_url = v;
        }
        if let Ok(v) = env::var("DATABASE_DIRECT_URL") {
            self.database.direct_url = v;
        } else if self.database.direct_url.is_empty() {
            self.database.direct_url = self.database.pooled_url.clone();
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_CEILING") {
            self.database.global_connection_ceiling =
                v.parse().unwrap_or(self.database.global_connection_ceiling);
        }
        if let Ok(v) = env::var("DATABASE_DEFAULT_POOL_SIZE") {
            self.database.default_pool_size = v.parse().unwrap_or(self.database.default_pool_size);
        }
        if let Ok(v) = env::var("DATABASE_REAP_IDLE_SECS") {
            self.database.reap_idle_secs = v.parse().unwrap_or(self.database.reap_idle_secs);
        }
        if let Ok(v) = env::var("DATABASE_SWEEP_IDLE_SECS") {
            self.database.sweep_idle_secs = v.parse().unwrap_or(self.database.sweep_idle_secs);
        }
        if let Ok(v) = env::var("DATABASE_STATEMENT_TIMEOUT_MS") {
            self.database.default_statement_timeout_ms = v
                .parse()
                .unwrap_or(self.database.default_statement_timeout_ms);
        }

        if let Ok(v) = env::var("REDIS_URL") {
            self.counters.redis_url = Some(v);
        }

        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_AUDIENCE") {
            self.security.jwt_audience = v;
        }
        if let Ok(v) = env::var("JWT_EXPIRY_SECS") {
            self.security.jwt_expiry_secs = v.parse().unwrap_or(self.security.jwt_expiry_secs);
        }
        if let Ok(v) = env::var("REFRESH_EXPIRY_DAYS") {
            self.security.refresh_expiry_days =
                v.parse().unwrap_or(self.security.refresh_expiry_days);
        }
        if let Ok(v) = env::var("REQUIRE_EMAIL_CONFIRMATION") {
            self.security.require_email_confirmation =
                v.parse().unwrap_or(self.security.require_email_confirmation);
        }
        if let Ok(v) = env::var("SITE_URL") {
            self.security.site_url = Some(v);
        }
        if let Ok(v) = env::var("EMAIL_DISPATCHER_URL") {
            self.security.email_dispatcher_url = Some(v);
        }

        if let Ok(v) = env::var("RATE_LIMIT_ENABLED") {
            self.limits.enabled = v.parse().unwrap_or(self.limits.enabled);
        }
        if let Ok(v) = env::var("RATE_LIMIT_DEFAULT") {
            self.limits.default_rate = v.parse().unwrap_or(self.limits.default_rate);
        }
        if let Ok(v) = env::var("RATE_LIMIT_WINDOW_SECS") {
            self.limits.default_window_secs =
                v.parse().unwrap_or(self.limits.default_window_secs);
        }

        if let Ok(v) = env::var("LOCKOUT_STRATEGY") {
            self.lockout.strategy = match v.as_str() {
                "ip" => LockoutStrategy::Ip,
                "email" => LockoutStrategy::Email,
                _ => LockoutStrategy::Hybrid,
            };
        }
        if let Ok(v) = env::var("LOCKOUT_MAX_ATTEMPTS") {
            self.lockout.max_attempts = v.parse().unwrap_or(self.lockout.max_attempts);
        }
        if let Ok(v) = env::var("LOCKOUT_DURATION_SECS") {
            self.lockout.lockout_secs = v.parse().unwrap_or(self.lockout.lockout_secs);
        }
        if let Ok(v) = env::var("LOCKOUT_FAIL_CLOSED") {
            self.lockout.fail_closed = v.parse().unwrap_or(self.lockout.fail_closed);
        }

        self
    }

    fn base(environment: Environment) -> Self {
        Self {
            environment,
            database: DatabaseConfig {
                pooled_url: String::new(),
                direct_url: String::new(),
                global_connection_ceiling: 200,
                default_pool_size: 10,
                reap_idle_secs: 300,
                sweep_idle_secs: 1800,
                sweep_interval_secs: 300,
                default_statement_timeout_ms: 10_000,
            },
            counters: CounterConfig { redis_url: None },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_audience: "authenticated".to_string(),
                jwt_expiry_secs: 3600,
                refresh_expiry_days: 30,
                require_email_confirmation: true,
                site_url: None,
                email_dispatcher_url: None,
            },
            limits: LimitConfig {
                enabled: true,
                default_rate: 50,
                default_burst: 0,
                default_window_secs: 60,
                rule_refresh_secs: 60,
            },
            lockout: LockoutConfig {
                strategy: LockoutStrategy::Hybrid,
                max_attempts: 5,
                failure_window_secs: 3600,
                lockout_secs: 900,
                fail_closed: false,
            },
        }
    }

    fn development() -> Self {
        let mut cfg = Self::base(Environment::Development);
        cfg.limits.enabled = false;
        cfg.security.require_email_confirmation = false;
        cfg.database.global_connection_ceiling = 40;
        cfg
    }

    fn staging() -> Self {
        let mut cfg = Self::base(Environment::Staging);
        cfg.database.global_connection_ceiling = 100;
        cfg
    }

    fn production() -> Self {
        Self::base(Environment::Production)
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
