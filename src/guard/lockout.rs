use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{LockoutConfig, LockoutStrategy};
use crate::error::GuardError;
use crate::guard::counter::CounterStore;

/// Brute-force lockout guard, stricter than the general limiter and scoped
/// to login attempts. Tracks failure counters per ip and/or email; on
/// reaching the threshold a lock key is set and the counter resets.
///
/// Posture on counter-store outage is configurable; the default is
/// fail-open like the general limiter.
pub struct LockoutGuard {
    store: Arc<dyn CounterStore>,
    cfg: LockoutConfig,
}

impl LockoutGuard {
    pub fn new(store: Arc<dyn CounterStore>, cfg: LockoutConfig) -> Self {
        Self { store, cfg }
    }

    fn scopes(&self, tenant: &str, ip: &str, email: &str) -> Vec<String> {
        let mut scopes = Vec::with_capacity(2);
        if matches!(self.cfg.strategy, LockoutStrategy::Ip | LockoutStrategy::Hybrid) {
            scopes.push(format!("{}:ip:{}", tenant, ip));
        }
        if matches!(self.cfg.strategy, LockoutStrategy::Email | LockoutStrategy::Hybrid) {
            scopes.push(format!("{}:email:{}", tenant, email.to_lowercase()));
        }
        scopes
    }

    /// Deny the login attempt outright when any tracked scope is locked.
    pub async fn check(&self, tenant: &str, ip: &str, email: &str) -> Result<(), GuardError> {
        for scope in self.scopes(tenant, ip, email) {
            match self.store.flag_exists(&format!("lock:{}", scope)).await {
                Ok(true) => return Err(GuardError::LockedOut),
                Ok(false) => {}
                Err(e) => {
                    if self.cfg.fail_closed {
                        warn!("counter store unavailable, denying login (fail-closed): {}", e);
                        return Err(GuardError::LockedOut);
                    }
                    warn!("counter store unavailable, skipping lockout check: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Record a failed login. On reaching the attempt threshold within the
    /// accumulation window, lock the scope and reset its counter.
    pub async fn register_failure(&self, tenant: &str, ip: &str, email: &str) {
        for scope in self.scopes(tenant, ip, email) {
            let fail_key = format!("fail:{}", scope);
            match self
                .store
                .incr_with_window(&fail_key, self.cfg.failure_window_secs)
                .await
            {
                Ok((count, _)) if count >= self.cfg.max_attempts as u64 => {
                    info!(scope = %scope, count, "lockout threshold reached");
                    if let Err(e) = self
                        .store
                        .set_flag(&format!("lock:{}", scope), Some(self.cfg.lockout_secs))
                        .await
                    {
                        warn!("failed to set lock key: {}", e);
                    }
                    if let Err(e) = self.store.delete(&fail_key).await {
                        warn!("failed to reset failure counter: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("failed to record login failure: {}", e),
            }
        }
    }

    /// Successful login clears both scopes' failure counters.
    pub async fn clear_failures(&self, tenant: &str, ip: &str, email: &str) {
        for scope in self.scopes(tenant, ip, email) {
            if let Err(e) = self.store.delete(&format!("fail:{}", scope)).await {
                warn!("failed to clear failure counter: {}", e);
            }
        }
    }
}

/// Per-tenant kill switch, checked ahead of all other admission logic.
/// Toggling is a tenant-owner action outside this plane's contract.
pub struct PanicSwitch {
    store: Arc<dyn CounterStore>,
}

impl PanicSwitch {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub async fn is_suspended(&self, tenant: &str) -> bool {
        match self.store.flag_exists(&format!("panic:{}", tenant)).await {
            Ok(v) => v,
            Err(e) => {
                warn!("counter store unavailable, assuming tenant not suspended: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::counter::{CounterError, MemoryCounterStore};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn incr_with_window(&self, _: &str, _: u64) -> Result<(u64, u64), CounterError> {
            Err(CounterError::Unreachable("down".into()))
        }
        async fn set_flag(&self, _: &str, _: Option<u64>) -> Result<(), CounterError> {
            Err(CounterError::Unreachable("down".into()))
        }
        async fn flag_exists(&self, _: &str) -> Result<bool, CounterError> {
            Err(CounterError::Unreachable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<(), CounterError> {
            Err(CounterError::Unreachable("down".into()))
        }
    }

    fn cfg(strategy: LockoutStrategy, max_attempts: u32, fail_closed: bool) -> LockoutConfig {
        LockoutConfig {
            strategy,
            max_attempts,
            failure_window_secs: 3600,
            lockout_secs: 900,
            fail_closed,
        }
    }

    #[tokio::test]
    async fn locks_after_threshold_and_resets_counter() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = LockoutGuard::new(store, cfg(LockoutStrategy::Email, 3, false));

        for _ in 0..2 {
            guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
            assert!(guard.check("tenant_a", "1.2.3.4", "a@b.com").await.is_ok());
        }
        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;

        // Locked even from another ip: the scope is the email.
        assert!(matches!(
            guard.check("tenant_a", "9.9.9.9", "a@b.com").await,
            Err(GuardError::LockedOut)
        ));
    }

    #[tokio::test]
    async fn hybrid_tracks_both_scopes() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = LockoutGuard::new(store, cfg(LockoutStrategy::Hybrid, 2, false));

        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;

        // Same ip with a different email is still locked in hybrid mode.
        assert!(guard.check("tenant_a", "1.2.3.4", "other@b.com").await.is_err());
        // And the email is locked from any ip.
        assert!(guard.check("tenant_a", "8.8.8.8", "a@b.com").await.is_err());
    }

    #[tokio::test]
    async fn clear_failures_resets_accumulation() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = LockoutGuard::new(store, cfg(LockoutStrategy::Email, 3, false));

        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
        guard.clear_failures("tenant_a", "1.2.3.4", "a@b.com").await;

        // Window restarts: two more failures do not lock at threshold 3.
        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
        guard.register_failure("tenant_a", "1.2.3.4", "a@b.com").await;
        assert!(guard.check("tenant_a", "1.2.3.4", "a@b.com").await.is_ok());
    }

    #[tokio::test]
    async fn email_scope_is_case_insensitive() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = LockoutGuard::new(store, cfg(LockoutStrategy::Email, 2, false));

        guard.register_failure("tenant_a", "1.2.3.4", "User@B.com").await;
        guard.register_failure("tenant_a", "1.2.3.4", "user@b.com").await;
        assert!(guard.check("tenant_a", "1.2.3.4", "USER@B.COM").await.is_err());
    }

    #[tokio::test]
    async fn outage_posture_is_configurable() {
        let open = LockoutGuard::new(Arc::new(DownStore), cfg(LockoutStrategy::Hybrid, 3, false));
        assert!(open.check("tenant_a", "1.2.3.4", "a@b.com").await.is_ok());

        let closed = LockoutGuard::new(Arc::new(DownStore), cfg(LockoutStrategy::Hybrid, 3, true));
        assert!(closed.check("tenant_a", "1.2.3.4", "a@b.com").await.is_err());
    }

    #[tokio::test]
    async fn panic_switch_suspends_tenant() {
        let store = Arc::new(MemoryCounterStore::new());
        store.set_flag("panic:tenant_a", None).await.unwrap();

        let switch = PanicSwitch::new(store);
        assert!(switch.is_suspended("tenant_a").await);
        assert!(!switch.is_suspended("tenant_b").await);
    }

    #[tokio::test]
    async fn panic_switch_fails_open() {
        let switch = PanicSwitch::new(Arc::new(DownStore));
        assert!(!switch.is_suspended("tenant_a").await);
    }
}
