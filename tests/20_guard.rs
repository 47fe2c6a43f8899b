use std::sync::Arc;
use uuid::Uuid;

use gatehouse_api::config::{LimitConfig, LockoutConfig, LockoutStrategy};
use gatehouse_api::error::GuardError;
use gatehouse_api::guard::counter::{CounterStore, MemoryCounterStore};
use gatehouse_api::guard::lockout::{LockoutGuard, PanicSwitch};
use gatehouse_api::guard::rate_limit::{RateDecision, RateLimiter};
use gatehouse_api::guard::rules::{RateRule, RuleCache};

fn limit_config(rate: u32, burst: u32) -> LimitConfig {
    LimitConfig {
        enabled: true,
        default_rate: rate,
        default_burst: burst,
        default_window_secs: 60,
        rule_refresh_secs: 60,
    }
}

fn lockout_config(strategy: LockoutStrategy) -> LockoutConfig {
    LockoutConfig {
        strategy,
        max_attempts: 5,
        failure_window_secs: 3600,
        lockout_secs: 900,
        fail_closed: false,
    }
}

#[tokio::test]
async fn limiter_blocks_past_the_budget_and_reports_retry_after() {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::new(store, limit_config(2, 1));

    for _ in 0..3 {
        assert!(matches!(
            limiter.check("acme", "10.0.0.1", None).await,
            RateDecision::Allowed { .. }
        ));
    }
    match limiter.check("acme", "10.0.0.1", None).await {
        RateDecision::Blocked { retry_after_secs, .. } => assert!(retry_after_secs >= 1),
        other => panic!("expected block, got {:?}", other),
    }

    // A different client ip has its own counter.
    assert!(matches!(
        limiter.check("acme", "10.0.0.2", None).await,
        RateDecision::Allowed { .. }
    ));
}

#[tokio::test]
async fn rule_counters_are_scoped_per_rule() {
    let store = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::new(store, limit_config(100, 0));

    let tight = RateRule {
        id: Uuid::new_v4(),
        pattern: "/auth/v1/token".to_string(),
        method: "POST".to_string(),
        steady_rate: 1,
        burst_allowance: 0,
        window_secs: 60,
        custom_message: Some("login throttled".to_string()),
    };

    assert!(matches!(
        limiter.check("acme", "10.0.0.1", Some(&tight)).await,
        RateDecision::Allowed { .. }
    ));
    match limiter.check("acme", "10.0.0.1", Some(&tight)).await {
        RateDecision::Blocked { message, .. } => assert_eq!(message, "login throttled"),
        other => panic!("expected block, got {:?}", other),
    }

    // The default bucket is untouched by rule traffic.
    assert!(matches!(
        limiter.check("acme", "10.0.0.1", None).await,
        RateDecision::Allowed { .. }
    ));
}

#[tokio::test]
async fn most_specific_rule_wins() {
    let cache = RuleCache::new();
    let broad = RateRule {
        id: Uuid::new_v4(),
        pattern: "/auth/*".to_string(),
        method: "*".to_string(),
        steady_rate: 50,
        burst_allowance: 0,
        window_secs: 60,
        custom_message: None,
    };
    let narrow = RateRule {
        id: Uuid::new_v4(),
        pattern: "/auth/v1/token".to_string(),
        method: "POST".to_string(),
        steady_rate: 5,
        burst_allowance: 0,
        window_secs: 60,
        custom_message: None,
    };
    cache.replace(vec![broad.clone(), narrow.clone()]).await;

    let hit = cache.match_rule("POST", "/auth/v1/token").await.unwrap();
    assert_eq!(hit.id, narrow.id);

    let hit = cache.match_rule("GET", "/auth/v1/user").await.unwrap();
    assert_eq!(hit.id, broad.id);

    assert!(cache.match_rule("GET", "/health").await.is_none());
}

#[tokio::test]
async fn five_failures_lock_and_success_clears() {
    let store = Arc::new(MemoryCounterStore::new());
    let guard = LockoutGuard::new(store, lockout_config(LockoutStrategy::Hybrid));

    assert!(guard.check("acme", "10.0.0.1", "a@b.com").await.is_ok());

    for _ in 0..4 {
        guard.register_failure("acme", "10.0.0.1", "a@b.com").await;
        assert!(guard.check("acme", "10.0.0.1", "a@b.com").await.is_ok());
    }
    guard.register_failure("acme", "10.0.0.1", "a@b.com").await;

    assert!(matches!(
        guard.check("acme", "10.0.0.1", "a@b.com").await,
        Err(GuardError::LockedOut)
    ));

    // Hybrid tracks both scopes, so the same email from another ip is
    // still locked.
    assert!(matches!(
        guard.check("acme", "10.9.9.9", "a@b.com").await,
        Err(GuardError::LockedOut)
    ));
}

#[tokio::test]
async fn ip_strategy_ignores_the_email_scope() {
    let store = Arc::new(MemoryCounterStore::new());
    let guard = LockoutGuard::new(store, lockout_config(LockoutStrategy::Ip));

    for _ in 0..5 {
        guard.register_failure("acme", "10.0.0.1", "a@b.com").await;
    }

    assert!(guard.check("acme", "10.0.0.1", "a@b.com").await.is_err());
    // Same email, fresh ip: allowed under the ip-only strategy.
    assert!(guard.check("acme", "10.0.0.2", "a@b.com").await.is_ok());
}

#[tokio::test]
async fn clearing_failures_resets_the_count() {
    let store = Arc::new(MemoryCounterStore::new());
    let guard = LockoutGuard::new(store, lockout_config(LockoutStrategy::Email));

    for _ in 0..4 {
        guard.register_failure("acme", "10.0.0.1", "a@b.com").await;
    }
    guard.clear_failures("acme", "10.0.0.1", "a@b.com").await;

    // The window starts over: four more failures still do not lock.
    for _ in 0..4 {
        guard.register_failure("acme", "10.0.0.1", "a@b.com").await;
    }
    assert!(guard.check("acme", "10.0.0.1", "a@b.com").await.is_ok());
}

#[tokio::test]
async fn panic_flag_suspends_only_the_flagged_tenant() {
    let store = Arc::new(MemoryCounterStore::new());
    store
        .set_flag("panic:acme", None)
        .await
        .expect("memory store cannot fail");
    let switch = PanicSwitch::new(store);

    assert!(switch.is_suspended("acme").await);
    assert!(!switch.is_suspended("globex").await);
}
