use std::sync::Arc;
use tracing::warn;

use crate::config::LimitConfig;
use crate::guard::counter::CounterStore;
use crate::guard::rules::RateRule;

/// Outcome of a traffic-shaping check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Blocked { retry_after_secs: u64, message: String },
}

/// Windowed counter limiter over the distributed counter store.
///
/// General traffic is fail-open: if the store is unreachable the request is
/// allowed, trading strict enforcement for availability.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    cfg: LimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, cfg: LimitConfig) -> Self {
        Self { store, cfg }
    }

    pub async fn check(
        &self,
        tenant: &str,
        client_ip: &str,
        rule: Option<&RateRule>,
    ) -> RateDecision {
        if !self.cfg.enabled {
            return RateDecision::Allowed { remaining: u32::MAX };
        }

        let (rule_key, limit, window, message) = match rule {
            Some(r) => (
                r.id.to_string(),
                r.limit(),
                r.window_secs,
                r.custom_message
                    .clone()
                    .unwrap_or_else(|| "Too many requests".to_string()),
            ),
            None => (
                "default".to_string(),
                self.cfg.default_rate + self.cfg.default_burst,
                self.cfg.default_window_secs,
                "Too many requests".to_string(),
            ),
        };

        let key = format!("rl:{}:{}:{}", tenant, client_ip, rule_key);
        match self.store.incr_with_window(&key, window).await {
            Ok((count, remaining_ttl)) => {
                if count > limit as u64 {
                    RateDecision::Blocked {
                        retry_after_secs: remaining_ttl.max(1),
                        message,
                    }
                } else {
                    RateDecision::Allowed {
                        remaining: limit.saturating_sub(count as u32),
                    }
                }
            }
            Err(e) => {
                // Fail open: availability over strict enforcement.
                warn!("counter store unavailable, allowing request: {}", e);
                RateDecision::Allowed { remaining: limit }
            }
        }
    }
}
