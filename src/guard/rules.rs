use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A per-route traffic policy. Patterns are path prefixes; a trailing `*`
/// matches any suffix, otherwise the match must be exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRule {
    pub id: Uuid,
    pub pattern: String,
    pub method: String,
    pub steady_rate: u32,
    pub burst_allowance: u32,
    pub window_secs: u64,
    pub custom_message: Option<String>,
}

impl RateRule {
    pub fn limit(&self) -> u32 {
        self.steady_rate + self.burst_allowance
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        if self.method != "*" && !self.method.eq_ignore_ascii_case(method) {
            return false;
        }
        match self.pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.pattern,
        }
    }

    /// Longer patterns are more specific; an exact method beats a wildcard.
    fn specificity(&self) -> (usize, bool) {
        (self.pattern.len(), self.method != "*")
    }
}

/// In-process rule cache, owned by the composition root and refreshed from
/// the platform control database. The rule set is platform-wide policy;
/// tenant isolation happens at the counter keys, which scope every window
/// by tenant. Safe to discard and rebuild at will.
#[derive(Default)]
pub struct RuleCache {
    rules: RwLock<Vec<RateRule>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, rules: Vec<RateRule>) {
        *self.rules.write().await = rules;
    }

    pub async fn invalidate(&self) {
        self.rules.write().await.clear();
    }

    /// Most specific matching rule for `(method, path)`, if any.
    pub async fn match_rule(&self, method: &str, path: &str) -> Option<RateRule> {
        let rules = self.rules.read().await;
        rules
            .iter()
            .filter(|r| r.matches(method, path))
            .max_by_key(|r| r.specificity())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, method: &str, rate: u32) -> RateRule {
        RateRule {
            id: Uuid::new_v4(),
            pattern: pattern.to_string(),
            method: method.to_string(),
            steady_rate: rate,
            burst_allowance: 0,
            window_secs: 60,
            custom_message: None,
        }
    }

    #[tokio::test]
    async fn most_specific_pattern_wins() {
        let cache = RuleCache::new();
        cache
            .replace(vec![
                rule("/auth/*", "*", 100),
                rule("/auth/v1/token", "POST", 10),
                rule("/auth/v1/*", "*", 50),
            ])
            .await;

        let hit = cache.match_rule("POST", "/auth/v1/token").await.unwrap();
        assert_eq!(hit.steady_rate, 10);

        let hit = cache.match_rule("GET", "/auth/v1/user").await.unwrap();
        assert_eq!(hit.steady_rate, 50);

        let hit = cache.match_rule("POST", "/auth/token").await.unwrap();
        assert_eq!(hit.steady_rate, 100);
    }

    #[tokio::test]
    async fn method_must_match_unless_wildcard() {
        let cache = RuleCache::new();
        cache.replace(vec![rule("/auth/v1/signup", "POST", 5)]).await;

        assert!(cache.match_rule("POST", "/auth/v1/signup").await.is_some());
        assert!(cache.match_rule("GET", "/auth/v1/signup").await.is_none());
    }

    #[tokio::test]
    async fn exact_method_beats_wildcard_at_same_pattern() {
        let cache = RuleCache::new();
        cache
            .replace(vec![
                rule("/auth/v1/token", "*", 100),
                rule("/auth/v1/token", "POST", 10),
            ])
            .await;
        let hit = cache.match_rule("POST", "/auth/v1/token").await.unwrap();
        assert_eq!(hit.steady_rate, 10);
    }

    #[tokio::test]
    async fn invalidate_clears_rules() {
        let cache = RuleCache::new();
        cache.replace(vec![rule("/x", "*", 1)]).await;
        cache.invalidate().await;
        assert!(cache.match_rule("GET", "/x").await.is_none());
    }
}
