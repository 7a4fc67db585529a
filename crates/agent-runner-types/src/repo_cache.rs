use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Last-known list of in-scope repositories for "all repos of the owner"
/// mode, with a staleness window and an optional rate-limit backoff
/// (spec.md §3 "Repo Cache").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoCache {
    pub repos: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RepoCache {
    /// `updated_at` is within `max_age` of `now` (default 60 minutes, per
    /// spec.md §4.4 step 1).
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.updated_at {
            Some(at) => now - at <= max_age,
            None => false,
        }
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_within_window_stale_outside_it() {
        let now = Utc::now();
        let cache = RepoCache {
            repos: vec!["a".into()],
            updated_at: Some(now - Duration::minutes(30)),
            blocked_until: None,
        };
        assert!(cache.is_fresh(now, Duration::minutes(60)));
        assert!(!cache.is_fresh(now, Duration::minutes(20)));
    }

    #[test]
    fn never_populated_is_never_fresh() {
        let cache = RepoCache::default();
        assert!(!cache.is_fresh(Utc::now(), Duration::minutes(60)));
    }

    #[test]
    fn blocked_until_expires() {
        let now = Utc::now();
        let cache = RepoCache {
            repos: vec![],
            updated_at: None,
            blocked_until: Some(now + Duration::minutes(5)),
        };
        assert!(cache.is_blocked(now));
        assert!(!cache.is_blocked(now + Duration::minutes(6)));
    }
}
