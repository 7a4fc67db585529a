use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `percent_remaining`, `reset_at`, `limit`, `used`, plus a provider-specific
/// per-bucket breakdown (spec.md §3 "Provider Quota Snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderQuotaSnapshot {
    pub percent_remaining: f64,
    pub reset_at: DateTime<Utc>,
    pub limit: u64,
    pub used: u64,
    /// e.g. per-model buckets for the multi-model provider; empty for
    /// single-bucket providers.
    #[serde(default)]
    pub breakdown: BTreeMap<String, f64>,
}

impl ProviderQuotaSnapshot {
    pub fn clamp_percent(percent: f64) -> f64 {
        percent.clamp(0.0, 100.0)
    }
}

/// `{ model_id -> blocked_until }` transient no-capacity memo (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiCapacityBackoff {
    pub blocked_until: BTreeMap<String, DateTime<Utc>>,
}

impl GeminiCapacityBackoff {
    pub fn is_blocked(&self, model_id: &str, now: DateTime<Utc>) -> bool {
        self.blocked_until
            .get(model_id)
            .is_some_and(|until| *until > now)
    }

    pub fn block(&mut self, model_id: impl Into<String>, until: DateTime<Utc>) {
        self.blocked_until.insert(model_id.into(), until);
    }
}
