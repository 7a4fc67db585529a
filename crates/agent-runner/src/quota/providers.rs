//! Concrete providers: primary engine, review-capable engine, multi-model
//! (per-model buckets + warmup + capacity backoff), monthly local-count,
//! and auxiliary engine (spec.md §4.2).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use agent_runner_retry::RampSchedule;
use agent_runner_store::json_file;
use agent_runner_types::{GeminiCapacityBackoff, ProviderQuotaSnapshot};

use crate::platform::Client;

/// A provider whose snapshot comes straight from an HTTP header / user-info
/// response on the platform client, with no local bookkeeping: the primary
/// engine, the review-capable engine, and the auxiliary engine all share
/// this shape, differing only in which header/field they read.
pub struct HeaderReportedProvider {
    name: String,
    schedule: RampSchedule,
    snapshot_fetcher: Box<dyn Fn() -> Result<ProviderQuotaSnapshot> + Send + Sync>,
}

impl HeaderReportedProvider {
    pub fn new(
        name: impl Into<String>,
        schedule: RampSchedule,
        snapshot_fetcher: Box<dyn Fn() -> Result<ProviderQuotaSnapshot> + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule,
            snapshot_fetcher,
        }
    }
}

#[async_trait]
impl super::QuotaProvider for HeaderReportedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> RampSchedule {
        self.schedule
    }

    async fn fetch_snapshot(&self, _now: DateTime<Utc>) -> Result<ProviderQuotaSnapshot> {
        (self.snapshot_fetcher)()
    }
}

/// Monthly state `{period_key, used}` for the local-count provider
/// (spec.md §4.2 "Local-count provider"). `period_key` is `YYYY-MM` UTC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthlyUsageState {
    pub period_key: String,
    pub used: u64,
}

fn current_period_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

use chrono::Datelike;

/// Resets `state` to zero usage if `now` has rolled into a new UTC month.
pub fn roll_period(state: &mut MonthlyUsageState, now: DateTime<Utc>) {
    let key = current_period_key(now);
    if state.period_key != key {
        state.period_key = key;
        state.used = 0;
    }
}

pub fn percent_remaining(state: &MonthlyUsageState, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    let remaining = limit.saturating_sub(state.used) as f64;
    ProviderQuotaSnapshot::clamp_percent(100.0 * remaining / limit as f64)
}

fn month_end_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

/// The monthly-limit provider (e.g. Amazon Q): usage is counted locally
/// rather than fetched from the platform, persisted under
/// `amazon-q-usage.json`.
pub struct MonthlyLocalCountProvider {
    name: String,
    schedule: RampSchedule,
    state_path: PathBuf,
    limit: u64,
}

impl MonthlyLocalCountProvider {
    pub fn new(name: impl Into<String>, schedule: RampSchedule, state_dir: &Path, limit: u64) -> Self {
        Self {
            name: name.into(),
            schedule,
            state_path: state_dir.join("amazon-q-usage.json"),
            limit,
        }
    }

    fn load(&self) -> Result<MonthlyUsageState> {
        json_file::read_json_or_default(&self.state_path)
    }

    fn save(&self, state: &MonthlyUsageState) -> Result<()> {
        json_file::write_json(&self.state_path, state)
    }
}

#[async_trait]
impl super::QuotaProvider for MonthlyLocalCountProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> RampSchedule {
        self.schedule
    }

    async fn fetch_snapshot(&self, now: DateTime<Utc>) -> Result<ProviderQuotaSnapshot> {
        let mut state = self.load()?;
        roll_period(&mut state, now);
        self.save(&state)?;
        Ok(ProviderQuotaSnapshot {
            percent_remaining: percent_remaining(&state, self.limit),
            reset_at: month_end_utc(now),
            limit: self.limit,
            used: state.used,
            breakdown: BTreeMap::new(),
        })
    }

    async fn record_usage(&self, count: u64, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.load()?;
        roll_period(&mut state, now);
        state.used += count;
        self.save(&state)
    }
}

/// One model bucket inside the multi-model provider.
#[derive(Debug, Clone)]
pub struct ModelBucket {
    pub model_id: String,
    pub percent_remaining: f64,
    pub reset_at: DateTime<Utc>,
}

/// The multi-model provider (e.g. Gemini): per-model buckets, each with its
/// own warmup cooldown and capacity-backoff memo (spec.md §4.2 "Multi-model
/// provider: warmup", "Capacity backoff").
pub struct MultiModelProvider {
    name: String,
    schedule: RampSchedule,
    cooldown_minutes: i64,
    warmup_path: PathBuf,
    backoff_path: PathBuf,
    buckets: Vec<ModelBucket>,
    last_warmup: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

const WARMUP_THRESHOLD_PCT: f64 = 99.999;

impl MultiModelProvider {
    pub fn new(
        name: impl Into<String>,
        schedule: RampSchedule,
        cooldown_minutes: i64,
        state_dir: &Path,
        buckets: Vec<ModelBucket>,
    ) -> Result<Self> {
        let warmup_path = state_dir.join("gemini-warmup.json");
        let last_warmup: BTreeMap<String, DateTime<Utc>> =
            json_file::read_json_or_default(&warmup_path)?;
        Ok(Self {
            name: name.into(),
            schedule,
            cooldown_minutes,
            warmup_path,
            backoff_path: state_dir.join("gemini-capacity-backoff.json"),
            buckets,
            last_warmup: Mutex::new(last_warmup),
        })
    }

    fn load_backoff(&self) -> Result<GeminiCapacityBackoff> {
        json_file::read_json_or_default(&self.backoff_path)
    }

    fn save_backoff(&self, backoff: &GeminiCapacityBackoff) -> Result<()> {
        json_file::write_json(&self.backoff_path, backoff)
    }

    /// Records a provider-reported no-capacity failure for `model_id`,
    /// suppressing further dispatch to it until `until`.
    pub fn record_capacity_exhausted(&self, model_id: &str, until: DateTime<Utc>) -> Result<()> {
        let mut backoff = self.load_backoff()?;
        backoff.block(model_id, until);
        self.save_backoff(&backoff)
    }

    pub fn is_model_blocked(&self, model_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.load_backoff()?.is_blocked(model_id, now))
    }

    /// Evaluates warmup for every bucket, returning the model ids that
    /// should get a one-off warmup run scheduled this tick.
    pub fn due_warmups(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        let mut last_warmup = self.last_warmup.lock().unwrap();
        for bucket in &self.buckets {
            if bucket.percent_remaining < WARMUP_THRESHOLD_PCT {
                continue;
            }
            let minutes_to_reset = ((bucket.reset_at - now).num_seconds() as f64 / 60.0)
                .round()
                .max(0.0) as i64;
            if minutes_to_reset <= self.schedule.start_minutes {
                continue;
            }
            let cooled_down = last_warmup
                .get(&bucket.model_id)
                .is_none_or(|last| now - *last >= chrono::Duration::minutes(self.cooldown_minutes));
            if cooled_down {
                due.push(bucket.model_id.clone());
                last_warmup.insert(bucket.model_id.clone(), now);
            }
        }
        due
    }

    pub fn persist_warmup_state(&self) -> Result<()> {
        let last_warmup = self.last_warmup.lock().unwrap();
        json_file::write_json(&self.warmup_path, &*last_warmup)
    }
}

#[async_trait]
impl super::QuotaProvider for MultiModelProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> RampSchedule {
        self.schedule
    }

    async fn fetch_snapshot(&self, now: DateTime<Utc>) -> Result<ProviderQuotaSnapshot> {
        let backoff = self.load_backoff()?;
        let mut breakdown = BTreeMap::new();
        let mut best: Option<&ModelBucket> = None;
        for bucket in &self.buckets {
            if backoff.is_blocked(&bucket.model_id, now) {
                continue;
            }
            breakdown.insert(bucket.model_id.clone(), bucket.percent_remaining);
            if best.is_none_or(|b| bucket.percent_remaining > b.percent_remaining) {
                best = Some(bucket);
            }
        }
        let chosen = best.or_else(|| self.buckets.first());
        let (percent_remaining, reset_at) = chosen
            .map(|b| (b.percent_remaining, b.reset_at))
            .unwrap_or((0.0, now));
        Ok(ProviderQuotaSnapshot {
            percent_remaining,
            reset_at,
            limit: 0,
            used: 0,
            breakdown,
        })
    }
}

/// Placeholder used by call sites that build a [`Client`]-backed provider
/// via an `HttpClient` header read; kept separate from
/// [`HeaderReportedProvider`]'s generic closure form so platform-specific
/// header parsing lives next to the trait it implements against.
pub async fn fetch_from_user_info(
    client: &dyn Client,
    owner: &str,
) -> Result<Vec<String>> {
    client.list_org_repos(owner).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schedule() -> RampSchedule {
        RampSchedule {
            start_minutes: 1440,
            min_remaining_pct_at_start: 100.0,
            min_remaining_pct_at_end: 0.0,
        }
    }

    #[test]
    fn monthly_provider_rolls_over_into_new_period() {
        let mut state = MonthlyUsageState {
            period_key: "2026-06".to_string(),
            used: 500,
        };
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 1).unwrap();
        roll_period(&mut state, now);
        assert_eq!(state.period_key, "2026-07");
        assert_eq!(state.used, 0);
    }

    #[test]
    fn monthly_provider_percent_remaining_clamped() {
        let state = MonthlyUsageState {
            period_key: "2026-07".to_string(),
            used: 1_200,
        };
        assert_eq!(percent_remaining(&state, 1_000), 0.0);
    }

    #[tokio::test]
    async fn monthly_provider_records_usage_across_reloads() {
        let dir = tempdir().unwrap();
        let provider = MonthlyLocalCountProvider::new("amazon-q", schedule(), dir.path(), 1_000);
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();
        provider.record_usage(100, now).await.unwrap();
        let snapshot = provider.fetch_snapshot(now).await.unwrap();
        assert_eq!(snapshot.used, 100);
        assert!((snapshot.percent_remaining - 90.0).abs() < 1e-9);
    }

    #[test]
    fn multi_model_warmup_fires_once_per_cooldown_window() {
        let dir = tempdir().unwrap();
        let provider = MultiModelProvider::new(
            "gemini",
            schedule(),
            60,
            dir.path(),
            vec![ModelBucket {
                model_id: "gemini-pro".to_string(),
                percent_remaining: 100.0,
                reset_at: Utc::now() + chrono::Duration::minutes(2000),
            }],
        )
        .unwrap();
        let now = Utc::now();
        assert_eq!(provider.due_warmups(now), vec!["gemini-pro".to_string()]);
        assert!(provider.due_warmups(now + chrono::Duration::minutes(5)).is_empty());
    }

    #[test]
    fn capacity_backoff_blocks_until_expiry() {
        let dir = tempdir().unwrap();
        let provider = MultiModelProvider::new("gemini", schedule(), 60, dir.path(), vec![]).unwrap();
        let now = Utc::now();
        provider
            .record_capacity_exhausted("gemini-pro", now + chrono::Duration::minutes(10))
            .unwrap();
        assert!(provider.is_model_blocked("gemini-pro", now).unwrap());
        assert!(!provider
            .is_model_blocked("gemini-pro", now + chrono::Duration::minutes(20))
            .unwrap());
    }
}
