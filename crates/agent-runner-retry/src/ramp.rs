use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-provider ramp schedule: the minimum remaining-quota percentage
/// required to dispatch, as a function of how close the provider's reset
/// is (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampSchedule {
    pub start_minutes: i64,
    pub min_remaining_pct_at_start: f64,
    pub min_remaining_pct_at_end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RampDecision {
    Allow,
    Block { reason: String },
}

impl RampDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RampDecision::Allow)
    }
}

/// Evaluate the ramp schedule for a single quota snapshot, following
/// spec.md §4.2 steps 1-6 exactly.
pub fn evaluate_ramp(
    schedule: &RampSchedule,
    percent_remaining: f64,
    reset_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RampDecision {
    // Step 1: minutes_to_reset = max(0, round((reset_at - now)/1min))
    let raw_minutes = (reset_at - now).num_seconds() as f64 / 60.0;
    let minutes_to_reset = raw_minutes.round().max(0.0) as i64;

    // Step 2
    if minutes_to_reset > schedule.start_minutes {
        return RampDecision::Block {
            reason: format!(
                "reset not close enough: {minutes_to_reset}m to reset, threshold {}m",
                schedule.start_minutes
            ),
        };
    }

    // Step 3
    let denom = schedule.start_minutes.max(1) as f64;
    let ratio = (minutes_to_reset as f64 / denom).clamp(0.0, 1.0);

    // Step 4
    let required = schedule.min_remaining_pct_at_end
        + (schedule.min_remaining_pct_at_start - schedule.min_remaining_pct_at_end) * ratio;

    // Step 5
    if percent_remaining < required {
        return RampDecision::Block {
            reason: format!(
                "{percent_remaining:.1}% remaining (required {required:.1}%)"
            ),
        };
    }

    // Step 6
    RampDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn schedule() -> RampSchedule {
        RampSchedule {
            start_minutes: 1440,
            min_remaining_pct_at_start: 100.0,
            min_remaining_pct_at_end: 0.0,
        }
    }

    /// Scenario 1 (spec.md §8): ramp at threshold.
    #[test]
    fn scenario_ramp_at_threshold_allows_at_exact_required_pct() {
        let now = Utc::now();
        let reset_at = now + Duration::minutes(720);
        let decision = evaluate_ramp(&schedule(), 50.0, reset_at, now);
        match decision {
            RampDecision::Allow => {}
            RampDecision::Block { reason } => panic!("expected allow, got block: {reason}"),
        }
    }

    /// Scenario 2 (spec.md §8): ramp too early.
    #[test]
    fn scenario_ramp_too_early_blocks_with_threshold_reason() {
        let now = Utc::now();
        let reset_at = now + Duration::minutes(1500);
        let decision = evaluate_ramp(&schedule(), 100.0, reset_at, now);
        match decision {
            RampDecision::Block { reason } => {
                assert!(reason.contains("1500m"));
                assert!(reason.contains("threshold 1440m"));
            }
            RampDecision::Allow => panic!("expected block"),
        }
    }

    /// I7: required(minutes_to_reset) is non-decreasing as minutes_to_reset
    /// grows from 0 to start_minutes.
    #[test]
    fn required_percentage_is_monotonic_in_minutes_to_reset() {
        let sched = schedule();
        let now = Utc::now();
        let mut last_required = f64::MIN;
        for minutes in 0..=sched.start_minutes {
            let reset_at = now + Duration::minutes(minutes);
            // Use percent_remaining = 100 so we always land in "allow" and
            // can read `required` back out by bisection-free direct calc.
            let ratio = (minutes as f64 / (sched.start_minutes.max(1) as f64)).clamp(0.0, 1.0);
            let required = sched.min_remaining_pct_at_end
                + (sched.min_remaining_pct_at_start - sched.min_remaining_pct_at_end) * ratio;
            assert!(
                required + 1e-9 >= last_required,
                "required decreased: {required} < {last_required} at minutes={minutes}"
            );
            last_required = required;
            // sanity: evaluate_ramp agrees that 100% remaining always allows
            // within the ramp window.
            assert!(evaluate_ramp(&sched, 100.0, reset_at, now).is_allowed());
        }
    }

    proptest::proptest! {
        #[test]
        fn evaluate_ramp_is_deterministic_in_its_inputs(
            start_minutes in 1i64..10_000,
            start_pct in 0.0f64..100.0,
            end_pct in 0.0f64..100.0,
            percent_remaining in 0.0f64..100.0,
            delta_minutes in -20_000i64..20_000,
        ) {
            let sched = RampSchedule {
                start_minutes,
                min_remaining_pct_at_start: start_pct,
                min_remaining_pct_at_end: end_pct,
            };
            let now = Utc::now();
            let reset_at = now + Duration::minutes(delta_minutes);
            let a = evaluate_ramp(&sched, percent_remaining, reset_at, now);
            let b = evaluate_ramp(&sched, percent_remaining, reset_at, now);
            assert_eq!(a, b);
        }
    }
}
