#![no_main]

use agent_runner_retry::{evaluate_ramp, RampSchedule};
use chrono::{Duration, Utc};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u8, u8, u8, i32)| {
    let (start_minutes_byte, start_pct_byte, end_pct_byte, offset_minutes) = data;

    let schedule = RampSchedule {
        start_minutes: start_minutes_byte as i64 % 240,
        min_remaining_pct_at_start: (start_pct_byte as f64 / 255.0) * 100.0,
        min_remaining_pct_at_end: (end_pct_byte as f64 / 255.0) * 100.0,
    };
    let percent_remaining = (start_pct_byte as f64 / 255.0) * 100.0;
    let now = Utc::now();
    let reset_at = now + Duration::minutes(offset_minutes as i64 % 10_000);

    // Must never panic regardless of how the schedule/percentages/offsets
    // relate to each other.
    let _ = evaluate_ramp(&schedule, percent_remaining, reset_at, now);
});
