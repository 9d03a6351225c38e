//! Fill metrics.
//!
//! Emitted through the `metrics` facade; whichever recorder the embedding
//! process installs receives them.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CLIPS_ACCEPTED_TOTAL: &str = "sbank_clips_accepted_total";
    pub const CLIPS_REJECTED_TOTAL: &str = "sbank_clips_rejected_total";
    pub const FETCH_TOTAL: &str = "sbank_fetch_total";
    pub const BANK_FILL: &str = "sbank_bank_fill";
    pub const RUNS_TOTAL: &str = "sbank_runs_total";
}

/// Record a clip placed into a bank.
pub fn record_clip_accepted(theme: &str) {
    let labels = [("theme", theme.to_string())];
    counter!(names::CLIPS_ACCEPTED_TOTAL, &labels).increment(1);
}

/// Record a discarded candidate.
pub fn record_clip_rejected(reason: &'static str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::CLIPS_REJECTED_TOTAL, &labels).increment(1);
}

/// Record one fetch attempt outcome.
pub fn record_fetch(strategy: &'static str, outcome: &'static str) {
    let labels = [("strategy", strategy.to_string()), ("outcome", outcome.to_string())];
    counter!(names::FETCH_TOTAL, &labels).increment(1);
}

/// Current fill ratio of a bank, between 0 and 1.
pub fn set_bank_fill(theme: &str, accepted: u32, target: u32) {
    let labels = [("theme", theme.to_string())];
    let ratio = if target == 0 {
        1.0
    } else {
        f64::from(accepted.min(target)) / f64::from(target)
    };
    gauge!(names::BANK_FILL, &labels).set(ratio);
}

/// Record a run reaching a terminal state.
pub fn record_run_finished(state: &'static str) {
    let labels = [("state", state.to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
}
