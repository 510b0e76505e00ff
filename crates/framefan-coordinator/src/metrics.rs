//! Coordinator metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CHUNK_INVOCATIONS_TOTAL: &str = "framefan_chunk_invocations_total";
    pub const CHUNK_RETRIES_TOTAL: &str = "framefan_chunk_retries_total";
    pub const CHUNK_FAILURES_TOTAL: &str = "framefan_chunk_failures_total";
    pub const CHUNK_CRASHES_TOTAL: &str = "framefan_chunk_crashes_total";
    pub const CHUNK_DURATION_SECONDS: &str = "framefan_chunk_duration_seconds";
    pub const RENDERS_LAUNCHED_TOTAL: &str = "framefan_renders_launched_total";
    pub const RENDERS_FINALIZED_TOTAL: &str = "framefan_renders_finalized_total";
    pub const RENDERS_FAILED_TOTAL: &str = "framefan_renders_failed_total";
}

pub fn record_invocation(attempt: u32) {
    let kind = if attempt == 1 { "first" } else { "retry" };
    counter!(names::CHUNK_INVOCATIONS_TOTAL, "attempt" => kind).increment(1);
}

pub fn record_retry() {
    counter!(names::CHUNK_RETRIES_TOTAL).increment(1);
}

pub fn record_chunk_failure(source: &str) {
    counter!(names::CHUNK_FAILURES_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn record_crash(likely_timed_out: bool) {
    let labels = [("timed_out", likely_timed_out.to_string())];
    counter!(names::CHUNK_CRASHES_TOTAL, &labels).increment(1);
}

pub fn record_chunk_duration(duration_secs: f64) {
    histogram!(names::CHUNK_DURATION_SECONDS).record(duration_secs);
}

pub fn record_render_launched() {
    counter!(names::RENDERS_LAUNCHED_TOTAL).increment(1);
}

pub fn record_render_finalized() {
    counter!(names::RENDERS_FINALIZED_TOTAL).increment(1);
}

pub fn record_render_failed(reason: &str) {
    counter!(names::RENDERS_FAILED_TOTAL, "reason" => reason.to_string()).increment(1);
}
