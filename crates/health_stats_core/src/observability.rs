//! Counters emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the host installs a recorder.

use crate::MetricKind;

pub const QUERIES_TOTAL: &str = "health_stats_queries_total";
pub const DAYS_AGGREGATED_TOTAL: &str = "health_stats_days_aggregated_total";
pub const EXPORTS_TOTAL: &str = "health_stats_exports_total";
pub const STALE_EXPORTS_REMOVED_TOTAL: &str = "health_stats_stale_exports_removed_total";

pub fn record_query(metric: MetricKind, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!(QUERIES_TOTAL, "metric" => metric.as_str(), "outcome" => outcome)
        .increment(1);
}

pub fn record_days(days: usize) {
    metrics::counter!(DAYS_AGGREGATED_TOTAL).increment(days as u64);
}

pub fn record_export(outcome: &'static str) {
    metrics::counter!(EXPORTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_stale_removed(count: usize) {
    if count > 0 {
        metrics::counter!(STALE_EXPORTS_REMOVED_TOTAL).increment(count as u64);
    }
}
