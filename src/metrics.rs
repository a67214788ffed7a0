//! Metrics instrumentation for the cache lifecycle engines.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! process chooses the exporter (Prometheus, OTEL, ...).
//!
//! # Metric Naming Convention
//! - `recall_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `phase`: warmup phase name
//! - `category`: cleanup sweep name
//! - `kind`: resource kind (kb, kp, user, global)
//! - `tier`: cache tier prefix name

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record the outcome of one warmup phase.
pub fn record_warmup_phase(phase: &str, warmed: usize, failed: usize) {
    counter!(
        "recall_cache_warmup_entities_total",
        "phase" => phase.to_string(),
        "status" => "warmed"
    )
    .increment(warmed as u64);
    counter!(
        "recall_cache_warmup_entities_total",
        "phase" => phase.to_string(),
        "status" => "failed"
    )
    .increment(failed as u64);
}

/// Record deletions performed by one cleanup sweep.
pub fn record_cleanup(category: &str, deleted: u64) {
    counter!(
        "recall_cache_cleanup_deleted_total",
        "category" => category.to_string()
    )
    .increment(deleted);
}

/// Record an audit finding.
pub fn record_audit_finding(entity: &str, issue: &str) {
    counter!(
        "recall_cache_audit_findings_total",
        "entity" => entity.to_string(),
        "issue" => issue.to_string()
    )
    .increment(1);
}

/// Record one access-counter increment.
pub fn record_access(kind: &str) {
    counter!(
        "recall_cache_access_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a batch-boundary push into the hotspot ranking.
pub fn record_hotspot_push(kind: &str) {
    counter!(
        "recall_cache_hotspot_updates_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set the current key count of a cache tier.
pub fn set_tier_keys(tier: &str, count: u64) {
    gauge!(
        "recall_cache_tier_keys",
        "tier" => tier.to_string()
    )
    .set(count as f64);
}

/// Set the store-derived keyspace hit rate (0.0 - 1.0).
pub fn set_hit_rate(rate: f64) {
    gauge!("recall_cache_hit_rate").set(rate);
}

/// A timing guard that records operation latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_duration(self.operation, self.start.elapsed());
    }
}

/// Record how long an engine pass took.
pub fn record_duration(operation: &str, duration: Duration) {
    histogram!(
        "recall_cache_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API compiles and doesn't panic; assertions against a
    // recorder belong to the embedding process.

    #[test]
    fn counters_accept_all_label_shapes() {
        record_warmup_phase("knowledge_bases", 12, 1);
        record_cleanup("stale_sessions", 3);
        record_audit_finding("knowledge_base", "data_mismatch");
        record_access("kp");
        record_hotspot_push("kp");
    }

    #[test]
    fn gauges_and_histograms() {
        set_tier_keys("content", 1200);
        set_hit_rate(0.93);
        record_duration("warmup", Duration::from_millis(1500));
    }

    #[test]
    fn latency_timer_records_on_drop() {
        {
            let _timer = LatencyTimer::new("cleanup");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
