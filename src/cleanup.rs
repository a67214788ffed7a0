//! Eviction engine: scheduled removal of stale and low-value cache entries.
//!
//! Four sweeps run in order: stale sessions, low-access content, expired
//! daily statistics, then a best-effort store-level memory compaction. Every
//! sweep is idempotent (deleting an absent key is a no-op) and tolerates
//! individual delete failures without aborting; a cancelled run leaves a
//! valid, partially-swept cache.
//!
//! The two counter-parsing sweeps deliberately disagree on malformed values:
//! an unreadable session marker is deleted (the marker exists only to carry
//! the timestamp), while an unreadable access counter is skipped (deleting
//! content on a corrupt counter could discard a hot record).

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::keys::{
    self, ACCESS_KP_PREFIX, STATS_GLOBAL_DAILY_PREFIX, STATS_KB_PREFIX, STATS_RETENTION_DAYS,
    USER_ONLINE_PREFIX,
};
use crate::metrics;
use crate::store::traits::TieredCache;
use crate::warmup::EntityFailure;

/// Structured outcome of a cleanup run.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub stale_sessions: u64,
    pub low_value_contents: u64,
    pub expired_statistics: u64,
    pub memory_purged: bool,
    pub failures: Vec<EntityFailure>,
}

impl CleanupReport {
    #[must_use]
    pub fn total_deleted(&self) -> u64 {
        self.stale_sessions + self.low_value_contents + self.expired_statistics
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cleanup: {} entries removed", self.total_deleted())?;
        writeln!(f, "  stale_sessions: {}", self.stale_sessions)?;
        writeln!(f, "  low_value_contents: {}", self.low_value_contents)?;
        writeln!(f, "  expired_statistics: {}", self.expired_statistics)?;
        writeln!(
            f,
            "  memory_purge: {}",
            if self.memory_purged { "ok" } else { "unsupported" }
        )?;
        for failure in &self.failures {
            writeln!(f, "  failed {}: {}", failure.entity, failure.error)?;
        }
        Ok(())
    }
}

pub struct CleanupEngine {
    cache: Arc<dyn TieredCache>,
    config: CacheConfig,
}

impl CleanupEngine {
    #[must_use]
    pub fn new(cache: Arc<dyn TieredCache>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    /// Run all sweeps against the current clock.
    pub async fn run(&self) -> CleanupReport {
        self.run_at(Local::now()).await
    }

    /// Run all sweeps against an explicit clock. Deterministic variant used
    /// by tests and backfills; [`run`](Self::run) is `run_at(Local::now())`.
    pub async fn run_at(&self, now: DateTime<Local>) -> CleanupReport {
        info!("starting cache cleanup");
        let _timer = metrics::LatencyTimer::new("cleanup");
        let mut report = CleanupReport::default();

        self.sweep_stale_sessions(now, &mut report).await;
        self.sweep_low_value_content(&mut report).await;
        self.sweep_expired_statistics(now, &mut report).await;

        // Compaction is advisory; stores without it just decline.
        match self.cache.memory_purge().await {
            Ok(()) => report.memory_purged = true,
            Err(e) => warn!(error = %e, "memory purge not performed"),
        }

        info!(
            stale_sessions = report.stale_sessions,
            low_value_contents = report.low_value_contents,
            expired_statistics = report.expired_statistics,
            "cache cleanup complete"
        );
        report
    }

    /// Sweep 1: session-liveness markers past the inactivity threshold.
    async fn sweep_stale_sessions(&self, now: DateTime<Local>, report: &mut CleanupReport) {
        let keys = match self.cache.keys_by_prefix(USER_ONLINE_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                report.failures.push(EntityFailure {
                    entity: "stale_sessions".into(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let threshold = self.config.cleanup_stale_session_secs as f64;
        let now_secs = now.timestamp() as f64;

        for key in keys {
            let raw = match self.cache.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    report.failures.push(EntityFailure { entity: key, error: e.to_string() });
                    continue;
                }
            };

            let last_activity = std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok());

            let doomed: Vec<String> = match last_activity {
                // Unreadable marker: delete it outright
                None => vec![key.clone()],
                Some(last) if now_secs - last > threshold => {
                    let user_id = keys::last_segment(&key).to_string();
                    vec![keys::user_online(&user_id), keys::user_session(&user_id)]
                }
                Some(_) => continue,
            };

            match self.cache.delete(&doomed).await {
                Ok(_) => report.stale_sessions += 1,
                Err(e) => {
                    report.failures.push(EntityFailure { entity: key, error: e.to_string() });
                }
            }
        }

        metrics::record_cleanup("stale_sessions", report.stale_sessions);
    }

    /// Sweep 2: content whose access counter fell below the threshold.
    async fn sweep_low_value_content(&self, report: &mut CleanupReport) {
        let keys = match self.cache.keys_by_prefix(ACCESS_KP_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                report.failures.push(EntityFailure {
                    entity: "low_value_contents".into(),
                    error: e.to_string(),
                });
                return;
            }
        };

        for key in keys {
            let raw = match self.cache.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    report.failures.push(EntityFailure { entity: key, error: e.to_string() });
                    continue;
                }
            };

            // Unreadable counters are left alone
            let Some(count) = std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
            else {
                continue;
            };

            if count >= self.config.cleanup_low_access_threshold {
                continue;
            }

            let Ok(content_id) = keys::last_segment(&key).parse::<i64>() else {
                continue;
            };
            let doomed = vec![keys::kp_content(content_id), keys::kp_choices(content_id)];
            match self.cache.delete(&doomed).await {
                Ok(_) => report.low_value_contents += 1,
                Err(e) => {
                    report.failures.push(EntityFailure { entity: key, error: e.to_string() });
                }
            }
        }

        metrics::record_cleanup("low_value_contents", report.low_value_contents);
    }

    /// Sweep 3: daily statistics older than the retention window. The date
    /// suffix is `YYYY-MM-DD`, so a lexicographic comparison is a date
    /// comparison.
    async fn sweep_expired_statistics(&self, now: DateTime<Local>, report: &mut CleanupReport) {
        let cutoff = (now - ChronoDuration::days(STATS_RETENTION_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let mut dated_keys = Vec::new();
        match self.cache.keys_by_prefix(STATS_GLOBAL_DAILY_PREFIX).await {
            Ok(keys) => dated_keys.extend(keys),
            Err(e) => {
                report.failures.push(EntityFailure {
                    entity: "expired_statistics:global".into(),
                    error: e.to_string(),
                });
            }
        }
        match self.cache.keys_by_prefix(STATS_KB_PREFIX).await {
            Ok(keys) => dated_keys.extend(keys.into_iter().filter(|k| keys::is_dated_kb_stat(k))),
            Err(e) => {
                report.failures.push(EntityFailure {
                    entity: "expired_statistics:kb".into(),
                    error: e.to_string(),
                });
            }
        }

        for key in dated_keys {
            if keys::last_segment(&key) >= cutoff.as_str() {
                continue;
            }
            match self.cache.delete(std::slice::from_ref(&key)).await {
                Ok(_) => report.expired_statistics += 1,
                Err(e) => {
                    report.failures.push(EntityFailure { entity: key, error: e.to_string() });
                }
            }
        }

        metrics::record_cleanup("expired_statistics", report.expired_statistics);
    }
}
