//! Metrics collector: point-in-time observability snapshot.
//!
//! Pulls store-level counters from `store_info()`, derives the keyspace hit
//! rate, and layers on domain counts (hotspot cardinality, active sessions,
//! per-tier key counts). Read-only against the cache; the only side effect
//! is refreshing the exported gauges.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::keys::{
    self, HOTSPOT_PREFIX, KP_CONTENT_PREFIX, ResourceKind, STATS_PREFIX, USER_INFO_PREFIX,
    USER_ONLINE_PREFIX,
};
use crate::metrics;
use crate::store::traits::{StoreError, TieredCache};

/// Key counts per cache tier prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierKeyCounts {
    pub hotspot: u64,
    pub session: u64,
    pub content: u64,
    pub statistics: u64,
}

/// Point-in-time aggregate of store and domain statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub memory_used_bytes: u64,
    pub memory_used_human: String,
    pub memory_peak_bytes: u64,
    pub connected_clients: u64,
    pub total_commands_processed: u64,
    pub instantaneous_ops_per_sec: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    pub evicted_keys: u64,
    pub expired_keys: u64,
    /// `hits / (hits + misses)`, 0.0 when no requests have been served.
    pub hit_rate: f64,
    pub hotspot_entries: u64,
    pub active_sessions: u64,
    pub tiers: TierKeyCounts,
    pub collected_at: DateTime<Utc>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cache metrics at {}", self.collected_at.to_rfc3339())?;
        writeln!(
            f,
            "  memory: {} used ({} bytes, peak {})",
            self.memory_used_human, self.memory_used_bytes, self.memory_peak_bytes
        )?;
        writeln!(
            f,
            "  clients: {}  ops/sec: {}  commands: {}",
            self.connected_clients, self.instantaneous_ops_per_sec, self.total_commands_processed
        )?;
        writeln!(
            f,
            "  keyspace: {} hits / {} misses (hit rate {:.2}%)",
            self.keyspace_hits,
            self.keyspace_misses,
            self.hit_rate * 100.0
        )?;
        writeln!(
            f,
            "  churn: {} evicted, {} expired",
            self.evicted_keys, self.expired_keys
        )?;
        writeln!(
            f,
            "  hotspots: {}  active sessions: {}",
            self.hotspot_entries, self.active_sessions
        )?;
        write!(
            f,
            "  tiers: hotspot={} session={} content={} statistics={}",
            self.tiers.hotspot, self.tiers.session, self.tiers.content, self.tiers.statistics
        )
    }
}

pub struct MetricsCollector {
    cache: Arc<dyn TieredCache>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(cache: Arc<dyn TieredCache>) -> Self {
        Self { cache }
    }

    /// Assemble a snapshot from store statistics and tier enumerations.
    pub async fn collect(&self) -> Result<MetricsSnapshot, StoreError> {
        let info = self.cache.store_info().await?;
        let stat = |name: &str| parse_stat(&info, name);

        let keyspace_hits = stat("keyspace_hits");
        let keyspace_misses = stat("keyspace_misses");
        let total_requests = keyspace_hits + keyspace_misses;
        let hit_rate = if total_requests > 0 {
            keyspace_hits as f64 / total_requests as f64
        } else {
            0.0
        };

        let hotspot_entries = self
            .cache
            .sorted_set_len(&keys::hotspot(ResourceKind::KnowledgePoint))
            .await?;
        let active_sessions = self.count_prefix(USER_ONLINE_PREFIX).await?;

        let tiers = TierKeyCounts {
            hotspot: self.count_prefix(HOTSPOT_PREFIX).await?,
            session: self.count_prefix(USER_INFO_PREFIX).await?,
            content: self.count_prefix(KP_CONTENT_PREFIX).await?,
            statistics: self.count_prefix(STATS_PREFIX).await?,
        };

        metrics::set_hit_rate(hit_rate);
        metrics::set_tier_keys("hotspot", tiers.hotspot);
        metrics::set_tier_keys("session", tiers.session);
        metrics::set_tier_keys("content", tiers.content);
        metrics::set_tier_keys("statistics", tiers.statistics);

        Ok(MetricsSnapshot {
            memory_used_bytes: stat("used_memory"),
            memory_used_human: info
                .get("used_memory_human")
                .cloned()
                .unwrap_or_else(|| "0B".to_string()),
            memory_peak_bytes: stat("used_memory_peak"),
            connected_clients: stat("connected_clients"),
            total_commands_processed: stat("total_commands_processed"),
            instantaneous_ops_per_sec: stat("instantaneous_ops_per_sec"),
            keyspace_hits,
            keyspace_misses,
            evicted_keys: stat("evicted_keys"),
            expired_keys: stat("expired_keys"),
            hit_rate,
            hotspot_entries,
            active_sessions,
            tiers,
            collected_at: Utc::now(),
        })
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        Ok(self.cache.keys_by_prefix(prefix).await?.len() as u64)
    }
}

fn parse_stat(info: &HashMap<String, String>, name: &str) -> u64 {
    info.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}
