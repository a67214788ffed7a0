//! Access counters and the bounded hotspot ranking.
//!
//! Every request-path access increments a TTL-bounded counter in the store;
//! each time a counter crosses a batch boundary its value is pushed into a
//! per-kind sorted set capped at [`HOTSPOT_CAP`] members. Warmup and the
//! eviction engine both consult the ranking.
//!
//! The ranking is approximate by design: the store's increment is the only
//! atomic step, so under concurrent writers the exact ordering at the cap
//! boundary is not guaranteed — only the cap itself, and that a member's
//! recorded score never ranks it below a smaller recorded score within one
//! writer's view.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::CacheConfig;
use crate::keys::{self, ResourceKind, DAILY_TTL, HOTSPOT_CAP};
use crate::metrics;
use crate::store::traits::{StoreError, TieredCache};

pub struct HotspotTracker {
    cache: Arc<dyn TieredCache>,
    counter_ttl: Duration,
    batch_size: u64,
}

impl HotspotTracker {
    #[must_use]
    pub fn new(cache: Arc<dyn TieredCache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            counter_ttl: Duration::from_secs(config.access_counter_ttl_secs),
            // A zero batch size would turn every access into a ranking write
            batch_size: config.access_counter_batch_size.max(1),
        }
    }

    /// Count one access to a resource.
    ///
    /// The store-side increment is atomic across processes; the returned
    /// post-increment value drives both the first-touch TTL and the
    /// batch-boundary ranking push, so no read-modify-write race exists.
    /// Returns the post-increment count.
    pub async fn record_access(
        &self,
        kind: ResourceKind,
        id: i64,
    ) -> Result<u64, StoreError> {
        let key = keys::access_counter(kind, id);
        let count = self.cache.increment(&key).await?;

        if count == 1 {
            self.cache.expire(&key, self.counter_ttl).await?;
        }

        if count % self.batch_size == 0 {
            self.record_batch(kind, &id.to_string(), count as f64).await?;
        }

        metrics::record_access(kind.as_str());
        Ok(count)
    }

    /// Upsert a member into the ranking, trim to the cap, refresh the
    /// sliding 24 h expiry.
    pub async fn record_batch(
        &self,
        kind: ResourceKind,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        let set_key = keys::hotspot(kind);

        self.cache.sorted_set_upsert(&set_key, member, score).await?;
        // Drop everything below the top HOTSPOT_CAP (lowest scores first)
        self.cache
            .sorted_set_trim_to_range(&set_key, 0, -(HOTSPOT_CAP + 1))
            .await?;
        self.cache.expire(&set_key, DAILY_TTL).await?;

        metrics::record_hotspot_push(kind.as_str());
        debug!(kind = kind.as_str(), member, score, "hotspot ranking updated");
        Ok(())
    }

    /// The `k` highest-scored members of a kind's ranking, descending.
    pub async fn top(
        &self,
        kind: ResourceKind,
        k: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        self.cache.sorted_set_top(&keys::hotspot(kind), k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryCache;

    fn tracker(cache: Arc<InMemoryCache>, batch_size: u64) -> HotspotTracker {
        let config = CacheConfig {
            access_counter_batch_size: batch_size,
            ..Default::default()
        };
        HotspotTracker::new(cache, &config)
    }

    #[tokio::test]
    async fn first_access_sets_counter_ttl() {
        let cache = Arc::new(InMemoryCache::new());
        let tracker = tracker(cache.clone(), 10);

        assert_eq!(tracker.record_access(ResourceKind::KnowledgePoint, 7).await.unwrap(), 1);
        assert_eq!(
            cache.ttl_of("access:count:kp:7"),
            Some(Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn batch_boundary_pushes_into_ranking() {
        let cache = Arc::new(InMemoryCache::new());
        let tracker = tracker(cache.clone(), 5);

        for _ in 0..4 {
            tracker.record_access(ResourceKind::KnowledgePoint, 7).await.unwrap();
        }
        assert!(tracker.top(ResourceKind::KnowledgePoint, 10).await.unwrap().is_empty());

        tracker.record_access(ResourceKind::KnowledgePoint, 7).await.unwrap();
        let top = tracker.top(ResourceKind::KnowledgePoint, 10).await.unwrap();
        assert_eq!(top, vec![("7".to_string(), 5.0)]);

        // The next boundary refreshes the member's score in place
        for _ in 0..5 {
            tracker.record_access(ResourceKind::KnowledgePoint, 7).await.unwrap();
        }
        let top = tracker.top(ResourceKind::KnowledgePoint, 10).await.unwrap();
        assert_eq!(top, vec![("7".to_string(), 10.0)]);
    }

    #[tokio::test]
    async fn ranking_never_exceeds_cap() {
        let cache = Arc::new(InMemoryCache::new());
        let tracker = tracker(cache.clone(), 10);

        for i in 0..1500 {
            tracker
                .record_batch(ResourceKind::KnowledgePoint, &i.to_string(), i as f64)
                .await
                .unwrap();
            let len = cache.sorted_set_len("hotspot:kp:daily").await.unwrap();
            assert!(len <= HOTSPOT_CAP as u64);
        }
    }

    #[tokio::test]
    async fn trim_drops_lowest_scored_member() {
        let cache = Arc::new(InMemoryCache::new());
        let tracker = tracker(cache.clone(), 10);

        // 1001 distinct members with strictly increasing scores
        for i in 0..=HOTSPOT_CAP {
            tracker
                .record_batch(ResourceKind::KnowledgePoint, &format!("m{i:04}"), i as f64)
                .await
                .unwrap();
        }

        let top = tracker
            .top(ResourceKind::KnowledgePoint, HOTSPOT_CAP as usize + 10)
            .await
            .unwrap();
        assert_eq!(top.len(), HOTSPOT_CAP as usize);
        assert!(top.iter().all(|(m, _)| m != "m0000"));
        assert_eq!(top.first().unwrap().0, format!("m{HOTSPOT_CAP:04}"));
    }

    #[tokio::test]
    async fn every_update_refreshes_the_sliding_expiry() {
        let cache = Arc::new(InMemoryCache::new());
        let tracker = tracker(cache.clone(), 10);

        tracker.record_batch(ResourceKind::KnowledgePoint, "1", 10.0).await.unwrap();
        assert_eq!(cache.ttl_of("hotspot:kp:daily"), Some(DAILY_TTL));

        tracker.record_batch(ResourceKind::KnowledgePoint, "2", 20.0).await.unwrap();
        assert_eq!(cache.ttl_of("hotspot:kp:daily"), Some(DAILY_TTL));
    }
}
