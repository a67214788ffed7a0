//! In-process store implementations for tests and embedding.
//!
//! [`InMemoryCache`] mirrors the store semantics the engines rely on —
//! hash-field merges, atomic counters, sorted-set rank trimming with the
//! (score, member) tie-break, prefix enumeration — without a network hop.
//! TTLs are recorded for inspection rather than enforced; lifecycle tests
//! drive expiry and eviction explicitly.
//!
//! [`FixtureSource`] serves canned rows as the source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::traits::{SourceOfTruth, StoreError, TieredCache};
use crate::records::{
    ChoiceRow, ContentRow, ContentStatsRow, DailyReviewRow, KnowledgeAreaRow, KnowledgeBaseRow,
    UserPointStateRow, UserRow,
};

#[derive(Default)]
pub struct InMemoryCache {
    strings: DashMap<String, Vec<u8>>,
    hashes: DashMap<String, HashMap<String, String>>,
    zsets: DashMap<String, HashMap<String, f64>>,
    ttls: DashMap<String, Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL recorded for a key by the last `set`/`hash_set`/`expire`.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.ttls.get(key).map(|t| *t.value())
    }

    /// Total number of live keys across all value types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len() + self.hashes.len() + self.zsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.hashes.contains_key(key)
            || self.zsets.contains_key(key)
    }

    /// Members of a sorted set ordered ascending by (score, member) —
    /// the same total order the store's rank operations use.
    fn ranked_members(set: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut ordered: Vec<(String, f64)> =
            set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        ordered.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ordered
    }
}

#[async_trait]
impl TieredCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.strings.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.value().clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.strings.insert(key.to_string(), value.to_vec());
        self.ttls.insert(key.to_string(), ttl);
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        drop(hash);
        self.ttls.insert(key.to_string(), ttl);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.hashes.get(key).map(|h| h.value().clone()).unwrap_or_default())
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut entry = self
            .strings
            .entry(key.to_string())
            .or_insert_with(|| b"0".to_vec());
        let current = std::str::from_utf8(entry.value())
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| StoreError::Backend(format!("value at '{key}' is not an integer")))?;
        let next = current + 1;
        *entry.value_mut() = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if self.contains(key) {
            self.ttls.insert(key.to_string(), ttl);
        }
        Ok(())
    }

    async fn sorted_set_upsert(
        &self,
        set_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        self.zsets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_set_trim_to_range(
        &self,
        set_key: &str,
        lo_rank: i64,
        hi_rank: i64,
    ) -> Result<u64, StoreError> {
        let Some(mut set) = self.zsets.get_mut(set_key) else {
            return Ok(0);
        };
        let ordered = Self::ranked_members(set.value());
        let len = ordered.len() as i64;
        let resolve = |rank: i64| if rank < 0 { rank + len } else { rank };
        let lo = resolve(lo_rank).max(0);
        let hi = resolve(hi_rank).min(len - 1);
        if lo > hi {
            return Ok(0);
        }

        let mut removed = 0;
        for (member, _) in &ordered[lo as usize..=hi as usize] {
            set.value_mut().remove(member);
            removed += 1;
        }
        Ok(removed)
    }

    async fn sorted_set_top(
        &self,
        set_key: &str,
        k: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let Some(set) = self.zsets.get(set_key) else {
            return Ok(vec![]);
        };
        let mut ordered = Self::ranked_members(set.value());
        ordered.reverse();
        ordered.truncate(k);
        Ok(ordered)
    }

    async fn sorted_set_len(&self, set_key: &str) -> Result<u64, StoreError> {
        Ok(self.zsets.get(set_key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .strings
            .iter()
            .map(|e| e.key().clone())
            .chain(self.hashes.iter().map(|e| e.key().clone()))
            .chain(self.zsets.iter().map(|e| e.key().clone()))
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.contains(key) {
                removed += 1;
            }
            self.strings.remove(key);
            self.hashes.remove(key);
            self.zsets.remove(key);
            self.ttls.remove(key);
        }
        Ok(removed)
    }

    async fn store_info(&self) -> Result<HashMap<String, String>, StoreError> {
        let string_bytes: usize = self.strings.iter().map(|e| e.value().len()).sum();
        let hash_bytes: usize = self
            .hashes
            .iter()
            .map(|e| e.value().iter().map(|(k, v)| k.len() + v.len()).sum::<usize>())
            .sum();
        let used = (string_bytes + hash_bytes) as u64;

        let mut info = HashMap::new();
        info.insert("used_memory".into(), used.to_string());
        info.insert("used_memory_human".into(), format!("{used}B"));
        info.insert("used_memory_peak".into(), used.to_string());
        info.insert("connected_clients".into(), "1".into());
        info.insert("total_commands_processed".into(), "0".into());
        info.insert("instantaneous_ops_per_sec".into(), "0".into());
        info.insert(
            "keyspace_hits".into(),
            self.hits.load(Ordering::Relaxed).to_string(),
        );
        info.insert(
            "keyspace_misses".into(),
            self.misses.load(Ordering::Relaxed).to_string(),
        );
        info.insert("evicted_keys".into(), "0".into());
        info.insert("expired_keys".into(), "0".into());
        Ok(info)
    }

    async fn memory_purge(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Canned-row [`SourceOfTruth`] for tests and local development.
///
/// Rows are returned with the same ordering and bounding rules the SQL
/// implementation applies; time-window filters are assumed pre-applied to
/// the fixture data.
#[derive(Default)]
pub struct FixtureSource {
    pub knowledge_bases: Vec<KnowledgeBaseRow>,
    /// Areas per knowledge-base id.
    pub areas: HashMap<i64, Vec<KnowledgeAreaRow>>,
    /// Contents per knowledge-base id.
    pub contents: HashMap<i64, Vec<ContentRow>>,
    /// Choice lists per content id.
    pub choices: HashMap<i64, Vec<ChoiceRow>>,
    pub users: Vec<UserRow>,
    pub active_users: Vec<i64>,
    pub daily_stats: DailyReviewRow,
    /// Mastery state per (user id, content id).
    pub user_states: HashMap<(i64, i64), UserPointStateRow>,
}

#[async_trait]
impl SourceOfTruth for FixtureSource {
    async fn top_knowledge_bases(&self, limit: i64) -> Result<Vec<KnowledgeBaseRow>, StoreError> {
        let mut rows: Vec<KnowledgeBaseRow> = self
            .knowledge_bases
            .iter()
            .filter(|kb| kb.visibility == "public")
            .cloned()
            .collect();
        rows.sort_by_key(|kb| std::cmp::Reverse(kb.subscriber_count));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn knowledge_areas(&self, kb_id: i64) -> Result<Vec<KnowledgeAreaRow>, StoreError> {
        Ok(self.areas.get(&kb_id).cloned().unwrap_or_default())
    }

    async fn content_statistics(&self, kb_id: i64) -> Result<ContentStatsRow, StoreError> {
        let contents = self.contents.get(&kb_id).cloned().unwrap_or_default();
        let total = contents.len() as i64;
        let avg = if total > 0 {
            Some(
                contents.iter().filter_map(|c| c.difficulty_level).sum::<f64>() / total as f64,
            )
        } else {
            None
        };
        Ok(ContentStatsRow {
            total_contents: total,
            avg_difficulty: avg,
        })
    }

    async fn hot_contents(&self, kb_id: i64, limit: i64) -> Result<Vec<ContentRow>, StoreError> {
        let mut rows = self.contents.get(&kb_id).cloned().unwrap_or_default();
        rows.sort_by_key(|c| std::cmp::Reverse(c.usage_count));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn choices(&self, content_id: i64) -> Result<Vec<ChoiceRow>, StoreError> {
        Ok(self.choices.get(&content_id).cloned().unwrap_or_default())
    }

    async fn active_user_ids(
        &self,
        _since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut ids = self.active_users.clone();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRow>, StoreError> {
        Ok(self.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn daily_review_stats(&self, _date: &str) -> Result<DailyReviewRow, StoreError> {
        Ok(self.daily_stats)
    }

    async fn knowledge_base_by_id(
        &self,
        kb_id: i64,
    ) -> Result<Option<KnowledgeBaseRow>, StoreError> {
        Ok(self.knowledge_bases.iter().find(|kb| kb.id == kb_id).cloned())
    }

    async fn user_point_state(
        &self,
        user_id: i64,
        content_id: i64,
    ) -> Result<Option<UserPointStateRow>, StoreError> {
        Ok(self.user_states.get(&(user_id, content_id)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip_and_ttl_recording() {
        let cache = InMemoryCache::new();
        cache
            .set_with_ttl("kb:detail:1", b"payload", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("kb:detail:1").await.unwrap().unwrap(), b"payload");
        assert_eq!(cache.ttl_of("kb:detail:1"), Some(Duration::from_secs(60)));
        assert!(cache.get("kb:detail:2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hash_set_merges_fields() {
        let cache = InMemoryCache::new();
        cache
            .hash_set(
                "kb:info:1",
                &[("name".into(), "Rust".into()), ("subscriber_count".into(), "3".into())],
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        cache
            .hash_set(
                "kb:info:1",
                &[("subscriber_count".into(), "4".into())],
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        let fields = cache.hash_get_all("kb:info:1").await.unwrap();
        assert_eq!(fields["name"], "Rust");
        assert_eq!(fields["subscriber_count"], "4");
    }

    #[tokio::test]
    async fn increment_is_sequential_and_rejects_garbage() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.increment("access:count:kp:1").await.unwrap(), 1);
        assert_eq!(cache.increment("access:count:kp:1").await.unwrap(), 2);

        cache
            .set_with_ttl("access:count:kp:2", b"not-a-number", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(cache.increment("access:count:kp:2").await.is_err());
    }

    #[tokio::test]
    async fn trim_removes_lowest_ranks_with_negative_bounds() {
        let cache = InMemoryCache::new();
        for i in 0..5 {
            cache
                .sorted_set_upsert("hotspot:kp:daily", &format!("m{i}"), i as f64)
                .await
                .unwrap();
        }

        // Keep only the top 3: remove ranks 0 .. len-4
        let removed = cache
            .sorted_set_trim_to_range("hotspot:kp:daily", 0, -4)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let top = cache.sorted_set_top("hotspot:kp:daily", 10).await.unwrap();
        let members: Vec<&str> = top.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn trim_is_noop_below_capacity() {
        let cache = InMemoryCache::new();
        cache.sorted_set_upsert("z", "a", 1.0).await.unwrap();
        cache.sorted_set_upsert("z", "b", 2.0).await.unwrap();

        // Range resolves to an empty window when the set is small
        let removed = cache.sorted_set_trim_to_range("z", 0, -1001).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(cache.sorted_set_len("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn trim_tie_break_is_member_ascending() {
        let cache = InMemoryCache::new();
        for member in ["b", "a", "c"] {
            cache.sorted_set_upsert("z", member, 1.0).await.unwrap();
        }

        // Remove the single lowest rank: equal scores break ties by member
        cache.sorted_set_trim_to_range("z", 0, 0).await.unwrap();
        let top = cache.sorted_set_top("z", 10).await.unwrap();
        let members: Vec<&str> = top.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn prefix_enumeration_is_sorted_across_value_types() {
        let cache = InMemoryCache::new();
        cache.set_with_ttl("kp:content:2", b"x", Duration::ZERO).await.unwrap();
        cache
            .hash_set("kp:content:1", &[("question".into(), "q".into())], Duration::ZERO)
            .await
            .unwrap();
        cache.set_with_ttl("kb:info:1", b"y", Duration::ZERO).await.unwrap();

        let keys = cache.keys_by_prefix("kp:content:").await.unwrap();
        assert_eq!(keys, vec!["kp:content:1", "kp:content:2"]);
    }

    #[tokio::test]
    async fn delete_counts_only_existing_keys() {
        let cache = InMemoryCache::new();
        cache.set_with_ttl("a", b"1", Duration::ZERO).await.unwrap();

        let removed = cache
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn info_tracks_hits_and_misses() {
        let cache = InMemoryCache::new();
        cache.set_with_ttl("a", b"1", Duration::ZERO).await.unwrap();
        let _ = cache.get("a").await.unwrap();
        let _ = cache.get("b").await.unwrap();
        let _ = cache.get("b").await.unwrap();

        let info = cache.store_info().await.unwrap();
        assert_eq!(info["keyspace_hits"], "1");
        assert_eq!(info["keyspace_misses"], "2");
    }

    #[tokio::test]
    async fn fixture_ranks_public_knowledge_bases() {
        let mut source = FixtureSource::default();
        for (id, subs, visibility) in [(1, 5, "public"), (2, 9, "public"), (3, 100, "private")] {
            source.knowledge_bases.push(KnowledgeBaseRow {
                id,
                name: format!("kb-{id}"),
                owner_id: 1,
                visibility: visibility.into(),
                description: None,
                icon: None,
                difficulty_level: None,
                content_count: 0,
                subscriber_count: subs,
                created_at: None,
                updated_at: None,
            });
        }

        let top = source.top_knowledge_bases(10).await.unwrap();
        let ids: Vec<i64> = top.iter().map(|kb| kb.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
