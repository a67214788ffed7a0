//! Capability traits over the two external stores.
//!
//! [`TieredCache`] abstracts the key-value store holding the cached
//! projections (Redis in production, [`crate::store::memory::InMemoryCache`]
//! in tests). [`SourceOfTruth`] abstracts the relational store that owns
//! canonical state and is only ever read.
//!
//! Both traits are object-safe; the engines hold `Arc<dyn …>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::records::{
    ChoiceRow, ContentRow, ContentStatsRow, DailyReviewRow, KnowledgeAreaRow, KnowledgeBaseRow,
    UserPointStateRow, UserRow,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the store at all. Fatal at startup.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed an individual operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key-value store with per-tier namespaces, TTLs, hashes, sorted sets and
/// counters. Any store exposing these primitives suffices.
#[async_trait]
pub trait TieredCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration)
        -> Result<(), StoreError>;

    /// Set hash fields and refresh the key's TTL. Existing fields not named
    /// here are left in place (HSET semantics).
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// All fields of a hash; empty map when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Atomic increment; returns the post-increment value.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn sorted_set_upsert(
        &self,
        set_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError>;

    /// Remove members in the given rank range (rank 0 = lowest score;
    /// negative ranks count from the highest, Redis ZREMRANGEBYRANK
    /// semantics). Returns the number removed.
    async fn sorted_set_trim_to_range(
        &self,
        set_key: &str,
        lo_rank: i64,
        hi_rank: i64,
    ) -> Result<u64, StoreError>;

    /// Top `k` members by descending score.
    async fn sorted_set_top(
        &self,
        set_key: &str,
        k: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn sorted_set_len(&self, set_key: &str) -> Result<u64, StoreError>;

    /// Enumerate keys under a prefix. The enumeration may be approximate and
    /// non-atomic under concurrent mutation.
    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete keys; absent keys are a no-op. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Store-level statistics as a flat string map (memory, clients,
    /// keyspace hit/miss counters, ...).
    async fn store_info(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Ask the store to compact its memory. Best-effort.
    async fn memory_purge(&self) -> Result<(), StoreError>;
}

/// Read-only, typed query surface over the relational system of record.
#[async_trait]
pub trait SourceOfTruth: Send + Sync {
    /// Top public knowledge bases by subscriber count (source order on ties).
    async fn top_knowledge_bases(&self, limit: i64) -> Result<Vec<KnowledgeBaseRow>, StoreError>;

    /// Areas of one knowledge base, ordered by (level, sort_order).
    async fn knowledge_areas(&self, kb_id: i64) -> Result<Vec<KnowledgeAreaRow>, StoreError>;

    /// Aggregate content statistics for one knowledge base.
    async fn content_statistics(&self, kb_id: i64) -> Result<ContentStatsRow, StoreError>;

    /// Top contents of a knowledge base by usage count.
    async fn hot_contents(&self, kb_id: i64, limit: i64) -> Result<Vec<ContentRow>, StoreError>;

    /// Ordered choice list of a choice-typed content.
    async fn choices(&self, content_id: i64) -> Result<Vec<ChoiceRow>, StoreError>;

    /// Distinct users with review activity since `since`, bounded by `limit`.
    async fn active_user_ids(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError>;

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRow>, StoreError>;

    /// Review aggregate for one calendar day (`YYYY-MM-DD`).
    async fn daily_review_stats(&self, date: &str) -> Result<DailyReviewRow, StoreError>;

    async fn knowledge_base_by_id(
        &self,
        kb_id: i64,
    ) -> Result<Option<KnowledgeBaseRow>, StoreError>;

    async fn user_point_state(
        &self,
        user_id: i64,
        content_id: i64,
    ) -> Result<Option<UserPointStateRow>, StoreError>;
}
