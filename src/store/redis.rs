//! Redis implementation of [`TieredCache`].
//!
//! Commands are issued through a shared [`ConnectionManager`] (the manager
//! multiplexes and reconnects internally). Individual operations are wrapped
//! in query-mode retry; the initial connection uses startup-mode retry so a
//! bad URL fails fast.
//!
//! Key enumeration uses SCAN rather than KEYS, so a sweep never blocks the
//! server; the resulting key set is approximate under concurrent mutation,
//! which every sweep tolerates by design.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client};

use super::traits::{StoreError, TieredCache};
use crate::retry::{retry, RetryConfig};

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect with startup-mode retry (fails fast on a bad URL).
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        let client = Client::open(connection_string)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| StoreError::Connection(e.to_string()))?;

        Ok(Self { connection })
    }

    fn backend(e: redis::RedisError) -> StoreError {
        StoreError::Backend(e.to_string())
    }
}

/// Parse Redis INFO output (`key:value` lines, `#` section headers).
fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            line.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

#[async_trait]
impl TieredCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.connection.clone();
        retry("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.to_string();
            async move {
                let data: Option<Vec<u8>> = conn.get(&key).await?;
                Ok(data)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        let ttl_secs = ttl.as_secs();
        retry("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.to_string();
            let value = value.to_vec();
            async move {
                if ttl_secs == 0 {
                    // TTL 0 means "no expiry" (config-like entries)
                    let _: () = conn.set(&key, &value).await?;
                } else {
                    let _: () = conn.set_ex(&key, &value, ttl_secs).await?;
                }
                Ok(())
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let conn = self.connection.clone();
        let ttl_secs = ttl.as_secs() as i64;
        retry("redis_hash_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.to_string();
            let fields = fields.to_vec();
            async move {
                let mut pipeline = pipe();
                pipeline.hset_multiple(&key, &fields).ignore();
                if ttl_secs > 0 {
                    pipeline.expire(&key, ttl_secs).ignore();
                }
                pipeline.query_async::<()>(&mut conn).await?;
                Ok(())
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.connection.clone();
        retry("redis_hash_get_all", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.to_string();
            async move {
                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                Ok(fields)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        // Not retried: INCR is not idempotent, and a retry after an
        // ambiguous failure could double-count an access.
        let mut conn = self.connection.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(Self::backend)?;
        Ok(count.max(0) as u64)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        let ttl_secs = ttl.as_secs() as i64;
        retry("redis_expire", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.to_string();
            async move {
                let _: bool = conn.expire(&key, ttl_secs).await?;
                Ok(())
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn sorted_set_upsert(
        &self,
        set_key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), StoreError> {
        let conn = self.connection.clone();
        retry("redis_zadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let set_key = set_key.to_string();
            let member = member.to_string();
            async move {
                let _: () = conn.zadd(&set_key, &member, score).await?;
                Ok(())
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn sorted_set_trim_to_range(
        &self,
        set_key: &str,
        lo_rank: i64,
        hi_rank: i64,
    ) -> Result<u64, StoreError> {
        let conn = self.connection.clone();
        retry("redis_ztrim", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let set_key = set_key.to_string();
            async move {
                let removed: u64 = conn
                    .zremrangebyrank(&set_key, lo_rank as isize, hi_rank as isize)
                    .await?;
                Ok(removed)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn sorted_set_top(
        &self,
        set_key: &str,
        k: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if k == 0 {
            return Ok(vec![]);
        }
        let conn = self.connection.clone();
        retry("redis_ztop", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let set_key = set_key.to_string();
            async move {
                let members: Vec<(String, f64)> =
                    conn.zrevrange_withscores(&set_key, 0, k as isize - 1).await?;
                Ok(members)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn sorted_set_len(&self, set_key: &str) -> Result<u64, StoreError> {
        let conn = self.connection.clone();
        retry("redis_zcard", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let set_key = set_key.to_string();
            async move {
                let len: u64 = conn.zcard(&set_key).await?;
                Ok(len)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Single attempt: a SCAN cursor is stateful, so blindly re-running a
        // half-finished enumeration could return duplicates to the caller.
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(Self::backend)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let conn = self.connection.clone();
        retry("redis_delete", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let keys = keys.to_vec();
            async move {
                let removed: u64 = conn.del(keys).await?;
                Ok(removed)
            }
        })
        .await
        .map_err(Self::backend)
    }

    async fn store_info(&self) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.connection.clone();
        let raw: String = retry("redis_info", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            async move {
                let raw: String = cmd("INFO").query_async(&mut conn).await?;
                Ok(raw)
            }
        })
        .await
        .map_err(Self::backend)?;

        Ok(parse_info(&raw))
    }

    async fn memory_purge(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        cmd("MEMORY")
            .arg("PURGE")
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_parsing_skips_sections_and_blanks() {
        let raw = "# Memory\r\nused_memory:1024\r\nused_memory_human:1.00K\r\n\r\n# Stats\r\nkeyspace_hits:10\r\nkeyspace_misses:2\r\n";
        let info = parse_info(raw);
        assert_eq!(info["used_memory"], "1024");
        assert_eq!(info["used_memory_human"], "1.00K");
        assert_eq!(info["keyspace_hits"], "10");
        assert!(!info.contains_key("# Memory"));
    }
}
