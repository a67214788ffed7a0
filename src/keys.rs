//! Cache key namespaces and TTL policy.
//!
//! Every cached projection lives under a fixed, colon-delimited key prefix
//! (one namespace per tier). The key shapes are shared with the deployed
//! request path, so they are centralized here rather than scattered through
//! the engines.
//!
//! ```text
//! kb:info:{id}                      hash    7 d   flat knowledge-base fields
//! kb:detail:{id}                    blob    7 d   codec-encoded detail document
//! kp:content:{id}                   hash    7 d   knowledge-point content
//! kp:choices:{id}                   blob    7 d   codec-encoded choice list
//! user:info:{id}                    hash    24 h  session-tier user record
//! user:online:{id}                  string  -     last-activity marker (request path)
//! user:session:{id}                 blob    -     session payload (request path)
//! user:kp:state:{user}:{content}    hash    -     mastery state (request path)
//! stats:global:daily:{YYYY-MM-DD}   hash    24 h  daily global aggregate
//! stats:kb:{id}:daily:{YYYY-MM-DD}  hash    24 h  daily per-KB aggregate
//! config:{name}                     blob    24 h  named config default
//! access:count:{kind}:{id}          counter cfg   access counter
//! hotspot:{kind}:daily              zset    24 h  bounded top-K ranking
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retention for content-like tiers (info, detail, content, choices).
pub const CONTENT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Retention for daily tiers (config, statistics, session user-info, hotspot).
pub const DAILY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Maximum members retained in a hotspot ranking set.
pub const HOTSPOT_CAP: i64 = 1000;

/// Days of daily statistics kept before the cleanup sweep removes them.
pub const STATS_RETENTION_DAYS: i64 = 7;

pub const KB_INFO_PREFIX: &str = "kb:info:";
pub const KP_CONTENT_PREFIX: &str = "kp:content:";
pub const USER_INFO_PREFIX: &str = "user:info:";
pub const USER_ONLINE_PREFIX: &str = "user:online:";
pub const USER_STATE_PREFIX: &str = "user:kp:state:";
pub const ACCESS_KP_PREFIX: &str = "access:count:kp:";
pub const STATS_PREFIX: &str = "stats:";
pub const STATS_GLOBAL_DAILY_PREFIX: &str = "stats:global:daily:";
pub const STATS_KB_PREFIX: &str = "stats:kb:";
pub const HOTSPOT_PREFIX: &str = "hotspot:";

/// The resource kinds tracked by access counters and hotspot rankings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    KnowledgeBase,
    KnowledgePoint,
    User,
    GlobalStat,
}

impl ResourceKind {
    /// Key fragment used inside `access:count:` and `hotspot:` namespaces.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::KnowledgeBase => "kb",
            ResourceKind::KnowledgePoint => "kp",
            ResourceKind::User => "user",
            ResourceKind::GlobalStat => "global",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn kb_info(id: i64) -> String {
    format!("{KB_INFO_PREFIX}{id}")
}

#[must_use]
pub fn kb_detail(id: i64) -> String {
    format!("kb:detail:{id}")
}

#[must_use]
pub fn kp_content(id: i64) -> String {
    format!("{KP_CONTENT_PREFIX}{id}")
}

#[must_use]
pub fn kp_choices(id: i64) -> String {
    format!("kp:choices:{id}")
}

#[must_use]
pub fn user_info(id: i64) -> String {
    format!("{USER_INFO_PREFIX}{id}")
}

#[must_use]
pub fn user_online(id: &str) -> String {
    format!("{USER_ONLINE_PREFIX}{id}")
}

#[must_use]
pub fn user_session(id: &str) -> String {
    format!("user:session:{id}")
}

#[must_use]
pub fn config_entry(name: &str) -> String {
    format!("config:{name}")
}

#[must_use]
pub fn global_daily_stats(date: &str) -> String {
    format!("{STATS_GLOBAL_DAILY_PREFIX}{date}")
}

#[must_use]
pub fn access_counter(kind: ResourceKind, id: i64) -> String {
    format!("access:count:{}:{id}", kind.as_str())
}

#[must_use]
pub fn hotspot(kind: ResourceKind) -> String {
    format!("{HOTSPOT_PREFIX}{}:daily", kind.as_str())
}

/// Last colon-delimited segment of a key (the embedded id or date).
#[must_use]
pub fn last_segment(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

/// Whether a `stats:kb:*` key is a dated daily aggregate
/// (`stats:kb:{id}:daily:{date}`) rather than some other per-KB stat.
#[must_use]
pub fn is_dated_kb_stat(key: &str) -> bool {
    key.starts_with(STATS_KB_PREFIX) && key.contains(":daily:")
}
