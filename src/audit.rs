//! Consistency auditor: sampled drift detection between cache and source.
//!
//! Two spot checks per run: the first 20 knowledge-base `info` records in
//! enumeration order (the most recently warmed entities tend to surface
//! together), and a uniform random sample of up to 50 per-user mastery-state
//! records. Findings are reported for operator visibility; nothing is
//! auto-repaired.
//!
//! [`ConsistencyAuditor::check`] is infallible: per-entity source failures
//! are logged and skipped, and any operational failure of a sub-audit is
//! converted into a `check_error` finding instead of propagating.

use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::keys::{self, KB_INFO_PREFIX, USER_STATE_PREFIX};
use crate::metrics;
use crate::store::traits::{SourceOfTruth, StoreError, TieredCache};

/// Knowledge-base audit inspects the first this-many enumerated records.
pub const KB_AUDIT_SAMPLE: usize = 20;

/// User-state audit inspects a random sample of at most this many records.
pub const USER_STATE_AUDIT_SAMPLE: usize = 50;

/// One detected divergence, or an operational failure of the audit itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ConsistencyFinding {
    /// Cache and source disagree on audited fields; both views included.
    DataMismatch {
        entity: String,
        id: String,
        cached: Value,
        source: Value,
    },
    /// The audit itself failed operationally (not a data problem).
    CheckError { scope: String, error: String },
}

impl ConsistencyFinding {
    #[must_use]
    pub fn is_mismatch(&self) -> bool {
        matches!(self, ConsistencyFinding::DataMismatch { .. })
    }
}

pub struct ConsistencyAuditor {
    cache: Arc<dyn TieredCache>,
    source: Arc<dyn SourceOfTruth>,
}

impl ConsistencyAuditor {
    #[must_use]
    pub fn new(cache: Arc<dyn TieredCache>, source: Arc<dyn SourceOfTruth>) -> Self {
        Self { cache, source }
    }

    /// Run both sub-audits and collect findings. Never fails.
    pub async fn check(&self) -> Vec<ConsistencyFinding> {
        info!("starting consistency check");
        let _timer = metrics::LatencyTimer::new("check");
        let mut findings = Vec::new();

        match self.check_knowledge_bases().await {
            Ok(mut batch) => findings.append(&mut batch),
            Err(e) => {
                warn!(error = %e, "knowledge-base audit failed");
                findings.push(ConsistencyFinding::CheckError {
                    scope: "knowledge_base".into(),
                    error: e.to_string(),
                });
            }
        }

        match self.check_user_states().await {
            Ok(mut batch) => findings.append(&mut batch),
            Err(e) => {
                warn!(error = %e, "user-state audit failed");
                findings.push(ConsistencyFinding::CheckError {
                    scope: "user_state".into(),
                    error: e.to_string(),
                });
            }
        }

        for finding in &findings {
            match finding {
                ConsistencyFinding::DataMismatch { entity, .. } => {
                    metrics::record_audit_finding(entity, "data_mismatch");
                }
                ConsistencyFinding::CheckError { scope, .. } => {
                    metrics::record_audit_finding(scope, "check_error");
                }
            }
        }

        if findings.is_empty() {
            info!("consistency check passed");
        } else {
            warn!(findings = findings.len(), "consistency check found divergence");
        }
        findings
    }

    /// Compare the first [`KB_AUDIT_SAMPLE`] cached knowledge bases against
    /// their source rows, field by field.
    async fn check_knowledge_bases(&self) -> Result<Vec<ConsistencyFinding>, StoreError> {
        let mut keys = self.cache.keys_by_prefix(KB_INFO_PREFIX).await?;
        keys.truncate(KB_AUDIT_SAMPLE);

        let mut findings = Vec::new();
        for key in keys {
            let Ok(kb_id) = keys::last_segment(&key).parse::<i64>() else {
                continue;
            };
            let cached = self.cache.hash_get_all(&key).await?;

            let row = match self.source.knowledge_base_by_id(kb_id).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(kb_id, error = %e, "source query failed, skipping entity");
                    continue;
                }
            };
            let Some(db) = row else { continue };

            let name_matches = cached.get("name").map(String::as_str).unwrap_or("") == db.name;
            let subscribers_match = cached
                .get("subscriber_count")
                .map(String::as_str)
                .unwrap_or("")
                == db.subscriber_count.to_string();

            if !name_matches || !subscribers_match {
                findings.push(ConsistencyFinding::DataMismatch {
                    entity: "knowledge_base".into(),
                    id: kb_id.to_string(),
                    cached: serde_json::to_value(&cached).unwrap_or(Value::Null),
                    source: serde_json::to_value(&db).unwrap_or(Value::Null),
                });
            }
        }
        Ok(findings)
    }

    /// Compare a random sample of cached mastery states against their source
    /// rows.
    async fn check_user_states(&self) -> Result<Vec<ConsistencyFinding>, StoreError> {
        let keys = self.cache.keys_by_prefix(USER_STATE_PREFIX).await?;
        let sample: Vec<String> = keys
            .choose_multiple(&mut rand::thread_rng(), USER_STATE_AUDIT_SAMPLE)
            .cloned()
            .collect();

        let mut findings = Vec::new();
        for key in sample {
            // user:kp:state:{user}:{content}
            let parts: Vec<&str> = key.split(':').collect();
            if parts.len() < 5 {
                continue;
            }
            let (Ok(user_id), Ok(content_id)) = (parts[3].parse::<i64>(), parts[4].parse::<i64>())
            else {
                continue;
            };

            let cached = self.cache.hash_get_all(&key).await?;

            let row = match self.source.user_point_state(user_id, content_id).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(user_id, content_id, error = %e, "source query failed, skipping entity");
                    continue;
                }
            };
            let Some(db) = row else { continue };

            let mastery_matches = cached
                .get("mastery_level")
                .map(String::as_str)
                .unwrap_or("")
                == db.mastery_level.to_string();
            let reviews_match = cached
                .get("review_count")
                .map(String::as_str)
                .unwrap_or("")
                == db.review_count.to_string();

            if !mastery_matches || !reviews_match {
                findings.push(ConsistencyFinding::DataMismatch {
                    entity: "user_state".into(),
                    id: format!("{user_id}:{content_id}"),
                    cached: serde_json::to_value(&cached).unwrap_or(Value::Null),
                    source: serde_json::to_value(db).unwrap_or(Value::Null),
                });
            }
        }
        Ok(findings)
    }
}
