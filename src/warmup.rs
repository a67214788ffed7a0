//! Warmup engine: proactive, ordered cache population.
//!
//! Brings a cold cache to a known-good baseline before it serves traffic.
//! Phases run in dependency order — knowledge bases (with their hot points),
//! system config, global statistics, active sessions — and a phase failure
//! never aborts the later, independent phases. Per-entity failures inside a
//! phase are likewise isolated: siblings proceed, and every failure lands in
//! the returned [`WarmupReport`] alongside the counts.
//!
//! Re-running warmup against an unchanged source of truth overwrites every
//! record with identical contents (modulo recomputed timestamps); it never
//! errors on pre-existing keys.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::codec::{self, CodecError};
use crate::config::CacheConfig;
use crate::keys::{self, CONTENT_TTL, DAILY_TTL};
use crate::metrics;
use crate::records::{
    ContentRow, DailyGlobalStats, KnowledgeBaseDetail, KnowledgeBaseInfo, KnowledgeBaseRow,
    PointContent, UserInfo,
};
use crate::store::traits::{SourceOfTruth, StoreError, TieredCache};

/// One isolated failure inside an engine pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// What failed, e.g. `kb:17` or `kp:204`.
    pub entity: String,
    pub error: String,
}

/// Outcome of a single warmup phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub warmed: usize,
    pub failures: Vec<EntityFailure>,
}

impl PhaseReport {
    fn new(phase: &'static str) -> Self {
        Self {
            phase,
            warmed: 0,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, entity: impl Into<String>, error: impl fmt::Display) {
        let entity = entity.into();
        warn!(phase = self.phase, entity = %entity, error = %error, "warmup step failed");
        self.failures.push(EntityFailure {
            entity,
            error: error.to_string(),
        });
    }

    fn finish(self) -> Self {
        metrics::record_warmup_phase(self.phase, self.warmed, self.failures.len());
        info!(
            phase = self.phase,
            warmed = self.warmed,
            failed = self.failures.len(),
            "warmup phase complete"
        );
        self
    }
}

/// Structured outcome of a full warmup run.
#[derive(Debug, Clone, Default)]
pub struct WarmupReport {
    pub phases: Vec<PhaseReport>,
}

impl WarmupReport {
    #[must_use]
    pub fn total_warmed(&self) -> usize {
        self.phases.iter().map(|p| p.warmed).sum()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.phases.iter().any(|p| !p.failures.is_empty())
    }
}

impl fmt::Display for WarmupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "warmup: {} entities warmed, {} failures",
            self.total_warmed(),
            self.phases.iter().map(|p| p.failures.len()).sum::<usize>()
        )?;
        for phase in &self.phases {
            write!(f, "  {}: {} warmed", phase.phase, phase.warmed)?;
            if phase.failures.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, ", {} failed", phase.failures.len())?;
                for failure in &phase.failures {
                    writeln!(f, "    {}: {}", failure.entity, failure.error)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum WarmupError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub struct WarmupEngine {
    cache: Arc<dyn TieredCache>,
    source: Arc<dyn SourceOfTruth>,
    config: CacheConfig,
}

impl WarmupEngine {
    #[must_use]
    pub fn new(
        cache: Arc<dyn TieredCache>,
        source: Arc<dyn SourceOfTruth>,
        config: CacheConfig,
    ) -> Self {
        Self { cache, source, config }
    }

    /// Run all warmup phases in order.
    pub async fn run(&self) -> WarmupReport {
        info!("starting cache warmup");
        let _timer = metrics::LatencyTimer::new("warmup");

        let report = WarmupReport {
            phases: vec![
                self.warm_knowledge_bases().await,
                self.warm_system_configs().await,
                self.warm_global_statistics().await,
                self.warm_active_sessions().await,
            ],
        };

        info!(
            warmed = report.total_warmed(),
            failures = report.has_failures(),
            "cache warmup complete"
        );
        report
    }

    /// Phase 1: popular knowledge bases with their hot knowledge points.
    async fn warm_knowledge_bases(&self) -> PhaseReport {
        let mut phase = PhaseReport::new("knowledge_bases");

        let kbs = match self
            .source
            .top_knowledge_bases(self.config.warmup_popular_kb_count)
            .await
        {
            Ok(kbs) => kbs,
            Err(e) => {
                phase.fail("top_knowledge_bases", e);
                return phase.finish();
            }
        };

        for kb in &kbs {
            match self.preload_knowledge_base(kb).await {
                Ok(()) => phase.warmed += 1,
                Err(e) => phase.fail(format!("kb:{}", kb.id), e),
            }

            // Hot points are warmed even if a sibling KB failed; a point
            // failure only skips that point.
            match self
                .source
                .hot_contents(kb.id, self.config.warmup_hot_content_count)
                .await
            {
                Ok(contents) => {
                    for content in &contents {
                        match self.preload_knowledge_point(content).await {
                            Ok(()) => phase.warmed += 1,
                            Err(e) => phase.fail(format!("kp:{}", content.id), e),
                        }
                    }
                }
                Err(e) => phase.fail(format!("kb:{}:hot_contents", kb.id), e),
            }
        }

        phase.finish()
    }

    /// Write one KB's `info` hash and assembled `detail` blob.
    async fn preload_knowledge_base(&self, kb: &KnowledgeBaseRow) -> Result<(), WarmupError> {
        let info = KnowledgeBaseInfo::from(kb);
        self.cache
            .hash_set(&keys::kb_info(kb.id), &info.to_fields(), CONTENT_TTL)
            .await?;

        let areas = self.source.knowledge_areas(kb.id).await?;
        let stats = self.source.content_statistics(kb.id).await?;
        let detail = KnowledgeBaseDetail::assemble(kb, areas, stats, Utc::now().to_rfc3339());
        let payload = codec::encode(&detail)?;
        self.cache
            .set_with_ttl(&keys::kb_detail(kb.id), &payload, CONTENT_TTL)
            .await?;

        Ok(())
    }

    /// Write one point's `content` hash and, for choice-typed points with a
    /// non-empty choice list, its `choices` blob. An empty list writes
    /// nothing.
    async fn preload_knowledge_point(&self, content: &ContentRow) -> Result<(), WarmupError> {
        let point = PointContent::from(content);
        self.cache
            .hash_set(&keys::kp_content(content.id), &point.to_fields(), CONTENT_TTL)
            .await?;

        if content.is_choice() {
            let choices = self.source.choices(content.id).await?;
            if !choices.is_empty() {
                let payload = codec::encode(&choices)?;
                self.cache
                    .set_with_ttl(&keys::kp_choices(content.id), &payload, CONTENT_TTL)
                    .await?;
            }
        }

        Ok(())
    }

    /// Phase 2: static configuration defaults. These are not queried from
    /// the source of truth.
    async fn warm_system_configs(&self) -> PhaseReport {
        let mut phase = PhaseReport::new("system_config");

        let defaults = [
            ("app_name", json!("Recall")),
            ("version", json!("2.0.0")),
            ("maintenance_mode", json!(false)),
            ("max_daily_reviews", json!(200)),
            ("default_difficulty", json!(3)),
            ("review_intervals", json!([1, 3, 7, 15, 30, 90, 180, 365])),
        ];

        for (name, value) in &defaults {
            let result: Result<(), WarmupError> = async {
                let payload = codec::encode(value)?;
                self.cache
                    .set_with_ttl(&keys::config_entry(name), &payload, DAILY_TTL)
                    .await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => phase.warmed += 1,
                Err(e) => phase.fail(format!("config:{name}"), e),
            }
        }

        phase.finish()
    }

    /// Phase 3: today's global review aggregate, keyed by calendar date.
    async fn warm_global_statistics(&self) -> PhaseReport {
        let mut phase = PhaseReport::new("global_statistics");
        let today = Local::now().format("%Y-%m-%d").to_string();

        let result: Result<(), WarmupError> = async {
            let row = self.source.daily_review_stats(&today).await?;
            let stats = DailyGlobalStats::from(&row);
            self.cache
                .hash_set(&keys::global_daily_stats(&today), &stats.to_fields(), DAILY_TTL)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => phase.warmed += 1,
            Err(e) => phase.fail(format!("stats:{today}"), e),
        }

        phase.finish()
    }

    /// Phase 4: session-tier user records for recently active users.
    async fn warm_active_sessions(&self) -> PhaseReport {
        let mut phase = PhaseReport::new("active_sessions");
        let since = Utc::now() - ChronoDuration::hours(24);

        let user_ids = match self
            .source
            .active_user_ids(since, self.config.warmup_active_user_limit)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                phase.fail("active_user_ids", e);
                return phase.finish();
            }
        };

        for user_id in user_ids {
            let result: Result<bool, WarmupError> = async {
                match self.source.user_by_id(user_id).await? {
                    Some(user) => {
                        let info = UserInfo::from(&user);
                        self.cache
                            .hash_set(&keys::user_info(user_id), &info.to_fields(), DAILY_TTL)
                            .await?;
                        Ok(true)
                    }
                    // Row vanished since the activity query; nothing to warm
                    None => Ok(false),
                }
            }
            .await;

            match result {
                Ok(true) => phase.warmed += 1,
                Ok(false) => {}
                Err(e) => phase.fail(format!("user:{user_id}"), e),
            }
        }

        phase.finish()
    }
}
