//! Typed records for source-of-truth rows and their cached projections.
//!
//! The relational store owns canonical state; the cache holds projections of
//! it. Each cache tier gets an explicit record type with a fixed field set,
//! so a hash write is always a total function of a source row rather than an
//! ad-hoc string map assembled at the call site.
//!
//! Hash-tier records expose `to_fields()` (the exact field/value pairs
//! written to the store); blob-tier records derive `Serialize`/`Deserialize`
//! and go through [`crate::codec`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ───────────────────────────────────────────────────────────────────────────
// Source-of-truth rows
// ───────────────────────────────────────────────────────────────────────────

/// A `knowledge_bases` row, as returned by ranked-list and by-id queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub visibility: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub difficulty_level: Option<f64>,
    pub content_count: i64,
    pub subscriber_count: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A `knowledge_areas` row, ordered by (level, sort_order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAreaRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub level: i64,
    pub sort_order: i64,
}

/// A knowledge-point content row joined with its per-KB usage count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRow {
    pub id: i64,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub kind: Option<String>,
    pub difficulty_level: Option<f64>,
    pub explanation: Option<String>,
    pub usage_count: i64,
}

impl ContentRow {
    /// Whether this point carries a choice list worth warming.
    #[must_use]
    pub fn is_choice(&self) -> bool {
        self.kind.as_deref() == Some("choice")
    }
}

/// One choice of a choice-typed knowledge point, ordered by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRow {
    pub key: String,
    pub text: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

/// A `users` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub status: String,
    pub last_login: Option<String>,
}

/// Aggregate content statistics for one knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentStatsRow {
    pub total_contents: i64,
    pub avg_difficulty: Option<f64>,
}

/// One calendar day's review aggregate across all users.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyReviewRow {
    pub active_users: i64,
    pub total_reviews: i64,
    pub avg_accuracy: Option<f64>,
}

/// A `user_knowledge_point_states` row for one (user, content) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserPointStateRow {
    pub mastery_level: i64,
    pub review_count: i64,
    pub correct_count: i64,
    pub consecutive_correct: i64,
}

// ───────────────────────────────────────────────────────────────────────────
// Cached projections, one type per tier
// ───────────────────────────────────────────────────────────────────────────

/// `kb:info:{id}` — flat knowledge-base fields, hash tier.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBaseInfo {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub visibility: String,
    pub content_count: i64,
    pub subscriber_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&KnowledgeBaseRow> for KnowledgeBaseInfo {
    fn from(row: &KnowledgeBaseRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            owner_id: row.owner_id,
            visibility: row.visibility.clone(),
            content_count: row.content_count,
            subscriber_count: row.subscriber_count,
            created_at: row.created_at.clone().unwrap_or_default(),
            updated_at: row.updated_at.clone().unwrap_or_default(),
        }
    }
}

impl KnowledgeBaseInfo {
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.to_string()),
            ("name".into(), self.name.clone()),
            ("owner_id".into(), self.owner_id.to_string()),
            ("visibility".into(), self.visibility.clone()),
            ("content_count".into(), self.content_count.to_string()),
            ("subscriber_count".into(), self.subscriber_count.to_string()),
            ("created_at".into(), self.created_at.clone()),
            ("updated_at".into(), self.updated_at.clone()),
        ]
    }
}

/// Nested metadata block of a `kb:detail:{id}` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailMetadata {
    pub description: String,
    pub icon: String,
    pub difficulty_level: f64,
    pub tags: Vec<String>,
}

/// Computed statistics block of a `kb:detail:{id}` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailStatistics {
    pub total_contents: i64,
    pub avg_difficulty: f64,
    /// Requires a signed-in user to compute; always 0 at warmup time.
    pub completion_rate: f64,
    pub last_updated: String,
}

/// `kb:detail:{id}` — assembled detail document, blob tier (codec-encoded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseDetail {
    pub metadata: DetailMetadata,
    pub areas: Vec<KnowledgeAreaRow>,
    pub statistics: DetailStatistics,
}

impl KnowledgeBaseDetail {
    /// Assemble the detail document from its source pieces.
    ///
    /// `as_of` is the recomputation timestamp stamped into the statistics
    /// block (RFC 3339).
    #[must_use]
    pub fn assemble(
        row: &KnowledgeBaseRow,
        areas: Vec<KnowledgeAreaRow>,
        stats: ContentStatsRow,
        as_of: String,
    ) -> Self {
        Self {
            metadata: DetailMetadata {
                description: row.description.clone().unwrap_or_default(),
                icon: row.icon.clone().unwrap_or_else(|| "📚".to_string()),
                difficulty_level: row.difficulty_level.unwrap_or(0.0),
                tags: Vec::new(),
            },
            areas,
            statistics: DetailStatistics {
                total_contents: stats.total_contents,
                avg_difficulty: stats.avg_difficulty.unwrap_or(0.0),
                completion_rate: 0.0,
                last_updated: as_of,
            },
        }
    }
}

/// `kp:content:{id}` — knowledge-point content, hash tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PointContent {
    pub question: String,
    pub answer: String,
    pub kind: String,
    pub difficulty: String,
    pub explanation: String,
}

impl From<&ContentRow> for PointContent {
    fn from(row: &ContentRow) -> Self {
        Self {
            question: row.question.clone().unwrap_or_default(),
            answer: row.answer.clone().unwrap_or_default(),
            kind: row.kind.clone().unwrap_or_else(|| "fill".to_string()),
            difficulty: row.difficulty_level.unwrap_or(1.0).to_string(),
            explanation: row.explanation.clone().unwrap_or_default(),
        }
    }
}

impl PointContent {
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("question".into(), self.question.clone()),
            ("answer".into(), self.answer.clone()),
            ("type".into(), self.kind.clone()),
            ("difficulty".into(), self.difficulty.clone()),
            ("explanation".into(), self.explanation.clone()),
        ]
    }
}

/// `user:info:{id}` — session-tier user record, hash tier.
#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub status: String,
    pub last_login: String,
}

impl From<&UserRow> for UserInfo {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username.clone(),
            email: row.email.clone(),
            status: row.status.clone(),
            last_login: row.last_login.clone().unwrap_or_default(),
        }
    }
}

impl UserInfo {
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.to_string()),
            ("username".into(), self.username.clone()),
            ("email".into(), self.email.clone()),
            ("status".into(), self.status.clone()),
            ("last_login".into(), self.last_login.clone()),
        ]
    }
}

/// `stats:global:daily:{date}` — daily global aggregate, hash tier.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyGlobalStats {
    pub total_reviews: i64,
    pub total_users_active: i64,
    pub avg_accuracy: f64,
}

impl From<&DailyReviewRow> for DailyGlobalStats {
    fn from(row: &DailyReviewRow) -> Self {
        Self {
            total_reviews: row.total_reviews,
            total_users_active: row.active_users,
            avg_accuracy: row.avg_accuracy.unwrap_or(0.0),
        }
    }
}

impl DailyGlobalStats {
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("total_reviews".into(), self.total_reviews.to_string()),
            ("total_users_active".into(), self.total_users_active.to_string()),
            ("avg_accuracy".into(), format!("{:.2}", self.avg_accuracy)),
            // Not yet computed anywhere; field kept for the dashboard's shape.
            ("total_new_content".into(), "0".into()),
        ]
    }
}

/// Convenience for tests and callers comparing hash contents.
#[must_use]
pub fn fields_to_map(fields: &[(String, String)]) -> HashMap<String, String> {
    fields.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb_row() -> KnowledgeBaseRow {
        KnowledgeBaseRow {
            id: 1,
            name: "Rust Basics".into(),
            owner_id: 9,
            visibility: "public".into(),
            description: Some("ownership and borrowing".into()),
            icon: None,
            difficulty_level: Some(2.5),
            content_count: 3,
            subscriber_count: 10,
            created_at: Some("2026-01-01T00:00:00".into()),
            updated_at: None,
        }
    }

    #[test]
    fn kb_info_fields_are_total() {
        let info = KnowledgeBaseInfo::from(&kb_row());
        let map = fields_to_map(&info.to_fields());
        assert_eq!(map["id"], "1");
        assert_eq!(map["name"], "Rust Basics");
        assert_eq!(map["subscriber_count"], "10");
        assert_eq!(map["created_at"], "2026-01-01T00:00:00");
        assert_eq!(map["updated_at"], "");
        assert_eq!(map.len(), 8);
    }

    #[test]
    fn detail_assembly_defaults() {
        let detail = KnowledgeBaseDetail::assemble(
            &kb_row(),
            vec![],
            ContentStatsRow { total_contents: 3, avg_difficulty: None },
            "2026-08-05T00:00:00Z".into(),
        );
        assert_eq!(detail.metadata.icon, "📚");
        assert_eq!(detail.metadata.description, "ownership and borrowing");
        assert_eq!(detail.statistics.avg_difficulty, 0.0);
        assert_eq!(detail.statistics.completion_rate, 0.0);
        assert!(detail.areas.is_empty());
    }

    #[test]
    fn point_content_defaults_to_fill() {
        let row = ContentRow {
            id: 11,
            question: Some("2+2?".into()),
            answer: Some("4".into()),
            kind: None,
            difficulty_level: None,
            explanation: None,
            usage_count: 5,
        };
        let content = PointContent::from(&row);
        let map = fields_to_map(&content.to_fields());
        assert_eq!(map["type"], "fill");
        assert_eq!(map["difficulty"], "1");
        assert!(!row.is_choice());
    }

    #[test]
    fn daily_stats_format_accuracy_to_two_places() {
        let stats = DailyGlobalStats::from(&DailyReviewRow {
            active_users: 4,
            total_reviews: 100,
            avg_accuracy: Some(0.84615),
        });
        let map = fields_to_map(&stats.to_fields());
        assert_eq!(map["avg_accuracy"], "0.85");
        assert_eq!(map["total_new_content"], "0");
    }
}
