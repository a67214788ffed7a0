//! SQL implementation of [`SourceOfTruth`].
//!
//! Runs against MySQL in production and SQLite in development through sqlx's
//! `Any` driver, which constrains the type map:
//!
//! - DATETIME columns are read as `CAST(... AS CHAR)` (the Any driver has no
//!   datetime mapping; the cache stores timestamps as strings anyway).
//! - DECIMAL aggregates are read as `CAST(... AS DOUBLE)`.
//! - BOOLEAN flags are read as `CAST(... AS SIGNED)` and compared to zero.
//!
//! All queries are read-only; the connection pool is the only shared state.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::traits::{SourceOfTruth, StoreError};
use crate::records::{
    ChoiceRow, ContentRow, ContentStatsRow, DailyReviewRow, KnowledgeAreaRow, KnowledgeBaseRow,
    UserPointStateRow, UserRow,
};
use crate::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlSource {
    pool: AnyPool,
}

impl SqlSource {
    /// Connect with startup-mode retry (fails fast if the URL is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        install_drivers();

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
        })
        .await
        .map_err(|e: sqlx::Error| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Share the pool with an embedding application.
    #[must_use]
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    fn backend(e: sqlx::Error) -> StoreError {
        StoreError::Backend(e.to_string())
    }
}

fn kb_from_row(row: &AnyRow) -> Result<KnowledgeBaseRow, sqlx::Error> {
    Ok(KnowledgeBaseRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        visibility: row.try_get("visibility")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        difficulty_level: row.try_get("difficulty_level")?,
        content_count: row.try_get("content_count")?,
        subscriber_count: row.try_get("subscriber_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const KB_COLUMNS: &str = r#"
    id, name, owner_id, visibility, description, icon,
    CAST(difficulty_level AS DOUBLE) AS difficulty_level,
    content_count, subscriber_count,
    CAST(created_at AS CHAR) AS created_at,
    CAST(updated_at AS CHAR) AS updated_at
"#;

#[async_trait]
impl SourceOfTruth for SqlSource {
    async fn top_knowledge_bases(&self, limit: i64) -> Result<Vec<KnowledgeBaseRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT {KB_COLUMNS}
            FROM knowledge_bases
            WHERE visibility = 'public'
            ORDER BY subscriber_count DESC
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Self::backend)?;

        rows.iter()
            .map(|row| kb_from_row(row).map_err(Self::backend))
            .collect()
    }

    async fn knowledge_areas(&self, kb_id: i64) -> Result<Vec<KnowledgeAreaRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, parent_id, level, sort_order
            FROM knowledge_areas
            WHERE knowledge_base_id = ?
            ORDER BY level, sort_order
            "#,
        )
        .bind(kb_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::backend)?;

        rows.iter()
            .map(|row| {
                Ok(KnowledgeAreaRow {
                    id: row.try_get("id").map_err(Self::backend)?,
                    name: row.try_get("name").map_err(Self::backend)?,
                    description: row.try_get("description").map_err(Self::backend)?,
                    parent_id: row.try_get("parent_id").map_err(Self::backend)?,
                    level: row.try_get("level").map_err(Self::backend)?,
                    sort_order: row.try_get("sort_order").map_err(Self::backend)?,
                })
            })
            .collect()
    }

    async fn content_statistics(&self, kb_id: i64) -> Result<ContentStatsRow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_contents,
                   CAST(AVG(kpc.difficulty_level) AS DOUBLE) AS avg_difficulty
            FROM knowledge_point_contents kpc
            JOIN knowledge_base_content_relations kbcr ON kpc.id = kbcr.content_id
            WHERE kbcr.knowledge_base_id = ?
            "#,
        )
        .bind(kb_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(ContentStatsRow {
            total_contents: row.try_get("total_contents").map_err(Self::backend)?,
            avg_difficulty: row.try_get("avg_difficulty").map_err(Self::backend)?,
        })
    }

    async fn hot_contents(&self, kb_id: i64, limit: i64) -> Result<Vec<ContentRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT kpc.id, kpc.question, kpc.answer, kpc.type AS kind,
                   CAST(kpc.difficulty_level AS DOUBLE) AS difficulty_level,
                   kpc.explanation, kbcr.usage_count
            FROM knowledge_point_contents kpc
            JOIN knowledge_base_content_relations kbcr ON kpc.id = kbcr.content_id
            WHERE kbcr.knowledge_base_id = ?
            ORDER BY kbcr.usage_count DESC
            LIMIT ?
            "#,
        )
        .bind(kb_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::backend)?;

        rows.iter()
            .map(|row| {
                Ok(ContentRow {
                    id: row.try_get("id").map_err(Self::backend)?,
                    question: row.try_get("question").map_err(Self::backend)?,
                    answer: row.try_get("answer").map_err(Self::backend)?,
                    kind: row.try_get("kind").map_err(Self::backend)?,
                    difficulty_level: row.try_get("difficulty_level").map_err(Self::backend)?,
                    explanation: row.try_get("explanation").map_err(Self::backend)?,
                    usage_count: row.try_get("usage_count").map_err(Self::backend)?,
                })
            })
            .collect()
    }

    async fn choices(&self, content_id: i64) -> Result<Vec<ChoiceRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT choice_key, choice_text,
                   CAST(is_correct AS SIGNED) AS is_correct,
                   explanation
            FROM knowledge_point_choices
            WHERE content_id = ?
            ORDER BY choice_key
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::backend)?;

        rows.iter()
            .map(|row| {
                let flag: i64 = row.try_get("is_correct").map_err(Self::backend)?;
                Ok(ChoiceRow {
                    key: row.try_get("choice_key").map_err(Self::backend)?,
                    text: row.try_get("choice_text").map_err(Self::backend)?,
                    is_correct: flag != 0,
                    explanation: row.try_get("explanation").map_err(Self::backend)?,
                })
            })
            .collect()
    }

    async fn active_user_ids(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT user_id
            FROM user_review_histories
            WHERE reviewed_at >= ?
            LIMIT ?
            "#,
        )
        .bind(since.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::backend)?;

        rows.iter()
            .map(|row| row.try_get("user_id").map_err(Self::backend))
            .collect()
    }

    async fn user_by_id(&self, user_id: i64) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, status,
                   CAST(last_login AS CHAR) AS last_login
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::backend)?;

        row.map(|row| {
            Ok(UserRow {
                id: row.try_get("id").map_err(Self::backend)?,
                username: row.try_get("username").map_err(Self::backend)?,
                email: row.try_get("email").map_err(Self::backend)?,
                status: row.try_get("status").map_err(Self::backend)?,
                last_login: row.try_get("last_login").map_err(Self::backend)?,
            })
        })
        .transpose()
    }

    async fn daily_review_stats(&self, date: &str) -> Result<DailyReviewRow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT user_id) AS active_users,
                   COUNT(*) AS total_reviews,
                   CAST(AVG(CASE WHEN is_correct THEN 1 ELSE 0 END) AS DOUBLE) AS avg_accuracy
            FROM user_review_histories
            WHERE DATE(reviewed_at) = ?
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::backend)?;

        Ok(DailyReviewRow {
            active_users: row.try_get("active_users").map_err(Self::backend)?,
            total_reviews: row.try_get("total_reviews").map_err(Self::backend)?,
            avg_accuracy: row.try_get("avg_accuracy").map_err(Self::backend)?,
        })
    }

    async fn knowledge_base_by_id(
        &self,
        kb_id: i64,
    ) -> Result<Option<KnowledgeBaseRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT {KB_COLUMNS}
            FROM knowledge_bases
            WHERE id = ?
            "#
        );
        let row = sqlx::query(&sql)
            .bind(kb_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::backend)?;

        row.map(|row| kb_from_row(&row).map_err(Self::backend)).transpose()
    }

    async fn user_point_state(
        &self,
        user_id: i64,
        content_id: i64,
    ) -> Result<Option<UserPointStateRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT mastery_level, review_count, correct_count, consecutive_correct
            FROM user_knowledge_point_states
            WHERE user_id = ? AND content_id = ?
            "#,
        )
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::backend)?;

        row.map(|row| {
            Ok(UserPointStateRow {
                mastery_level: row.try_get("mastery_level").map_err(Self::backend)?,
                review_count: row.try_get("review_count").map_err(Self::backend)?,
                correct_count: row.try_get("correct_count").map_err(Self::backend)?,
                consecutive_correct: row.try_get("consecutive_correct").map_err(Self::backend)?,
            })
        })
        .transpose()
    }
}
