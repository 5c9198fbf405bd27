//! Article data access
//!
//! Upsert semantics are COALESCE-merge on `source_url`: an incoming NULL
//! never overwrites a stored value. Claiming for AI processing mirrors the
//! job queue's SKIP LOCKED discipline, with the SCRAPED status doubling as
//! the in-progress marker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::models::{Article, ArticleDraft, EntityType, ProcessStatus, Sentiment};

/// Slim projection of an article awaiting AI processing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PendingArticle {
    pub id: i64,
    pub title_ko: Option<String>,
    pub content_ko: Option<String>,
    pub summary_ko: Option<String>,
    pub artist_name_ko: Option<String>,
    pub global_priority: bool,
    pub language: String,
    pub source_url: String,
    pub job_id: Option<i64>,
}

/// One replacement row for `entity_mappings`.
#[derive(Debug, Clone, Serialize)]
pub struct MappingRecord {
    pub entity_type: EntityType,
    pub artist_id: Option<i64>,
    pub group_id: Option<i64>,
    pub entity_name_ko: String,
    pub confidence_score: f64,
    pub context_snippet: String,
}

/// Write-through payload for the intelligence engine. `None` fields keep
/// the stored value; `system_note: Some("")` clears the column to NULL.
#[derive(Debug, Clone, Default)]
pub struct ArticleStatusUpdate {
    pub status: ProcessStatus,
    pub topic_summary: Option<String>,
    pub system_note: Option<String>,
    pub title_en: Option<String>,
    pub summary_en: Option<String>,
    pub hashtags_en: Option<Vec<String>>,
    pub seo_hashtags: Option<serde_json::Value>,
    pub sentiment: Option<Sentiment>,
}

#[derive(Clone)]
pub struct ArticleStore {
    pool: PgPool,
}

impl ArticleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── upsert ───────────────────────────────────────────────

    /// Insert or merge an article keyed by `source_url`. Returns the row id.
    pub async fn upsert_article(
        &self,
        source_url: &str,
        draft: &ArticleDraft,
        job_id: Option<i64>,
    ) -> anyhow::Result<i64> {
        let (article_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO articles (
                source_url, language,
                title_ko, title_en, content_ko,
                summary_ko, summary_en,
                author, artist_name_ko, artist_name_en,
                global_priority, hashtags_ko, hashtags_en, seo_hashtags,
                thumbnail_url, process_status, job_id, published_at
            ) VALUES (
                $1, COALESCE($2, 'kr'),
                $3, $4, $5,
                $6, $7,
                $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17, $18
            )
            ON CONFLICT (source_url) DO UPDATE SET
                language        = COALESCE($2, articles.language),
                title_ko        = COALESCE(EXCLUDED.title_ko,       articles.title_ko),
                title_en        = COALESCE(EXCLUDED.title_en,       articles.title_en),
                content_ko      = COALESCE(EXCLUDED.content_ko,     articles.content_ko),
                summary_ko      = COALESCE(EXCLUDED.summary_ko,     articles.summary_ko),
                summary_en      = COALESCE(EXCLUDED.summary_en,     articles.summary_en),
                author          = COALESCE(EXCLUDED.author,         articles.author),
                artist_name_ko  = COALESCE(EXCLUDED.artist_name_ko, articles.artist_name_ko),
                artist_name_en  = COALESCE(EXCLUDED.artist_name_en, articles.artist_name_en),
                global_priority = EXCLUDED.global_priority,
                hashtags_ko     = EXCLUDED.hashtags_ko,
                hashtags_en     = EXCLUDED.hashtags_en,
                seo_hashtags    = COALESCE(EXCLUDED.seo_hashtags,   articles.seo_hashtags),
                thumbnail_url   = COALESCE(EXCLUDED.thumbnail_url,  articles.thumbnail_url),
                process_status  = EXCLUDED.process_status,
                published_at    = COALESCE(EXCLUDED.published_at,   articles.published_at),
                job_id          = COALESCE(EXCLUDED.job_id,         articles.job_id)
            RETURNING id
            "#,
        )
        .bind(source_url)
        .bind(&draft.language)
        .bind(&draft.title_ko)
        .bind(&draft.title_en)
        .bind(&draft.content_ko)
        .bind(&draft.summary_ko)
        .bind(&draft.summary_en)
        .bind(&draft.author)
        .bind(&draft.artist_name_ko)
        .bind(&draft.artist_name_en)
        .bind(draft.global_priority)
        .bind(&draft.hashtags_ko)
        .bind(&draft.hashtags_en)
        .bind(&draft.seo_hashtags)
        .bind(&draft.thumbnail_url)
        .bind(draft.process_status.as_str())
        .bind(job_id)
        .bind(draft.published_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(article_id, source_url, "article upserted");
        Ok(article_id)
    }

    // ── reads ────────────────────────────────────────────────

    pub async fn get_by_url(&self, source_url: &str) -> anyhow::Result<Option<Article>> {
        Ok(
            sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE source_url = $1")
                .bind(source_url)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<Article>> {
        Ok(
            sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Bulk status lookup for URL triage. URLs missing from the store are
    /// absent from the map.
    pub async fn statuses_by_urls(
        &self,
        urls: &[String],
    ) -> anyhow::Result<HashMap<String, ProcessStatus>> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, ProcessStatus)> = sqlx::query_as(
            "SELECT source_url, process_status FROM articles WHERE source_url = ANY($1)",
        )
        .bind(urls)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Newest `published_at` in the store; the check-latest baseline.
    pub async fn latest_published_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let (max,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MAX(published_at) FROM articles WHERE published_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    // ── AI-processing claims ─────────────────────────────────

    /// Claim up to `limit` PENDING articles under row locks that skip
    /// locked rows, transitioning them to SCRAPED as the in-progress
    /// marker, all in one transaction.
    pub async fn claim_pending_articles(
        &self,
        limit: i64,
        job_id: Option<i64>,
    ) -> anyhow::Result<Vec<PendingArticle>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<PendingArticle> = sqlx::query_as(
            r#"
            SELECT id, title_ko, content_ko, summary_ko,
                   artist_name_ko, global_priority, language, source_url, job_id
            FROM   articles
            WHERE  process_status = 'PENDING'
              AND  ($2::bigint IS NULL OR job_id = $2)
            ORDER  BY created_at ASC
            LIMIT  $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .bind(job_id)
        .fetch_all(&mut *tx)
        .await?;

        if !rows.is_empty() {
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            sqlx::query(
                "UPDATE articles SET process_status = 'SCRAPED', updated_at = NOW() \
                 WHERE id = ANY($1)",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows)
    }

    /// Dry-run variant: plain read, no locks, no status transition.
    pub async fn read_pending_articles(
        &self,
        limit: i64,
        job_id: Option<i64>,
    ) -> anyhow::Result<Vec<PendingArticle>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, title_ko, content_ko, summary_ko,
                   artist_name_ko, global_priority, language, source_url, job_id
            FROM   articles
            WHERE  process_status = 'PENDING'
              AND  ($2::bigint IS NULL OR job_id = $2)
            ORDER  BY created_at ASC
            LIMIT  $1
            "#,
        )
        .bind(limit)
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// SCRAPED rows for the simple post-processor, newest first.
    pub async fn scraped_articles(&self, limit: i64) -> anyhow::Result<Vec<PendingArticle>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, title_ko, content_ko, summary_ko,
                   artist_name_ko, global_priority, language, source_url, job_id
            FROM   articles
            WHERE  process_status = 'SCRAPED'
            ORDER  BY published_at DESC NULLS LAST
            LIMIT  $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn current_status(&self, id: i64) -> anyhow::Result<Option<ProcessStatus>> {
        let row: Option<(ProcessStatus,)> =
            sqlx::query_as("SELECT process_status FROM articles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(s,)| s))
    }

    // ── write-through ────────────────────────────────────────

    /// Check the lifecycle state machine before a status write. Articles
    /// only move forward; anything else is skipped with a warning so a
    /// concurrent transition never gets clobbered.
    async fn transition_allowed(
        &self,
        article_id: i64,
        next: ProcessStatus,
    ) -> anyhow::Result<bool> {
        let Some(current) = self.current_status(article_id).await? else {
            tracing::warn!(article_id, "article missing, status write skipped");
            return Ok(false);
        };
        if current.can_transition_to(next) {
            return Ok(true);
        }
        tracing::warn!(
            article_id,
            current = current.as_str(),
            next = next.as_str(),
            "disallowed status transition, write skipped"
        );
        Ok(false)
    }

    /// Intelligence write-through. EN fields and SEO hashtags are only
    /// overwritten when the engine produced values; `summary_ko` only fills
    /// an empty column; an empty-string `system_note` clears it to NULL.
    pub async fn update_article_status(
        &self,
        article_id: i64,
        update: &ArticleStatusUpdate,
    ) -> anyhow::Result<()> {
        if !self.transition_allowed(article_id, update.status).await? {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE articles
            SET process_status = $2,
                summary_ko    = COALESCE(NULLIF(trim(coalesce(summary_ko, '')), ''), $3),
                title_en      = CASE WHEN $4::text IS NOT NULL THEN $4 ELSE title_en END,
                summary_en    = CASE WHEN $5::text IS NOT NULL THEN $5 ELSE summary_en END,
                hashtags_en   = CASE WHEN $6::text[] IS NOT NULL THEN $6 ELSE hashtags_en END,
                seo_hashtags  = CASE WHEN $7::jsonb IS NOT NULL THEN $7 ELSE seo_hashtags END,
                sentiment     = CASE WHEN $8::varchar IS NOT NULL THEN $8 ELSE sentiment END,
                system_note   = CASE
                                    WHEN $9::text = '' THEN NULL
                                    WHEN $9::text IS NOT NULL THEN $9
                                    ELSE system_note
                                END,
                updated_at    = NOW()
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .bind(update.status.as_str())
        .bind(&update.topic_summary)
        .bind(&update.title_en)
        .bind(&update.summary_en)
        .bind(&update.hashtags_en)
        .bind(&update.seo_hashtags)
        .bind(update.sentiment)
        .bind(&update.system_note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_error(&self, article_id: i64) -> anyhow::Result<()> {
        if !self.transition_allowed(article_id, ProcessStatus::Error).await? {
            return Ok(());
        }

        sqlx::query(
            "UPDATE articles SET process_status = 'ERROR', updated_at = NOW() WHERE id = $1",
        )
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Simple post-processor write-back: fill only empty columns, then
    /// transition SCRAPED → PROCESSED. Re-running over the same row is a
    /// no-op for populated fields.
    pub async fn apply_simple_output(
        &self,
        article_id: i64,
        title_en: Option<&str>,
        summary_ko: Option<&str>,
        summary_en: Option<&str>,
        hashtags_en: &[String],
    ) -> anyhow::Result<()> {
        if !self
            .transition_allowed(article_id, ProcessStatus::Processed)
            .await?
        {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE articles
            SET title_en    = COALESCE(NULLIF(trim(coalesce(title_en, '')), ''), $2),
                summary_ko  = COALESCE(NULLIF(trim(coalesce(summary_ko, '')), ''), $3),
                summary_en  = COALESCE(NULLIF(trim(coalesce(summary_en, '')), ''), $4),
                hashtags_en = CASE WHEN cardinality(hashtags_en) = 0 THEN $5
                                   ELSE hashtags_en END,
                process_status = 'PROCESSED',
                updated_at  = NOW()
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .bind(title_en)
        .bind(summary_ko)
        .bind(summary_en)
        .bind(hashtags_en)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── entity mappings ──────────────────────────────────────

    /// Replace every mapping for an article: one DELETE plus a bulk INSERT
    /// in a single transaction.
    pub async fn replace_entity_mappings(
        &self,
        article_id: i64,
        records: &[MappingRecord],
    ) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entity_mappings WHERE article_id = $1")
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO entity_mappings
                    (article_id, entity_type, artist_id, group_id,
                     entity_name_ko, confidence_score, context_snippet)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(article_id)
            .bind(record.entity_type.as_str())
            .bind(record.artist_id)
            .bind(record.group_id)
            .bind(&record.entity_name_ko)
            .bind(record.confidence_score as f32)
            .bind(&record.context_snippet)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    // ── images / thumbnails ──────────────────────────────────

    pub async fn upsert_article_image(
        &self,
        article_id: i64,
        original_url: &str,
        thumbnail_path: Option<&str>,
        is_representative: bool,
        alt_text: Option<&str>,
    ) -> anyhow::Result<i64> {
        let (image_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO article_images
                (article_id, original_url, thumbnail_path, is_representative, alt_text)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (original_url) DO UPDATE SET
                thumbnail_path    = COALESCE(EXCLUDED.thumbnail_path, article_images.thumbnail_path),
                is_representative = EXCLUDED.is_representative,
                alt_text          = COALESCE(EXCLUDED.alt_text, article_images.alt_text),
                updated_at        = NOW()
            RETURNING id
            "#,
        )
        .bind(article_id)
        .bind(original_url)
        .bind(thumbnail_path)
        .bind(is_representative)
        .bind(alt_text)
        .fetch_one(&self.pool)
        .await?;

        Ok(image_id)
    }

    /// Recent articles still lacking a thumbnail, for the backfill sweep.
    pub async fn articles_missing_thumbnail(
        &self,
        days: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<(i64, String)>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, source_url
            FROM   articles
            WHERE  thumbnail_url IS NULL
              AND  created_at > NOW() - make_interval(days => $1)
            ORDER  BY created_at DESC
            LIMIT  $2
            "#,
        )
        .bind(days)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn update_thumbnail(&self, article_id: i64, url: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE articles SET thumbnail_url = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(article_id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
