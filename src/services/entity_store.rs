//! Entity registry data access: artists, groups, membership, glossary.

use serde::Serialize;
use sqlx::PgPool;

use crate::models::{Artist, ArtistRef, GlossaryCategory, GlossaryTerm, Group, MemberOf};

/// Slim group projection used by contextual linking.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupRef {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub global_priority: Option<i32>,
}

/// Name projection handed to the profile enricher.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrichmentTarget {
    pub id: i64,
    pub name_ko: String,
    pub stage_name_ko: Option<String>,
    pub name_en: Option<String>,
}

#[derive(Clone)]
pub struct EntityStore {
    pool: PgPool,
}

impl EntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── registry snapshots (cached by the intelligence engine) ──

    pub async fn all_artist_refs(&self) -> anyhow::Result<Vec<ArtistRef>> {
        Ok(sqlx::query_as::<_, ArtistRef>(
            r#"
            SELECT id, name_ko, name_en, stage_name_ko, stage_name_en,
                   global_priority, is_verified
            FROM   artists
            ORDER  BY global_priority ASC NULLS LAST, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn all_group_refs(&self) -> anyhow::Result<Vec<GroupRef>> {
        Ok(sqlx::query_as::<_, GroupRef>(
            r#"
            SELECT id, name_ko, name_en, global_priority
            FROM   groups
            ORDER  BY global_priority ASC NULLS LAST, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_artist(&self, id: i64) -> anyhow::Result<Option<Artist>> {
        Ok(sqlx::query_as::<_, Artist>(
            r#"
            SELECT id, name_ko, name_en, stage_name_ko, stage_name_en,
                   gender, birth_date, nationality_ko, nationality_en,
                   mbti, blood_type, height_cm, weight_kg, bio_ko, bio_en,
                   is_verified, global_priority, enriched_at, last_verified_at,
                   data_reliability_score, created_at, updated_at
            FROM   artists WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_group(&self, id: i64) -> anyhow::Result<Option<Group>> {
        Ok(sqlx::query_as::<_, Group>(
            r#"
            SELECT id, name_ko, name_en, gender, debut_date,
                   label_ko, label_en, fandom_name_ko, fandom_name_en,
                   activity_status, bio_ko, bio_en,
                   is_verified, global_priority, enriched_at, last_verified_at,
                   data_reliability_score, created_at, updated_at
            FROM   groups WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Members sorted by start date then artist id, for the group detail
    /// endpoint.
    pub async fn members_of_group(&self, group_id: i64) -> anyhow::Result<Vec<MemberOf>> {
        Ok(sqlx::query_as::<_, MemberOf>(
            r#"
            SELECT id, artist_id, group_id, roles, started_on, ended_on,
                   is_sub_unit, source_article_id
            FROM   member_of
            WHERE  group_id = $1
            ORDER  BY started_on ASC NULLS LAST, artist_id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn touch_last_verified(&self, table_is_artist: bool, id: i64) -> anyhow::Result<()> {
        // Fixed statements per table; entity kinds outside the two tables
        // have no verified-at column to touch.
        let sql = if table_is_artist {
            "UPDATE artists SET last_verified_at = NOW() WHERE id = $1"
        } else {
            "UPDATE groups SET last_verified_at = NOW() WHERE id = $1"
        };
        sqlx::query(sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    // ── glossary ─────────────────────────────────────────────

    /// Up to `limit` translated terms, ordered artist → agency → event,
    /// for prompt injection.
    pub async fn glossary_terms(&self, limit: i64) -> anyhow::Result<Vec<GlossaryTerm>> {
        Ok(sqlx::query_as::<_, GlossaryTerm>(
            r#"
            SELECT term_ko, term_en, category, description
            FROM   glossary
            WHERE  term_en IS NOT NULL
            ORDER  BY CASE category
                          WHEN 'ARTIST' THEN 1
                          WHEN 'AGENCY' THEN 2
                          WHEN 'EVENT'  THEN 3
                          ELSE 4
                      END,
                      term_ko
            LIMIT  $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Auto-provision a glossary term. Returns false when (term_ko,
    /// category) already exists.
    pub async fn enroll_glossary_term(
        &self,
        term_ko: &str,
        term_en: &str,
        category: GlossaryCategory,
        source_article_id: Option<i64>,
    ) -> anyhow::Result<bool> {
        let term_ko = term_ko.trim();
        let term_en = term_en.trim();
        if term_ko.is_empty() || term_en.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO glossary
                (term_ko, term_en, category, description, is_auto_provisioned, source_article_id)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            ON CONFLICT (term_ko, category) DO NOTHING
            "#,
        )
        .bind(term_ko)
        .bind(term_en)
        .bind(category.as_str())
        .bind(format!(
            "Auto-Provisioned (article #{})",
            source_article_id.unwrap_or(0)
        ))
        .bind(source_article_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ── enrichment ───────────────────────────────────────────

    /// Entities never touched by the enricher, best priority first.
    pub async fn unenriched_artists(&self, limit: i64) -> anyhow::Result<Vec<EnrichmentTarget>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, name_ko, stage_name_ko, name_en
            FROM   artists
            WHERE  enriched_at IS NULL
            ORDER  BY global_priority ASC NULLS LAST, id ASC
            LIMIT  $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn unenriched_groups(&self, limit: i64) -> anyhow::Result<Vec<EnrichmentTarget>> {
        Ok(sqlx::query_as(
            r#"
            SELECT id, name_ko, NULL::varchar AS stage_name_ko, name_en
            FROM   groups
            WHERE  enriched_at IS NULL
            ORDER  BY global_priority ASC NULLS LAST, id ASC
            LIMIT  $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn mark_artist_enriched(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE artists SET enriched_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_group_enriched(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE groups SET enriched_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset `enriched_at` for entities whose critical fields remain empty.
    /// Returns (artists, groups) reset counts.
    pub async fn reset_sparse_enrichment(&self, limit: i64) -> anyhow::Result<(u64, u64)> {
        let artists = sqlx::query(
            r#"
            UPDATE artists SET enriched_at = NULL
            WHERE id IN (
                SELECT id FROM artists
                WHERE  enriched_at IS NOT NULL
                  AND  (bio_ko IS NULL OR birth_date IS NULL OR name_en IS NULL)
                ORDER  BY global_priority ASC NULLS LAST, id ASC
                LIMIT  $1
            )
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let groups = sqlx::query(
            r#"
            UPDATE groups SET enriched_at = NULL
            WHERE id IN (
                SELECT id FROM groups
                WHERE  enriched_at IS NOT NULL
                  AND  (bio_ko IS NULL OR label_ko IS NULL OR debut_date IS NULL)
                ORDER  BY global_priority ASC NULLS LAST, id ASC
                LIMIT  $1
            )
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok((artists, groups))
    }
}
