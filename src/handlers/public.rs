//! Public read-only API
//!
//! Consumer-facing projection of the corpus. Only PROCESSED and VERIFIED
//! articles are visible, and internal operational fields (`system_note`,
//! provenance FKs) never leave the database.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ─────────────────────────────────────────────────────────────
// Projections
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicArticle {
    pub id: i64,
    pub title_ko: Option<String>,
    pub title_en: Option<String>,
    pub summary_ko: Option<String>,
    pub summary_en: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub artist_name_ko: Option<String>,
    pub artist_name_en: Option<String>,
    pub hashtags_ko: Vec<String>,
    pub hashtags_en: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: String,
    pub language: String,
    pub sentiment: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicArticleDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub summary: PublicArticle,
    pub content_ko: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicArtist {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub stage_name_ko: Option<String>,
    pub stage_name_en: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub nationality_ko: Option<String>,
    pub nationality_en: Option<String>,
    pub mbti: Option<String>,
    pub blood_type: Option<String>,
    pub height_cm: Option<i32>,
    pub weight_kg: Option<i32>,
    pub bio_ko: Option<String>,
    pub bio_en: Option<String>,
    pub is_verified: bool,
    pub global_priority: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct PublicArtistDetail {
    #[serde(flatten)]
    pub artist: PublicArtist,
    pub photo_url: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicGroup {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub gender: Option<String>,
    pub debut_date: Option<NaiveDate>,
    pub label_ko: Option<String>,
    pub label_en: Option<String>,
    pub fandom_name_ko: Option<String>,
    pub fandom_name_en: Option<String>,
    pub activity_status: Option<String>,
    pub bio_ko: Option<String>,
    pub bio_en: Option<String>,
    pub is_verified: bool,
    pub global_priority: Option<i32>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PublicMember {
    pub artist_id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub stage_name_ko: Option<String>,
    pub stage_name_en: Option<String>,
    pub roles: Vec<String>,
    pub started_on: Option<NaiveDate>,
    pub ended_on: Option<NaiveDate>,
    pub is_sub_unit: bool,
}

#[derive(Debug, Serialize)]
pub struct PublicGroupDetail {
    #[serde(flatten)]
    pub group: PublicGroup,
    pub members: Vec<PublicMember>,
}

const ARTICLE_COLUMNS: &str = "id, title_ko, title_en, summary_ko, summary_en, author, \
     published_at, artist_name_ko, artist_name_en, hashtags_ko, hashtags_en, \
     thumbnail_url, source_url, language, sentiment";

const ARTIST_COLUMNS: &str = "id, name_ko, name_en, stage_name_ko, stage_name_en, gender, \
     birth_date, nationality_ko, nationality_en, mbti, blood_type, height_cm, weight_kg, \
     bio_ko, bio_en, is_verified, global_priority";

const GROUP_COLUMNS: &str = "id, name_ko, name_en, gender, debut_date, label_ko, label_en, \
     fandom_name_ko, fandom_name_en, activity_status, bio_ko, bio_en, is_verified, \
     global_priority";

// ─────────────────────────────────────────────────────────────
// Articles
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ArticleListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub artist_id: Option<i64>,
    pub group_id: Option<i64>,
    pub language: Option<String>,
    pub q: Option<String>,
}

pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticleListQuery>,
) -> Result<Json<Vec<PublicArticle>>> {
    let sql = format!(
        r#"
        SELECT {ARTICLE_COLUMNS}
        FROM   articles a
        WHERE  process_status IN ('PROCESSED','VERIFIED')
          AND  ($1::varchar IS NULL OR language = $1)
          AND  ($2::bigint IS NULL OR EXISTS (
                  SELECT 1 FROM entity_mappings em
                  WHERE em.article_id = a.id AND em.artist_id = $2))
          AND  ($3::bigint IS NULL OR EXISTS (
                  SELECT 1 FROM entity_mappings em
                  WHERE em.article_id = a.id AND em.group_id = $3))
          AND  ($4::text IS NULL OR search_vector @@ plainto_tsquery('simple', $4))
        ORDER  BY published_at DESC NULLS LAST, id DESC
        LIMIT  $5 OFFSET $6
        "#
    );

    let articles = sqlx::query_as::<_, PublicArticle>(&sql)
        .bind(&query.language)
        .bind(query.artist_id)
        .bind(query.group_id)
        .bind(query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()))
        .bind(clamp_limit(query.limit))
        .bind(query.offset.unwrap_or(0).max(0))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(articles))
}

#[derive(sqlx::FromRow)]
struct ArticleDetailRow {
    #[sqlx(flatten)]
    detail: PublicArticleDetail,
    process_status: crate::models::ProcessStatus,
}

pub async fn get_article(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
) -> Result<Json<PublicArticleDetail>> {
    let sql = format!(
        r#"
        SELECT {ARTICLE_COLUMNS}, content_ko, process_status
        FROM   articles
        WHERE  id = $1
        "#
    );

    let row = sqlx::query_as::<_, ArticleDetailRow>(&sql)
        .bind(article_id)
        .fetch_optional(&state.pool)
        .await?
        // non-public lifecycle states are indistinguishable from absence
        .filter(|row| row.process_status.is_public())
        .ok_or_else(|| AppError::NotFound {
            resource: format!("article {article_id}"),
        })?;

    Ok(Json(row.detail))
}

// ─────────────────────────────────────────────────────────────
// Artists
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ArtistListQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub global_priority: Option<i32>,
}

pub async fn list_artists(
    State(state): State<AppState>,
    Query(query): Query<ArtistListQuery>,
) -> Result<Json<Vec<PublicArtist>>> {
    let sql = format!(
        r#"
        SELECT {ARTIST_COLUMNS}
        FROM   artists
        WHERE  ($1::text IS NULL
                OR name_ko ILIKE '%' || $1 || '%'
                OR name_en ILIKE '%' || $1 || '%'
                OR stage_name_ko ILIKE '%' || $1 || '%'
                OR stage_name_en ILIKE '%' || $1 || '%')
          AND  ($2::int IS NULL OR global_priority = $2)
        ORDER  BY global_priority ASC NULLS LAST, name_ko ASC
        LIMIT  $3 OFFSET $4
        "#
    );

    let artists = sqlx::query_as::<_, PublicArtist>(&sql)
        .bind(query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()))
        .bind(query.global_priority)
        .bind(clamp_limit(query.limit))
        .bind(query.offset.unwrap_or(0).max(0))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(artists))
}

/// Most recent public article thumbnail for an artist: prefer articles
/// whose denormalized name matches, fall back to any mapped article.
async fn artist_photo_url(
    state: &AppState,
    artist_id: i64,
    name_ko: &str,
) -> Result<Option<String>> {
    let by_name: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT thumbnail_url
        FROM   articles
        WHERE  process_status IN ('PROCESSED','VERIFIED')
          AND  thumbnail_url IS NOT NULL
          AND  artist_name_ko = $1
        ORDER  BY published_at DESC NULLS LAST
        LIMIT  1
        "#,
    )
    .bind(name_ko)
    .fetch_optional(&state.pool)
    .await?;

    if let Some((url,)) = by_name {
        return Ok(Some(url));
    }

    let by_mapping: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT a.thumbnail_url
        FROM   articles a
        JOIN   entity_mappings em ON em.article_id = a.id
        WHERE  a.process_status IN ('PROCESSED','VERIFIED')
          AND  a.thumbnail_url IS NOT NULL
          AND  em.artist_id = $1
        ORDER  BY a.published_at DESC NULLS LAST
        LIMIT  1
        "#,
    )
    .bind(artist_id)
    .fetch_optional(&state.pool)
    .await?;

    Ok(by_mapping.map(|(url,)| url))
}

pub async fn get_artist(
    State(state): State<AppState>,
    Path(artist_id): Path<i64>,
) -> Result<Json<PublicArtistDetail>> {
    let sql = format!("SELECT {ARTIST_COLUMNS} FROM artists WHERE id = $1");
    let artist = sqlx::query_as::<_, PublicArtist>(&sql)
        .bind(artist_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: format!("artist {artist_id}"),
        })?;

    let photo_url = artist_photo_url(&state, artist.id, &artist.name_ko).await?;

    Ok(Json(PublicArtistDetail { artist, photo_url }))
}

#[derive(Debug, Deserialize)]
pub struct RelatedArticlesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_artist_articles(
    State(state): State<AppState>,
    Path(artist_id): Path<i64>,
    Query(query): Query<RelatedArticlesQuery>,
) -> Result<Json<Vec<PublicArticle>>> {
    let sql = format!(
        r#"
        SELECT {ARTICLE_COLUMNS}
        FROM   articles a
        JOIN   entity_mappings em ON em.article_id = a.id
        WHERE  a.process_status IN ('PROCESSED','VERIFIED')
          AND  em.artist_id = $1
        ORDER  BY a.published_at DESC NULLS LAST, a.id DESC
        LIMIT  $2 OFFSET $3
        "#
    );

    let articles = sqlx::query_as::<_, PublicArticle>(&sql)
        .bind(artist_id)
        .bind(clamp_limit(query.limit))
        .bind(query.offset.unwrap_or(0).max(0))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(articles))
}

// ─────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GroupListQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<GroupListQuery>,
) -> Result<Json<Vec<PublicGroup>>> {
    let sql = format!(
        r#"
        SELECT {GROUP_COLUMNS}
        FROM   groups
        WHERE  ($1::text IS NULL
                OR name_ko ILIKE '%' || $1 || '%'
                OR name_en ILIKE '%' || $1 || '%')
        ORDER  BY global_priority ASC NULLS LAST, name_ko ASC
        LIMIT  $2 OFFSET $3
        "#
    );

    let groups = sqlx::query_as::<_, PublicGroup>(&sql)
        .bind(query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()))
        .bind(clamp_limit(query.limit))
        .bind(query.offset.unwrap_or(0).max(0))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(groups))
}

pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<Json<PublicGroupDetail>> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = $1");
    let group = sqlx::query_as::<_, PublicGroup>(&sql)
        .bind(group_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: format!("group {group_id}"),
        })?;

    let members = sqlx::query_as::<_, PublicMember>(
        r#"
        SELECT m.artist_id, a.name_ko, a.name_en, a.stage_name_ko, a.stage_name_en,
               m.roles, m.started_on, m.ended_on, m.is_sub_unit
        FROM   member_of m
        JOIN   artists a ON a.id = m.artist_id
        WHERE  m.group_id = $1
        ORDER  BY m.started_on ASC NULLS LAST, m.artist_id ASC
        "#,
    )
    .bind(group_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(PublicGroupDetail { group, members }))
}

pub async fn get_group_articles(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Query(query): Query<RelatedArticlesQuery>,
) -> Result<Json<Vec<PublicArticle>>> {
    let sql = format!(
        r#"
        SELECT {ARTICLE_COLUMNS}
        FROM   articles a
        JOIN   entity_mappings em ON em.article_id = a.id
        WHERE  a.process_status IN ('PROCESSED','VERIFIED')
          AND  em.group_id = $1
        ORDER  BY a.published_at DESC NULLS LAST, a.id DESC
        LIMIT  $2 OFFSET $3
        "#
    );

    let articles = sqlx::query_as::<_, PublicArticle>(&sql)
        .bind(group_id)
        .bind(clamp_limit(query.limit))
        .bind(query.offset.unwrap_or(0).max(0))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(articles))
}

// ─────────────────────────────────────────────────────────────
// Unified search
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub articles: Vec<PublicArticle>,
    pub artists: Vec<PublicArtist>,
    pub groups: Vec<PublicGroup>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let term = query.q.trim();
    if term.is_empty() {
        return Err(AppError::BadRequest {
            message: "q must not be empty".to_string(),
        });
    }
    let limit = clamp_limit(query.limit);

    let article_sql = format!(
        r#"
        SELECT {ARTICLE_COLUMNS}
        FROM   articles
        WHERE  process_status IN ('PROCESSED','VERIFIED')
          AND  search_vector @@ plainto_tsquery('simple', $1)
        ORDER  BY ts_rank(search_vector, plainto_tsquery('simple', $1)) DESC,
                  published_at DESC NULLS LAST
        LIMIT  $2
        "#
    );
    let articles = sqlx::query_as::<_, PublicArticle>(&article_sql)
        .bind(term)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;

    let artist_sql = format!(
        r#"
        SELECT {ARTIST_COLUMNS}
        FROM   artists
        WHERE  name_ko ILIKE '%' || $1 || '%'
           OR  name_en ILIKE '%' || $1 || '%'
           OR  stage_name_ko ILIKE '%' || $1 || '%'
           OR  stage_name_en ILIKE '%' || $1 || '%'
        ORDER  BY global_priority ASC NULLS LAST, name_ko ASC
        LIMIT  $2
        "#
    );
    let artists = sqlx::query_as::<_, PublicArtist>(&artist_sql)
        .bind(term)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;

    let group_sql = format!(
        r#"
        SELECT {GROUP_COLUMNS}
        FROM   groups
        WHERE  name_ko ILIKE '%' || $1 || '%'
           OR  name_en ILIKE '%' || $1 || '%'
        ORDER  BY global_priority ASC NULLS LAST, name_ko ASC
        LIMIT  $2
        "#
    );
    let groups = sqlx::query_as::<_, PublicGroup>(&group_sql)
        .bind(term)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(SearchResponse {
        articles,
        artists,
        groups,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamping() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(5)), 5);
        assert_eq!(clamp_limit(Some(10_000)), 100);
    }
}
