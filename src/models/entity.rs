//! Entity registry rows: artists, groups, membership edges, side tables.
//!
//! Every mutable profile field carries a `<field>_source_article_id` column
//! naming the article that last supplied its value. Provenance is a plain
//! foreign key into the articles table; nothing here owns an article.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Active,
    Hiatus,
    Disbanded,
    SoloOnly,
}

/// Membership roles (closed set, stored as text array elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Vocalist,
    Rapper,
    Dancer,
    Leader,
    Center,
    Maknae,
    Visual,
    Producer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Vocalist => "VOCALIST",
            MemberRole::Rapper => "RAPPER",
            MemberRole::Dancer => "DANCER",
            MemberRole::Leader => "LEADER",
            MemberRole::Center => "CENTER",
            MemberRole::Maknae => "MAKNAE",
            MemberRole::Visual => "VISUAL",
            MemberRole::Producer => "PRODUCER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SnsPlatform {
    Instagram,
    Youtube,
    X,
    Tiktok,
    Weverse,
    Fancafe,
    Other,
}

/// Solo performer profile
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Artist {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub stage_name_ko: Option<String>,
    pub stage_name_en: Option<String>,
    pub gender: Option<Gender>,
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
    /// 1 = full translation, 2 = title+summary, 3 = KO only, NULL ≈ 1.
    pub global_priority: Option<i32>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub data_reliability_score: f32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Slim artist projection cached by the intelligence engine for tier lookup
/// and contextual linking.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ArtistRef {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub stage_name_ko: Option<String>,
    pub stage_name_en: Option<String>,
    pub global_priority: Option<i32>,
    pub is_verified: bool,
}

/// Band / team / unit profile
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub name_ko: String,
    pub name_en: Option<String>,
    pub gender: Option<Gender>,
    pub debut_date: Option<NaiveDate>,
    pub label_ko: Option<String>,
    pub label_en: Option<String>,
    pub fandom_name_ko: Option<String>,
    pub fandom_name_en: Option<String>,
    pub activity_status: Option<ActivityStatus>,
    pub bio_ko: Option<String>,
    pub bio_en: Option<String>,

    pub is_verified: bool,
    pub global_priority: Option<i32>,
    pub enriched_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub data_reliability_score: f32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Artist↔Group membership edge. `ended_on = NULL` means currently active;
/// multiple concurrent memberships are allowed (units, project groups).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MemberOf {
    pub id: i64,
    pub artist_id: i64,
    pub group_id: i64,
    pub roles: Vec<String>,
    pub started_on: Option<NaiveDate>,
    pub ended_on: Option<NaiveDate>,
    pub is_sub_unit: bool,
    pub source_article_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ArtistSns {
    pub id: i64,
    pub artist_id: i64,
    pub platform: SnsPlatform,
    pub url: String,
    pub handle: Option<String>,
    pub follower_count: Option<i64>,
    pub source_article_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupSns {
    pub id: i64,
    pub group_id: i64,
    pub platform: SnsPlatform,
    pub url: String,
    pub handle: Option<String>,
    pub follower_count: Option<i64>,
    pub source_article_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ArtistEducation {
    pub id: i64,
    pub artist_id: i64,
    pub school_name: String,
    pub level: Option<String>,
    pub source_article_id: Option<i64>,
}

/// Entity kinds detected by the extraction pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Artist,
    Group,
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Artist => "ARTIST",
            EntityType::Group => "GROUP",
            EntityType::Event => "EVENT",
        }
    }
}

/// Article ↔ entity edge. For ARTIST rows only `artist_id` may be set, for
/// GROUP rows only `group_id`; both stay NULL when the detection did not
/// link (or the row is an EVENT).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EntityMapping {
    pub id: i64,
    pub article_id: i64,
    pub entity_type: EntityType,
    pub artist_id: Option<i64>,
    pub group_id: Option<i64>,
    pub entity_name_ko: String,
    pub confidence_score: f32,
    pub context_snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_role_names() {
        assert_eq!(MemberRole::Leader.as_str(), "LEADER");
        assert_eq!(MemberRole::Maknae.as_str(), "MAKNAE");
    }

    #[test]
    fn test_entity_type_names() {
        assert_eq!(EntityType::Artist.as_str(), "ARTIST");
        assert_eq!(EntityType::Group.as_str(), "GROUP");
        assert_eq!(EntityType::Event.as_str(), "EVENT");
    }
}
