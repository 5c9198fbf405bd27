//! Korean↔English glossary rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum GlossaryCategory {
    Artist,
    Agency,
    Event,
}

impl GlossaryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlossaryCategory::Artist => "ARTIST",
            GlossaryCategory::Agency => "AGENCY",
            GlossaryCategory::Event => "EVENT",
        }
    }
}

/// One dictionary entry, unique on (term_ko, category). Auto-provisioned
/// rows were written by the resolver and await human review.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GlossaryEntry {
    pub id: i64,
    pub term_ko: String,
    pub term_en: Option<String>,
    pub category: GlossaryCategory,
    pub description: Option<String>,
    pub is_auto_provisioned: bool,
    pub source_article_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Slim projection fed into the extraction prompt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GlossaryTerm {
    pub term_ko: String,
    pub term_en: Option<String>,
    pub category: GlossaryCategory,
    pub description: Option<String>,
}
