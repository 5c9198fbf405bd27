//! Article row types and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Article lifecycle. Transitions move strictly forward:
/// PENDING → SCRAPED → (PROCESSED | VERIFIED | MANUAL_REVIEW) | ERROR.
/// ERROR is terminal until an operator resets the row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Pending,
    Scraped,
    Processed,
    Verified,
    ManualReview,
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Pending => "PENDING",
            ProcessStatus::Scraped => "SCRAPED",
            ProcessStatus::Processed => "PROCESSED",
            ProcessStatus::Verified => "VERIFIED",
            ProcessStatus::ManualReview => "MANUAL_REVIEW",
            ProcessStatus::Error => "ERROR",
        }
    }

    /// Whether `next` is reachable from `self` by an allowed edge.
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Pending, Scraped)
                | (Pending, Error)
                | (Scraped, Processed)
                | (Scraped, Verified)
                | (Scraped, ManualReview)
                | (Scraped, Error)
        )
    }

    /// Visible through the public API?
    pub fn is_public(&self) -> bool {
        matches!(self, ProcessStatus::Processed | ProcessStatus::Verified)
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessStatus::Pending),
            "SCRAPED" => Ok(ProcessStatus::Scraped),
            "PROCESSED" => Ok(ProcessStatus::Processed),
            "VERIFIED" => Ok(ProcessStatus::Verified),
            "MANUAL_REVIEW" => Ok(ProcessStatus::ManualReview),
            "ERROR" => Ok(ProcessStatus::Error),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}

/// Article sentiment as persisted (NULL allowed on the column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Full article row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub source_url: String,
    pub language: String,
    pub title_ko: Option<String>,
    pub title_en: Option<String>,
    pub content_ko: Option<String>,
    pub summary_ko: Option<String>,
    pub summary_en: Option<String>,
    pub author: Option<String>,
    pub artist_name_ko: Option<String>,
    pub artist_name_en: Option<String>,
    pub global_priority: bool,
    pub hashtags_ko: Vec<String>,
    pub hashtags_en: Vec<String>,
    pub seo_hashtags: Option<serde_json::Value>,
    pub thumbnail_url: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub process_status: ProcessStatus,
    pub system_note: Option<String>,
    pub job_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the scraper for an upsert. All optional except the
/// source URL key; the store merges with COALESCE semantics (a NULL never
/// overwrites an existing value).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub language: Option<String>,
    pub title_ko: Option<String>,
    pub title_en: Option<String>,
    pub content_ko: Option<String>,
    pub summary_ko: Option<String>,
    pub summary_en: Option<String>,
    pub author: Option<String>,
    pub artist_name_ko: Option<String>,
    pub artist_name_en: Option<String>,
    pub global_priority: bool,
    pub hashtags_ko: Vec<String>,
    pub hashtags_en: Vec<String>,
    pub seo_hashtags: Option<serde_json::Value>,
    pub thumbnail_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub process_status: ProcessStatus,
}

impl ArticleDraft {
    pub fn scraped() -> Self {
        Self {
            process_status: ProcessStatus::Scraped,
            ..Default::default()
        }
    }
}

impl Default for ProcessStatus {
    fn default() -> Self {
        ProcessStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use ProcessStatus::*;
        assert!(Pending.can_transition_to(Scraped));
        assert!(Pending.can_transition_to(Error));
        assert!(Scraped.can_transition_to(Processed));
        assert!(Scraped.can_transition_to(Verified));
        assert!(Scraped.can_transition_to(ManualReview));
        assert!(Scraped.can_transition_to(Error));
    }

    #[test]
    fn test_forbidden_transitions() {
        use ProcessStatus::*;
        assert!(!Processed.can_transition_to(Pending));
        assert!(!Verified.can_transition_to(Scraped));
        assert!(!Error.can_transition_to(Processed));
        assert!(!Pending.can_transition_to(Verified));
        assert!(!ManualReview.can_transition_to(Verified));
    }

    #[test]
    fn test_public_visibility() {
        assert!(ProcessStatus::Processed.is_public());
        assert!(ProcessStatus::Verified.is_public());
        assert!(!ProcessStatus::ManualReview.is_public());
        assert!(!ProcessStatus::Error.is_public());
        assert!(!ProcessStatus::Scraped.is_public());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "PENDING",
            "SCRAPED",
            "PROCESSED",
            "VERIFIED",
            "MANUAL_REVIEW",
            "ERROR",
        ] {
            let parsed: ProcessStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("pending".parse::<ProcessStatus>().is_err());
    }
}
