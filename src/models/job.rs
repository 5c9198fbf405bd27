//! Job queue row types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Job types the scrape worker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scrape,
    ScrapeRange,
    ScrapeRss,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scrape => "scrape",
            JobType::ScrapeRange => "scrape_range",
            JobType::ScrapeRss => "scrape_rss",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(JobType::Scrape),
            "scrape_range" => Ok(JobType::ScrapeRange),
            "scrape_rss" => Ok(JobType::ScrapeRss),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// One queue row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_msg: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
}

/// `scrape` job parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeParams {
    #[serde(default)]
    pub urls: Vec<String>,
    pub source_url: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ScrapeParams {
    /// Resolve the URL list: `urls` wins, else the single `source_url`.
    pub fn resolve_urls(&self) -> Vec<String> {
        if !self.urls.is_empty() {
            return self.urls.clone();
        }
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| vec![u.to_string()])
            .unwrap_or_default()
    }
}

/// `scrape_range` job parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRangeParams {
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub dry_run: bool,
}

/// `scrape_rss` job parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeRssParams {
    #[serde(default = "default_language")]
    pub language: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn default_language() -> String {
    "kr".to_string()
}

fn default_max_pages() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_urls_prefers_list() {
        let params = ScrapeParams {
            urls: vec!["https://a".into(), "https://b".into()],
            source_url: Some("https://c".into()),
            ..Default::default()
        };
        assert_eq!(params.resolve_urls(), vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_resolve_urls_falls_back_to_single() {
        let params = ScrapeParams {
            source_url: Some("  https://c  ".into()),
            ..Default::default()
        };
        assert_eq!(params.resolve_urls(), vec!["https://c"]);
    }

    #[test]
    fn test_resolve_urls_empty() {
        let params = ScrapeParams::default();
        assert!(params.resolve_urls().is_empty());
    }

    #[test]
    fn test_scrape_params_from_json() {
        let params: ScrapeParams = serde_json::from_value(serde_json::json!({
            "source_url": "https://news.example/a/1",
            "platforms": ["x", "instagram"],
        }))
        .unwrap();
        assert_eq!(params.language, "kr");
        assert!(!params.dry_run);
        assert_eq!(params.resolve_urls(), vec!["https://news.example/a/1"]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
