//! Append-only audit rows: update logs, autonomous-resolution logs,
//! conflict flags, operational system logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityType;

/// Who performed a profile mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UpdatedBy {
    AiPipeline,
    Manual,
    Scraper,
}

impl UpdatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatedBy::AiPipeline => "ai_pipeline",
            UpdatedBy::Manual => "manual",
            UpdatedBy::Scraper => "scraper",
        }
    }
}

/// Autonomous decision kinds taken by the self-healing resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolutionType {
    /// Empty field filled from article evidence.
    Fill,
    /// Conflict resolved by a second LLM judgement.
    Reconcile,
    /// New glossary term auto-provisioned.
    Enroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictStatus {
    Open,
    Resolved,
    Dismissed,
}

/// One row per (article, entity, field) mutation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DataUpdateLog {
    pub id: i64,
    pub article_id: Option<i64>,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub field_name: String,
    pub old_value_json: Option<serde_json::Value>,
    pub new_value_json: Option<serde_json::Value>,
    pub updated_by: UpdatedBy,
    pub created_at: DateTime<Utc>,
}

/// One row per autonomous resolver decision.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AutoResolutionLog {
    pub id: i64,
    pub article_id: Option<i64>,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub field_name: String,
    pub old_value_json: Option<serde_json::Value>,
    pub new_value_json: Option<serde_json::Value>,
    pub resolution_type: ResolutionType,
    pub gemini_reasoning: Option<String>,
    pub gemini_confidence: Option<f32>,
    pub source_reliability: f32,
    pub created_at: DateTime<Utc>,
}

/// One row per unresolved contradiction the resolver could not settle.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ConflictFlag {
    pub id: i64,
    pub article_id: Option<i64>,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub field_name: String,
    pub existing_value_json: Option<serde_json::Value>,
    pub conflicting_value_json: Option<serde_json::Value>,
    pub conflict_reason: Option<String>,
    pub conflict_score: f32,
    pub status: ConflictStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    Scrape,
    AiProcess,
    DbWrite,
    S3Upload,
    ApiCall,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Scrape => "SCRAPE",
            LogCategory::AiProcess => "AI_PROCESS",
            LogCategory::DbWrite => "DB_WRITE",
            LogCategory::S3Upload => "S3_UPLOAD",
            LogCategory::ApiCall => "API_CALL",
        }
    }
}
