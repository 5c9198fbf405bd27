//! Append-only operational event log

use sqlx::PgPool;

use crate::models::{LogCategory, LogLevel};

/// One system_logs insert, best-effort: a logging failure never fails the
/// operation being logged.
#[derive(Clone)]
pub struct SystemLogger {
    pool: PgPool,
}

#[derive(Debug, Default)]
pub struct SystemEvent<'a> {
    pub article_id: Option<i64>,
    pub job_id: Option<i64>,
    pub level: Option<LogLevel>,
    pub event: &'a str,
    pub message: &'a str,
    pub details: Option<serde_json::Value>,
    pub duration_ms: Option<i32>,
}

impl SystemLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, category: LogCategory, event: SystemEvent<'_>) {
        let level = event.level.unwrap_or(LogLevel::Info);
        let result = sqlx::query(
            r#"
            INSERT INTO system_logs
                (article_id, job_id, level, category, event, message, details, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.article_id)
        .bind(event.job_id)
        .bind(level.as_str())
        .bind(category.as_str())
        .bind(event.event)
        .bind(event.message)
        .bind(&event.details)
        .bind(event.duration_ms)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                event = event.event,
                article_id = ?event.article_id,
                error = %e,
                "system log insert failed"
            );
        }
    }
}
