//! Simple post-processor
//!
//! Lightweight alternative to the intelligence engine for backlog
//! throughput: one model call per SCRAPED article producing an English
//! title, bilingual summaries, and English hashtags. Only empty columns
//! are written, so re-running over the same row changes nothing.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::LlmError;
use crate::models::ProcessStatus;
use crate::services::article_store::{ArticleStore, PendingArticle};
use crate::services::llm::LlmClient;

const BATCH_SIZE: i64 = 10;
const BODY_EXCERPT_CHARS: usize = 800;
/// Small pause between calls; the RPM limiter does the real enforcement.
const CALL_PAUSE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimpleOutput {
    pub title_en: Option<String>,
    pub summary_ko: Option<String>,
    pub summary_en: Option<String>,
    #[serde(default)]
    pub hashtags_en: Vec<String>,
}

impl SimpleOutput {
    /// Hashtags are stored bare (no `#` prefix) in the array column.
    pub fn normalized_hashtags(&self) -> Vec<String> {
        self.hashtags_en
            .iter()
            .map(|t| t.trim_start_matches('#').trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

fn build_prompt(title_ko: &str, content_excerpt: &str) -> String {
    format!(
        "You are a K-pop news assistant. Translate and summarize the following\n\
         Korean article. Return ONLY valid JSON, no markdown, no extra text.\n\n\
         Korean title: {title_ko}\n\
         Korean content (excerpt): {content_excerpt}\n\n\
         JSON format:\n\
         {{\n\
           \"title_en\": \"English translation of the Korean title\",\n\
           \"summary_ko\": \"3-sentence Korean summary of the article\",\n\
           \"summary_en\": \"3-sentence English summary of the article\",\n\
           \"hashtags_en\": [\"kpop\", \"tag2\", \"tag3\", \"tag4\", \"tag5\"]\n\
         }}"
    )
}

pub struct SimpleProcessor {
    articles: ArticleStore,
    llm: Arc<LlmClient>,
    model_name: String,
}

impl SimpleProcessor {
    pub fn new(articles: ArticleStore, llm: Arc<LlmClient>, model_name: String) -> Self {
        Self {
            articles,
            llm,
            model_name,
        }
    }

    /// Process one article. Returns false on failure (the row goes to
    /// ERROR).
    async fn process_one(&self, article: &PendingArticle) -> bool {
        let Some(title_ko) = article.title_ko.as_deref().filter(|t| !t.is_empty()) else {
            // nothing to translate from; skip forward
            tracing::warn!(article_id = article.id, "no Korean title, skipping");
            let _ = self
                .articles
                .apply_simple_output(article.id, None, None, None, &[])
                .await;
            return true;
        };

        let excerpt: String = article
            .content_ko
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(BODY_EXCERPT_CHARS)
            .collect();

        let result: Result<SimpleOutput, LlmError> = async {
            let (value, _) = self
                .llm
                .generate_json(&self.model_name, &build_prompt(title_ko, &excerpt))
                .await?;
            serde_json::from_value(value).map_err(|e| LlmError::Validation(e.to_string()))
        }
        .await;

        match result {
            Ok(output) => {
                let hashtags = output.normalized_hashtags();
                match self
                    .articles
                    .apply_simple_output(
                        article.id,
                        output.title_en.as_deref(),
                        output.summary_ko.as_deref(),
                        output.summary_en.as_deref(),
                        &hashtags,
                    )
                    .await
                {
                    Ok(()) => {
                        tracing::info!(article_id = article.id, title = %title_ko.chars().take(50).collect::<String>(), "post-processed");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(article_id = article.id, error = %e, "write-back failed");
                        let _ = self.articles.mark_error(article.id).await;
                        false
                    }
                }
            }
            Err(LlmError::KillSwitch) => {
                // budget exhausted: leave the row SCRAPED for a later pass
                tracing::warn!(article_id = article.id, "kill switch active, stopping");
                false
            }
            Err(e) => {
                tracing::warn!(article_id = article.id, error = %e, "post-processing failed");
                let _ = self.articles.mark_error(article.id).await;
                false
            }
        }
    }

    /// Process up to `batch_size` SCRAPED articles. Returns the number of
    /// rows moved forward.
    pub async fn process_scraped(&self, batch_size: Option<i64>) -> anyhow::Result<usize> {
        let articles = self
            .articles
            .scraped_articles(batch_size.unwrap_or(BATCH_SIZE))
            .await?;
        if articles.is_empty() {
            tracing::debug!("no scraped articles to post-process");
            return Ok(0);
        }

        tracing::info!(count = articles.len(), "simple post-processing started");
        let mut done = 0;

        for article in &articles {
            // another worker may have advanced this row since the snapshot
            match self.articles.current_status(article.id).await? {
                Some(ProcessStatus::Scraped) => {}
                _ => continue,
            }
            if self.process_one(article).await {
                done += 1;
            }
            tokio::time::sleep(CALL_PAUSE).await;
        }

        tracing::info!(done, total = articles.len(), "simple post-processing complete");
        Ok(done)
    }

    /// Drain the SCRAPED backlog.
    pub async fn process_all_scraped(&self) -> anyhow::Result<usize> {
        let mut total = 0;
        loop {
            let n = self.process_scraped(None).await?;
            total += n;
            if n == 0 {
                break;
            }
        }
        if total > 0 {
            tracing::info!(total, "backlog drained");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashtags_stored_bare() {
        let output = SimpleOutput {
            hashtags_en: vec![
                "#kpop".to_string(),
                "  #comeback ".to_string(),
                "newmusic".to_string(),
                "".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(output.normalized_hashtags(), vec!["kpop", "comeback", "newmusic"]);
    }

    #[test]
    fn test_output_tolerates_missing_fields() {
        let output: SimpleOutput =
            serde_json::from_value(serde_json::json!({ "title_en": "A Title" })).unwrap();
        assert_eq!(output.title_en.as_deref(), Some("A Title"));
        assert!(output.summary_ko.is_none());
        assert!(output.hashtags_en.is_empty());
    }

    #[test]
    fn test_prompt_carries_title_and_excerpt() {
        let p = build_prompt("아이유 컴백", "본문 발췌");
        assert!(p.contains("아이유 컴백"));
        assert!(p.contains("본문 발췌"));
        assert!(p.contains("hashtags_en"));
    }
}
