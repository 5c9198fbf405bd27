//! Scrape engine
//!
//! Batch scraping core: triage URLs against stored statuses, fetch through
//! the polite fetcher, parse, apply the optional date window, and commit
//! each article as SCRAPED immediately. A 403 aborts the whole batch;
//! every other per-URL failure is recorded and the batch continues.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::error::ScrapeError;
use crate::models::{ArticleDraft, LogCategory, LogLevel, ProcessStatus};
use crate::services::article_store::ArticleStore;
use crate::services::feed::{FeedConfig, FeedDiscovery, FeedEntry};
use crate::services::fetcher::PoliteFetcher;
use crate::services::job_queue::JobQueueService;
use crate::services::parser::{ArticleParser, ParsedArticle};
use crate::services::system_log::{SystemEvent, SystemLogger};
use crate::services::thumbnail::ThumbnailService;

const CHECK_LATEST_PRIORITY: i32 = 7;
const THUMBNAIL_BACKFILL_DAYS: i32 = 20;
const THUMBNAIL_BACKFILL_LIMIT: i64 = 50;

/// Parse a CLI date input. Bare dates expand to 00:00:00 (start) or
/// 23:59:59 (end), UTC.
pub fn parse_cli_date(value: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_opt(23, 59, 59).expect("static time")
        } else {
            NaiveTime::from_hms_opt(0, 0, 0).expect("static time")
        };
        return Ok(DateTime::from_naive_utc_and_offset(date.and_time(time), Utc));
    }
    anyhow::bail!("invalid date (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS): {value}")
}

// ─────────────────────────────────────────────────────────────
// Result containers
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub success: Vec<serde_json::Value>,
    pub failed: Vec<serde_json::Value>,
    pub skipped: Vec<serde_json::Value>,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.success.len() + self.failed.len()
    }

    /// A fatal failure (403) means the job must fail without retry.
    pub fn has_fatal(&self) -> bool {
        self.failed
            .iter()
            .any(|f| f.get("fatal").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total,
            "processed": self.processed(),
            "success": self.success,
            "failed": self.failed,
            "skipped": self.skipped,
        })
    }

    fn merge(&mut self, other: BatchResult) {
        self.success.extend(other.success);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckResult {
    pub new_count: usize,
    pub queued_urls: Vec<String>,
    pub job_id: Option<i64>,
    pub latest_db: Option<DateTime<Utc>>,
    pub latest_feed: Option<DateTime<Utc>>,
}

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub language: String,
    pub global_priority: bool,
    pub skip_processed: bool,
    pub retry_error: bool,
    pub date_after: Option<DateTime<Utc>>,
    pub date_before: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// Per-job override of the engine's default batch cap. A check-latest
    /// job sizes this to its whole URL list so nothing is silently dropped.
    pub batch_size: Option<usize>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            language: "kr".to_string(),
            global_priority: false,
            skip_processed: true,
            retry_error: true,
            date_after: None,
            date_before: None,
            dry_run: false,
            batch_size: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// URL triage (pure)
// ─────────────────────────────────────────────────────────────

/// Classify URLs by stored status. Unknown URLs and (optionally) ERROR
/// rows are scraped; PROCESSED is skipped unless forced; everything
/// in-flight (SCRAPED/PENDING/MANUAL_REVIEW/VERIFIED) is skipped.
pub fn classify_urls(
    urls: &[String],
    statuses: &std::collections::HashMap<String, ProcessStatus>,
    skip_processed: bool,
    retry_error: bool,
) -> (Vec<String>, Vec<serde_json::Value>) {
    let mut to_scrape = Vec::new();
    let mut skipped = Vec::new();

    for url in urls {
        match statuses.get(url) {
            None => to_scrape.push(url.clone()),
            Some(ProcessStatus::Processed) if skip_processed => {
                skipped.push(serde_json::json!({"url": url, "reason": "already_processed"}));
            }
            Some(ProcessStatus::Error) if retry_error => to_scrape.push(url.clone()),
            Some(ProcessStatus::Error) => {
                skipped.push(serde_json::json!({"url": url, "reason": "status_error"}));
            }
            Some(status @ (ProcessStatus::Scraped
            | ProcessStatus::Pending
            | ProcessStatus::ManualReview
            | ProcessStatus::Verified)) => {
                skipped.push(serde_json::json!({
                    "url": url,
                    "reason": format!("status_{}", status.as_str().to_lowercase()),
                }));
            }
            // skip_processed=false — forced re-collection
            Some(ProcessStatus::Processed) => to_scrape.push(url.clone()),
        }
    }

    (to_scrape, skipped)
}

// ─────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────

pub struct ScrapeEngine {
    fetcher: Arc<PoliteFetcher>,
    feed_config: FeedConfig,
    articles: ArticleStore,
    queue: JobQueueService,
    thumbnails: Arc<dyn ThumbnailService>,
    syslog: SystemLogger,
    batch_size: usize,
}

impl ScrapeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<PoliteFetcher>,
        feed_config: FeedConfig,
        articles: ArticleStore,
        queue: JobQueueService,
        thumbnails: Arc<dyn ThumbnailService>,
        syslog: SystemLogger,
        batch_size: usize,
    ) -> Self {
        Self {
            fetcher,
            feed_config,
            articles,
            queue,
            thumbnails,
            syslog,
            batch_size,
        }
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    fn feed(&self) -> FeedDiscovery<'_> {
        FeedDiscovery::new(&self.fetcher, self.feed_config.clone())
    }

    // ── batch scraping ───────────────────────────────────────

    /// Scrape a batch of URLs. Processes at most the batch cap — the job's
    /// override when set, the engine default otherwise; each success is
    /// committed as SCRAPED immediately.
    pub async fn scrape_batch(
        &self,
        urls: &[String],
        job_id: Option<i64>,
        opts: &ScrapeOptions,
    ) -> anyhow::Result<BatchResult> {
        let limit = opts.batch_size.unwrap_or(self.batch_size).max(1);
        let batch: Vec<String> = urls.iter().take(limit).cloned().collect();

        let statuses = self.articles.statuses_by_urls(&batch).await?;
        let (to_scrape, skipped) =
            classify_urls(&batch, &statuses, opts.skip_processed, opts.retry_error);

        let mut result = BatchResult {
            total: urls.len(),
            skipped,
            ..Default::default()
        };

        if to_scrape.is_empty() {
            tracing::info!(total_skipped = result.skipped.len(), "batch fully skipped");
            return Ok(result);
        }

        tracing::info!(
            total_urls = urls.len(),
            to_scrape = to_scrape.len(),
            skipped = result.skipped.len(),
            ?job_id,
            dry_run = opts.dry_run,
            "batch started"
        );

        for (idx, url) in to_scrape.iter().enumerate() {
            tracing::info!(current = idx + 1, total = to_scrape.len(), url, "batch item");

            let parsed = match self.fetch_and_parse(url).await {
                Ok(parsed) => parsed,
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        url,
                        processed_before_abort = result.success.len(),
                        "403 received, aborting batch"
                    );
                    result.failed.push(serde_json::json!({
                        "url": url,
                        "error": "forbidden",
                        "fatal": true,
                    }));
                    break;
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "article failed");
                    result
                        .failed
                        .push(serde_json::json!({"url": url, "error": e.to_string()}));
                    continue;
                }
            };

            // date window recheck on the parsed timestamp
            if let Some(published) = parsed.published_at {
                if let Some(after) = opts.date_after {
                    if published < after {
                        result.skipped.push(serde_json::json!({
                            "url": url,
                            "reason": "before_date_range",
                            "published_at": published.to_rfc3339(),
                        }));
                        continue;
                    }
                }
                if let Some(before) = opts.date_before {
                    if published > before {
                        result.skipped.push(serde_json::json!({
                            "url": url,
                            "reason": "after_date_range",
                            "published_at": published.to_rfc3339(),
                        }));
                        continue;
                    }
                }
            }

            if opts.dry_run {
                result.success.push(serde_json::json!({
                    "url": url,
                    "article_id": null,
                    "title_ko": parsed.title_ko.chars().take(60).collect::<String>(),
                    "published_at": parsed.published_at.map(|d| d.to_rfc3339()),
                    "dry_run": true,
                }));
                tracing::info!(
                    url,
                    title = %parsed.title_ko.chars().take(50).collect::<String>(),
                    content_len = parsed.content_ko.as_deref().map(str::len).unwrap_or(0),
                    "[DRY RUN] scraped preview"
                );
                continue;
            }

            let draft = ArticleDraft {
                language: Some(opts.language.clone()),
                title_ko: Some(parsed.title_ko.clone()),
                content_ko: parsed.content_ko.clone(),
                author: parsed.author.clone(),
                thumbnail_url: parsed.thumbnail_url.clone(),
                published_at: parsed.published_at,
                global_priority: opts.global_priority,
                process_status: ProcessStatus::Scraped,
                ..Default::default()
            };

            match self.articles.upsert_article(url, &draft, job_id).await {
                Ok(article_id) => {
                    self.record_article_images(article_id, &parsed).await;
                    result.success.push(serde_json::json!({
                        "url": url,
                        "article_id": article_id,
                        "title_ko": parsed.title_ko.chars().take(60).collect::<String>(),
                    }));
                    tracing::info!(url, article_id, "scraped ok");
                }
                Err(e) => {
                    tracing::error!(url, error = %e, "article upsert failed");
                    result
                        .failed
                        .push(serde_json::json!({"url": url, "error": e.to_string()}));
                }
            }
        }

        tracing::info!(
            success = result.success.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "batch done"
        );

        self.syslog
            .log(
                LogCategory::Scrape,
                SystemEvent {
                    job_id,
                    level: Some(if result.has_fatal() {
                        LogLevel::Error
                    } else {
                        LogLevel::Info
                    }),
                    event: "scrape_batch",
                    message: &format!(
                        "batch done: success={} failed={} skipped={}",
                        result.success.len(),
                        result.failed.len(),
                        result.skipped.len()
                    ),
                    details: Some(result.to_json()),
                    ..Default::default()
                },
            )
            .await;

        Ok(result)
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedArticle, ScrapeError> {
        let html = self.fetcher.fetch_text(url).await?;
        ArticleParser::parse(url, &html)
    }

    /// Post-save hook: hand the representative image and every inline image
    /// to the thumbnail service and record them. Failures only log.
    async fn record_article_images(&self, article_id: i64, parsed: &ParsedArticle) {
        let mut queue: Vec<(&str, Option<&str>, bool)> = Vec::new();
        if let Some(og) = parsed.thumbnail_url.as_deref() {
            queue.push((og, None, true));
        }
        for (url, alt) in &parsed.image_urls {
            if Some(url.as_str()) != parsed.thumbnail_url.as_deref() {
                queue.push((url, alt.as_deref(), false));
            }
        }
        if queue.is_empty() {
            return;
        }

        tracing::info!(article_id, count = queue.len(), "image batch started");
        for (url, alt, representative) in queue {
            match self.thumbnails.process_image(url, article_id).await {
                Ok(thumb) => {
                    if let Err(e) = self
                        .articles
                        .upsert_article_image(article_id, url, Some(&thumb), representative, alt)
                        .await
                    {
                        tracing::warn!(article_id, url, error = %e, "image record failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(article_id, url, error = %e, "thumbnail failed");
                }
            }
        }
    }

    // ── range collection ─────────────────────────────────────

    /// Collect and scrape every article published inside [start, end].
    pub async fn scrape_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        job_id: Option<i64>,
        language: &str,
        max_pages: u32,
        skip_processed: bool,
        dry_run: bool,
    ) -> anyhow::Result<BatchResult> {
        tracing::info!(start = %start, end = %end, "range scrape started");

        let mut entries = self
            .feed()
            .collect_entries(Some(start), Some(end), max_pages)
            .await;
        if entries.is_empty() {
            tracing::warn!(start = %start, end = %end, "no candidates in range");
            return Ok(BatchResult::default());
        }

        // range jobs run oldest-first; undated candidates go last
        entries.sort_by_key(|e| (e.published_at.is_none(), e.published_at));

        let urls: Vec<String> = entries.into_iter().map(|e| e.url).collect();
        tracing::info!(count = urls.len(), "range candidates collected");

        let opts = ScrapeOptions {
            language: language.to_string(),
            skip_processed,
            date_after: Some(start),
            date_before: Some(end),
            dry_run,
            ..Default::default()
        };

        let mut combined = BatchResult {
            total: urls.len(),
            ..Default::default()
        };

        for chunk in urls.chunks(self.batch_size) {
            let partial = self.scrape_batch(chunk, job_id, &opts).await?;
            let fatal = partial.has_fatal();
            combined.merge(partial);
            if fatal {
                tracing::error!("range scrape aborted on 403");
                break;
            }
        }

        tracing::info!(
            success = combined.success.len(),
            failed = combined.failed.len(),
            skipped = combined.skipped.len(),
            "range scrape done"
        );
        Ok(combined)
    }

    // ── RSS fast path ────────────────────────────────────────

    /// Store the feed's metadata directly as SCRAPED rows — no per-article
    /// page fetch. Fifty articles land in roughly one request.
    pub async fn scrape_from_rss(
        &self,
        job_id: Option<i64>,
        language: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> anyhow::Result<serde_json::Value> {
        let entries = self.feed().fetch_rss().await;
        let entries = FeedDiscovery::filter_by_range(entries, start, end);

        let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();
        let statuses = self.articles.statuses_by_urls(&urls).await?;
        let (to_store, skipped) = classify_urls(&urls, &statuses, true, true);
        let to_store: std::collections::HashSet<String> = to_store.into_iter().collect();

        let mut stored = 0usize;
        let mut failed = 0usize;

        for entry in &entries {
            if !to_store.contains(&entry.url) {
                continue;
            }
            let draft = ArticleDraft {
                language: Some(language.to_string()),
                title_ko: Some(entry.title.clone()).filter(|t| !t.is_empty()),
                published_at: entry.published_at,
                process_status: ProcessStatus::Scraped,
                ..Default::default()
            };
            match self.articles.upsert_article(&entry.url, &draft, job_id).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    tracing::warn!(url = %entry.url, error = %e, "rss upsert failed");
                    failed += 1;
                }
            }
        }

        tracing::info!(total = entries.len(), stored, failed, "rss scrape done");
        Ok(serde_json::json!({
            "total": entries.len(),
            "stored": stored,
            "failed": failed,
            "skipped": skipped.len(),
        }))
    }

    // ── latest detection ─────────────────────────────────────

    /// Detect feed entries newer than the store's baseline and optionally
    /// queue a single scrape job for them at elevated priority.
    pub async fn check_latest(
        &self,
        language: &str,
        auto_queue: bool,
    ) -> anyhow::Result<CheckResult> {
        let latest_db = self.articles.latest_published_at().await?;
        tracing::info!(?latest_db, "check-latest started");

        let mut feed_entries = self.feed().fetch_rss().await;
        if feed_entries.is_empty() {
            feed_entries = self.feed().fetch_list_page(1).await;
        }

        let latest_feed = feed_entries.iter().filter_map(|e| e.published_at).max();

        let new_entries: Vec<&FeedEntry> = match latest_db {
            Some(baseline) => feed_entries
                .iter()
                .filter(|e| e.published_at.map_or(true, |p| p > baseline))
                .collect(),
            None => feed_entries.iter().collect(),
        };

        let candidate_urls: Vec<String> = new_entries.iter().map(|e| e.url.clone()).collect();
        let statuses = self.articles.statuses_by_urls(&candidate_urls).await?;
        let (to_scrape, skipped) = classify_urls(&candidate_urls, &statuses, true, true);

        if to_scrape.is_empty() {
            tracing::info!(
                feed_count = feed_entries.len(),
                already_skipped = skipped.len(),
                "nothing new"
            );
            return Ok(CheckResult {
                latest_db,
                latest_feed,
                ..Default::default()
            });
        }

        tracing::info!(new_count = to_scrape.len(), skipped = skipped.len(), "new articles found");

        let mut job_id = None;
        if auto_queue {
            let id = self
                .queue
                .create_job(
                    "scrape",
                    serde_json::json!({
                        "urls": to_scrape,
                        "language": language,
                        "batch_size": to_scrape.len(),
                    }),
                    CHECK_LATEST_PRIORITY,
                    3,
                )
                .await?;
            tracing::info!(job_id = id, url_count = to_scrape.len(), "latest articles queued");
            job_id = Some(id);
        }

        Ok(CheckResult {
            new_count: to_scrape.len(),
            queued_urls: to_scrape,
            job_id,
            latest_db,
            latest_feed,
        })
    }

    // ── thumbnail backfill ───────────────────────────────────

    /// Re-fetch recent articles lacking a thumbnail and pull their OG
    /// image. Best effort; each failure only logs.
    pub async fn backfill_thumbnails(&self) -> anyhow::Result<usize> {
        let targets = self
            .articles
            .articles_missing_thumbnail(THUMBNAIL_BACKFILL_DAYS, THUMBNAIL_BACKFILL_LIMIT)
            .await?;
        if targets.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = targets.len(), "thumbnail backfill started");
        let mut filled = 0;

        for (article_id, url) in targets {
            let parsed = match self.fetch_and_parse(&url).await {
                Ok(parsed) => parsed,
                Err(e) if e.is_fatal() => {
                    tracing::error!(url, "403 during backfill, stopping sweep");
                    break;
                }
                Err(e) => {
                    tracing::debug!(url, error = %e, "backfill fetch failed");
                    continue;
                }
            };

            let Some(og_image) = parsed.thumbnail_url.as_deref() else {
                continue;
            };

            match self.thumbnails.process_image(og_image, article_id).await {
                Ok(public_url) => {
                    if self
                        .articles
                        .update_thumbnail(article_id, &public_url)
                        .await
                        .is_ok()
                    {
                        let _ = self
                            .articles
                            .upsert_article_image(article_id, og_image, Some(&public_url), true, None)
                            .await;
                        filled += 1;
                    }
                }
                Err(e) => {
                    tracing::debug!(article_id, error = %e, "backfill thumbnail failed");
                }
            }
        }

        tracing::info!(filled, "thumbnail backfill done");
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn statuses(pairs: &[(&str, ProcessStatus)]) -> HashMap<String, ProcessStatus> {
        pairs
            .iter()
            .map(|(u, s)| (u.to_string(), *s))
            .collect()
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_classify_unknown_urls_scraped() {
        let (to_scrape, skipped) = classify_urls(&urls(&["https://a/1"]), &HashMap::new(), true, true);
        assert_eq!(to_scrape, vec!["https://a/1"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_classify_processed_skipped_by_default() {
        let s = statuses(&[("https://a/1", ProcessStatus::Processed)]);
        let (to_scrape, skipped) = classify_urls(&urls(&["https://a/1"]), &s, true, true);
        assert!(to_scrape.is_empty());
        assert_eq!(skipped[0]["reason"], "already_processed");

        // force mode re-collects
        let (to_scrape, skipped) = classify_urls(&urls(&["https://a/1"]), &s, false, true);
        assert_eq!(to_scrape, vec!["https://a/1"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_classify_error_retried_by_default() {
        let s = statuses(&[("https://a/1", ProcessStatus::Error)]);
        let (to_scrape, _) = classify_urls(&urls(&["https://a/1"]), &s, true, true);
        assert_eq!(to_scrape, vec!["https://a/1"]);

        let (to_scrape, skipped) = classify_urls(&urls(&["https://a/1"]), &s, true, false);
        assert!(to_scrape.is_empty());
        assert_eq!(skipped[0]["reason"], "status_error");
    }

    #[test]
    fn test_classify_in_flight_statuses_skipped() {
        let s = statuses(&[
            ("https://a/1", ProcessStatus::Scraped),
            ("https://a/2", ProcessStatus::Pending),
            ("https://a/3", ProcessStatus::ManualReview),
            ("https://a/4", ProcessStatus::Verified),
        ]);
        let (to_scrape, skipped) = classify_urls(
            &urls(&["https://a/1", "https://a/2", "https://a/3", "https://a/4"]),
            &s,
            true,
            true,
        );
        assert!(to_scrape.is_empty());
        let reasons: Vec<&str> = skipped
            .iter()
            .map(|v| v["reason"].as_str().unwrap())
            .collect();
        assert_eq!(
            reasons,
            vec![
                "status_scraped",
                "status_pending",
                "status_manual_review",
                "status_verified"
            ]
        );
    }

    #[test]
    fn test_parse_cli_date_expansion() {
        let start = parse_cli_date("2026-02-01", false).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-02-01T00:00:00+00:00");
        let end = parse_cli_date("2026-02-01", true).unwrap();
        assert_eq!(end.to_rfc3339(), "2026-02-01T23:59:59+00:00");
        let exact = parse_cli_date("2026-02-01T12:30:00", true).unwrap();
        assert_eq!(exact.to_rfc3339(), "2026-02-01T12:30:00+00:00");
        assert!(parse_cli_date("02/01/2026", false).is_err());
    }

    #[test]
    fn test_batch_result_fatal_detection() {
        let mut result = BatchResult::default();
        result
            .failed
            .push(serde_json::json!({"url": "https://a/1", "error": "HTTP 500"}));
        assert!(!result.has_fatal());
        result
            .failed
            .push(serde_json::json!({"url": "https://a/2", "error": "forbidden", "fatal": true}));
        assert!(result.has_fatal());
    }
}
