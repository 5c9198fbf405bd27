//! Scrape worker
//!
//! Loop mode polls the queue, executes one job at a time, and exits cleanly
//! on SIGTERM/SIGINT after finishing the in-flight job. One-shot mode runs
//! exactly one job id. Multiple worker processes may share the queue; the
//! claim-one-atomically contract keeps them from colliding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::WorkerSettings;
use crate::models::{Job, JobStatus, JobType, ScrapeParams, ScrapeRangeParams, ScrapeRssParams};
use crate::services::job_queue::JobQueueService;
use crate::services::scrape_engine::{parse_cli_date, ScrapeEngine, ScrapeOptions};
use crate::services::simple_processor::SimpleProcessor;

const DEFAULT_BATCH_SIZE: usize = 10;
const INSTANCE_METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve this worker's identity: `WORKER_ID` env, then the cloud
/// instance id, then the hostname, then a random fallback.
pub async fn resolve_worker_id(settings: &WorkerSettings) -> String {
    if let Some(id) = &settings.worker_id {
        return id.clone();
    }

    if let Some(instance_id) = fetch_instance_id().await {
        return instance_id;
    }

    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("worker_{}", Uuid::new_v4()))
}

/// IMDSv2 lookup: token first, then the instance id. Silently absent off
/// the cloud.
async fn fetch_instance_id() -> Option<String> {
    let client = reqwest::Client::builder()
        .timeout(INSTANCE_METADATA_TIMEOUT)
        .build()
        .ok()?;

    let token = client
        .put("http://169.254.169.254/latest/api/token")
        .header("X-aws-ec2-metadata-token-ttl-seconds", "21600")
        .send()
        .await
        .ok()?
        .text()
        .await
        .ok()?;

    let instance_id = client
        .get("http://169.254.169.254/latest/meta-data/instance-id")
        .header("X-aws-ec2-metadata-token", token)
        .send()
        .await
        .ok()?
        .text()
        .await
        .ok()?;

    Some(instance_id).filter(|id| !id.is_empty())
}

pub struct Worker {
    queue: JobQueueService,
    engine: Arc<ScrapeEngine>,
    simple: Arc<SimpleProcessor>,
    worker_id: String,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: JobQueueService,
        engine: Arc<ScrapeEngine>,
        simple: Arc<SimpleProcessor>,
        worker_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            engine,
            simple,
            worker_id,
            poll_interval,
        }
    }

    // ── loop mode ────────────────────────────────────────────

    /// Poll-and-process loop. The shutdown flag is set by the signal
    /// handlers and checked between jobs, so an in-flight job always
    /// finishes.
    pub async fn run_loop(&self) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            poll_interval_secs = self.poll_interval.as_secs(),
            "worker loop started"
        );

        self.queue.recover_stuck_jobs().await?;

        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_signal_listener(shutdown.clone());

        while !shutdown.load(Ordering::SeqCst) {
            let job = self.queue.claim_pending(&self.worker_id).await?;

            let Some(job) = job else {
                // idle: advance the SCRAPED backlog and backfill thumbnails
                if let Err(e) = self.simple.process_scraped(None).await {
                    tracing::warn!(error = %e, "idle post-processing failed");
                }
                if let Err(e) = self.engine.backfill_thumbnails().await {
                    tracing::warn!(error = %e, "idle thumbnail backfill failed");
                }
                tracing::debug!("queue empty, waiting");
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = wait_for_flag(shutdown.clone()) => break,
                }
                continue;
            };

            self.process_job(&job).await;
            // go straight for the next job, no sleep
        }

        tracing::info!("worker loop stopped");
        Ok(())
    }

    /// One-shot mode: process exactly one pending job and exit.
    pub async fn run_single(&self, job_id: i64) -> anyhow::Result<()> {
        tracing::info!(job_id, worker_id = %self.worker_id, "single-job mode");

        let Some(job) = self.queue.get_job(job_id).await? else {
            tracing::error!(job_id, "job not found");
            return Ok(());
        };

        if job.status != JobStatus::Pending {
            tracing::warn!(job_id, status = job.status.as_str(), "job is not pending");
            return Ok(());
        }

        // claim exactly this job so the queue sees a running row; a
        // concurrent worker may have taken it since the status check
        let Some(claimed) = self.queue.claim_job(job_id, &self.worker_id).await? else {
            tracing::warn!(job_id, "job was claimed by another worker");
            return Ok(());
        };

        self.process_job(&claimed).await;
        Ok(())
    }

    // ── job execution ────────────────────────────────────────

    /// Execute one claimed job and record its outcome, applying the retry
    /// policy. A 403 block fails the job immediately without a retry.
    pub async fn process_job(&self, job: &Job) {
        tracing::info!(job_id = job.id, job_type = %job.job_type, "job started");

        let outcome = self.dispatch(job).await;

        match outcome {
            Ok(JobOutcome::Completed(result)) => {
                if let Err(e) = self
                    .queue
                    .update_status(job.id, JobStatus::Completed, Some(result), None)
                    .await
                {
                    tracing::error!(job_id = job.id, error = %e, "status update failed");
                }
                tracing::info!(job_id = job.id, "job completed");
                self.run_followups().await;
            }
            Ok(JobOutcome::Fatal { result, error }) => {
                // IP/UA block: retrying cannot help, fail without touching
                // the retry counter
                tracing::error!(job_id = job.id, error = %error, "fatal block, failing without retry");
                if let Err(e) = self
                    .queue
                    .update_status(job.id, JobStatus::Failed, Some(result), Some(&error))
                    .await
                {
                    tracing::error!(job_id = job.id, error = %e, "status update failed");
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                tracing::error!(job_id = job.id, error = %error_msg, "job failed");

                match self.queue.increment_retry(job.id).await {
                    Ok(count) if count >= job.max_retries => {
                        let _ = self
                            .queue
                            .update_status(job.id, JobStatus::Failed, None, Some(&error_msg))
                            .await;
                        tracing::warn!(job_id = job.id, retries = count, "retry budget exhausted");
                    }
                    Ok(count) => {
                        tracing::info!(
                            job_id = job.id,
                            retry = count,
                            max = job.max_retries,
                            "requeued for retry"
                        );
                    }
                    Err(e) => {
                        tracing::error!(job_id = job.id, error = %e, "retry increment failed");
                    }
                }
            }
        }
    }

    async fn dispatch(&self, job: &Job) -> anyhow::Result<JobOutcome> {
        let job_type: JobType = job
            .job_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        match job_type {
            JobType::Scrape => self.do_scrape(job).await,
            JobType::ScrapeRange => self.do_scrape_range(job).await,
            JobType::ScrapeRss => self.do_scrape_rss(job).await,
        }
    }

    async fn do_scrape(&self, job: &Job) -> anyhow::Result<JobOutcome> {
        let params: ScrapeParams = serde_json::from_value(job.params.clone())?;
        let urls = params.resolve_urls();
        if urls.is_empty() {
            anyhow::bail!("job params carry neither urls nor source_url");
        }

        tracing::info!(
            urls = urls.len(),
            language = %params.language,
            job_id = job.id,
            dry_run = params.dry_run,
            "scrape started"
        );

        // the job's requested batch size wins over the engine default, so a
        // check-latest job sized to its URL list is never truncated
        let opts = ScrapeOptions {
            language: params.language.clone(),
            dry_run: params.dry_run,
            batch_size: Some(params.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)),
            ..Default::default()
        };

        let result = self.engine.scrape_batch(&urls, Some(job.id), &opts).await?;

        let mut result_json = result.to_json();
        result_json["platforms"] = serde_json::json!(params.platforms);

        if result.has_fatal() {
            return Ok(JobOutcome::Fatal {
                result: result_json,
                error: "ForbiddenError: IP/UA block detected, retry is pointless".to_string(),
            });
        }
        Ok(JobOutcome::Completed(result_json))
    }

    async fn do_scrape_range(&self, job: &Job) -> anyhow::Result<JobOutcome> {
        let params: ScrapeRangeParams = serde_json::from_value(job.params.clone())?;
        let start = parse_cli_date(&params.start_date, false)?;
        let end = parse_cli_date(&params.end_date, true)?;

        tracing::info!(
            start = %start,
            end = %end,
            language = %params.language,
            max_pages = params.max_pages,
            dry_run = params.dry_run,
            job_id = job.id,
            "scrape_range started"
        );

        let result = self
            .engine
            .scrape_range(
                start,
                end,
                Some(job.id),
                &params.language,
                params.max_pages,
                true,
                params.dry_run,
            )
            .await?;

        let summary = serde_json::json!({
            "total": result.total,
            "success_count": result.success.len(),
            "failed_count": result.failed.len(),
            "skipped_count": result.skipped.len(),
        });

        if result.has_fatal() {
            return Ok(JobOutcome::Fatal {
                result: summary,
                error: "ForbiddenError: IP/UA block detected, retry is pointless".to_string(),
            });
        }
        Ok(JobOutcome::Completed(summary))
    }

    async fn do_scrape_rss(&self, job: &Job) -> anyhow::Result<JobOutcome> {
        let params: ScrapeRssParams = serde_json::from_value(job.params.clone())?;
        let start = params
            .start_date
            .as_deref()
            .map(|d| parse_cli_date(d, false))
            .transpose()?;
        let end = params
            .end_date
            .as_deref()
            .map(|d| parse_cli_date(d, true))
            .transpose()?;

        tracing::info!(
            language = %params.language,
            ?start,
            ?end,
            job_id = job.id,
            "scrape_rss started"
        );

        let result = self
            .engine
            .scrape_from_rss(Some(job.id), &params.language, start, end)
            .await?;
        Ok(JobOutcome::Completed(result))
    }

    /// Opportunistic follow-ups after a successful job. Failures here never
    /// roll back the job.
    async fn run_followups(&self) {
        if let Err(e) = self.simple.process_all_scraped().await {
            tracing::warn!(error = %e, "post-scrape AI processing failed (job result intact)");
        }
        if let Err(e) = self.engine.backfill_thumbnails().await {
            tracing::warn!(error = %e, "thumbnail backfill failed (ignored)");
        }
    }
}

enum JobOutcome {
    Completed(serde_json::Value),
    Fatal {
        result: serde_json::Value,
        error: String,
    },
}

fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("termination signal received, finishing the current job");
        flag.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_flag(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_id_prefers_configured_value() {
        let settings = WorkerSettings {
            poll_interval: Duration::from_secs(10),
            worker_id: Some("worker-east-1".to_string()),
        };
        assert_eq!(resolve_worker_id(&settings).await, "worker-east-1");
    }

    #[test]
    fn test_scrape_rss_params_dates_optional() {
        let params: ScrapeRssParams =
            serde_json::from_value(serde_json::json!({"language": "kr"})).unwrap();
        assert!(params.start_date.is_none());
        assert!(params.end_date.is_none());
    }
}
