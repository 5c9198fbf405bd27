//! Scrape worker entry point.
//!
//! Loop mode (default) polls the queue until a termination signal arrives;
//! `--job-id N` processes exactly one job and exits.

use std::sync::Arc;

use clap::Parser;

use kenter_intel_backend::services::{
    worker::resolve_worker_id, DomainThrottle, FeedConfig, NoopThumbnailService, PoliteFetcher,
};
use kenter_intel_backend::{
    build_llm_client, config, create_pool, run_migrations, AppConfig, ArticleStore,
    JobQueueService, ScrapeEngine, SimpleProcessor, SystemLogger, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Scrape worker (loop or one-shot)")]
struct Args {
    /// Process exactly this job id, then exit.
    #[arg(long)]
    job_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();
    let args = Args::parse();

    let app_config = AppConfig::from_env()?;
    let pool = create_pool(&app_config.database).await?;
    run_migrations(&pool).await?;

    let throttle = Arc::new(DomainThrottle::new());
    let fetcher = Arc::new(PoliteFetcher::new(throttle, Default::default())?);

    let articles = ArticleStore::new(pool.clone());
    let queue = JobQueueService::new(pool.clone());
    let syslog = SystemLogger::new(pool.clone());

    let engine = Arc::new(ScrapeEngine::new(
        fetcher,
        FeedConfig::default(),
        articles.clone(),
        queue.clone(),
        Arc::new(NoopThumbnailService),
        syslog,
        10,
    ));

    let llm = build_llm_client(&app_config).await;
    let simple = Arc::new(SimpleProcessor::new(
        articles,
        llm,
        app_config.gemini.model.clone(),
    ));

    let worker_id = resolve_worker_id(&app_config.worker).await;
    let worker = Worker::new(
        queue,
        engine,
        simple,
        worker_id,
        app_config.worker.poll_interval,
    );

    match args.job_id {
        Some(job_id) => worker.run_single(job_id).await,
        None => worker.run_loop().await,
    }
}
