//! Scraper CLI: date-range collection and latest-article detection.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use kenter_intel_backend::services::{
    scrape_engine::parse_cli_date, DomainThrottle, FeedConfig, NoopThumbnailService,
    PoliteFetcher,
};
use kenter_intel_backend::{
    config, create_pool, run_migrations, AppConfig, ArticleStore, JobQueueService, ScrapeEngine,
    SystemLogger,
};

#[derive(Parser, Debug)]
#[command(name = "scraper", about = "K-entertainment news scraper CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect articles published inside a date range.
    ScrapeRange {
        /// Start date (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, UTC).
        #[arg(long)]
        start: String,
        /// End date (inclusive; bare dates expand to 23:59:59).
        #[arg(long)]
        end: String,
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// List-page pagination bound when RSS does not cover the range.
        #[arg(long, default_value_t = 10)]
        max_pages: u32,
        #[arg(long, default_value = "kr")]
        language: String,
        /// Attach results to an existing queue job.
        #[arg(long)]
        job_id: Option<i64>,
        /// Re-collect PROCESSED articles too.
        #[arg(long)]
        force: bool,
        /// Fetch and parse without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Detect feed entries newer than the stored baseline.
    CheckLatest {
        /// Detect only; do not queue a scrape job.
        #[arg(long)]
        no_queue: bool,
        #[arg(long, default_value = "kr")]
        language: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();
    let cli = Cli::parse();

    let app_config = AppConfig::from_env()?;
    let pool = create_pool(&app_config.database).await?;
    run_migrations(&pool).await?;

    let throttle = Arc::new(DomainThrottle::new());
    let fetcher = Arc::new(PoliteFetcher::new(throttle, Default::default())?);
    let articles = ArticleStore::new(pool.clone());
    let queue = JobQueueService::new(pool.clone());
    let syslog = SystemLogger::new(pool);

    let mut engine = ScrapeEngine::new(
        fetcher,
        FeedConfig::default(),
        articles,
        queue,
        Arc::new(NoopThumbnailService),
        syslog,
        10,
    );

    match cli.command {
        Command::ScrapeRange {
            start,
            end,
            batch_size,
            max_pages,
            language,
            job_id,
            force,
            dry_run,
        } => {
            engine.set_batch_size(batch_size);
            let start = parse_cli_date(&start, false)?;
            let end = parse_cli_date(&end, true)?;
            let result = engine
                .scrape_range(start, end, job_id, &language, max_pages, !force, dry_run)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
        Command::CheckLatest { no_queue, language } => {
            let result = engine.check_latest(&language, !no_queue).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
