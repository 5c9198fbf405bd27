//! Intelligence engine CLI: batch-process PENDING articles.

use clap::Parser;

use kenter_intel_backend::{
    build_llm_client, config, create_pool, run_migrations, AppConfig, ArticleStore, EntityStore,
    IntelligenceEngine, SelfHealingResolver, SystemLogger,
};

#[derive(Parser, Debug)]
#[command(
    name = "intelligence",
    about = "Bilingual entity extraction over pending articles"
)]
struct Args {
    /// Articles to claim in this run.
    #[arg(long, default_value_t = 10)]
    batch_size: i64,
    /// Restrict to articles belonging to one queue job.
    #[arg(long)]
    job_id: Option<i64>,
    /// Model override.
    #[arg(long)]
    model: Option<String>,
    /// Per-entity confidence threshold override.
    #[arg(long)]
    threshold: Option<f64>,
    /// Auto-commit (VERIFIED) threshold override.
    #[arg(long)]
    auto_commit_threshold: Option<f64>,
    /// Call the model and print previews without touching the database.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();
    let args = Args::parse();

    let app_config = AppConfig::from_env()?;
    let pool = create_pool(&app_config.database).await?;
    run_migrations(&pool).await?;

    let mut thresholds = app_config.pipeline;
    if let Some(threshold) = args.threshold {
        thresholds.entity_confidence = threshold;
        tracing::info!(threshold, "entity confidence threshold overridden");
    }
    if let Some(auto_commit) = args.auto_commit_threshold {
        thresholds.auto_commit = auto_commit;
        tracing::info!(auto_commit, "auto-commit threshold overridden");
    }

    let model_name = args
        .model
        .unwrap_or_else(|| app_config.gemini.intelligence_model.clone());

    let articles = ArticleStore::new(pool.clone());
    let entities = EntityStore::new(pool.clone());
    let syslog = SystemLogger::new(pool.clone());
    let llm = build_llm_client(&app_config).await;

    let resolver = SelfHealingResolver::new(
        pool,
        entities.clone(),
        llm.clone(),
        syslog.clone(),
        model_name.clone(),
    );

    let engine = IntelligenceEngine::new(
        articles,
        entities,
        resolver,
        llm,
        syslog,
        thresholds,
        model_name,
        args.batch_size,
    );

    let result = engine
        .process_pending(Some(args.batch_size), args.job_id, args.dry_run)
        .await?;

    let prefix = if args.dry_run { "[DRY RUN] " } else { "" };
    println!(
        "{prefix}done: total={} verified={} processed={} manual_review={} failed={} total_tokens={}",
        result.total,
        result.verified,
        result.processed,
        result.manual_review,
        result.failed,
        result.total_tokens,
    );

    Ok(())
}
