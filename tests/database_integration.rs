//! Database-backed contract tests. These need a live Postgres pointed at by
//! TEST_DATABASE_URL and are ignored by default:
//!
//!   TEST_DATABASE_URL=postgres://... cargo test -- --ignored

use kenter_intel_backend::models::{ArticleDraft, JobStatus, ProcessStatus};
use kenter_intel_backend::services::{ArticleStore, JobQueueService};
use sqlx::PgPool;

async fn test_pool() -> PgPool {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a disposable Postgres");
    let pool = PgPool::connect(&url).await.expect("connect");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    pool
}

fn unique_url(tag: &str) -> String {
    format!(
        "https://news.tenasia.example/article/{}-{}",
        tag,
        uuid::Uuid::new_v4()
    )
}

#[tokio::test]
#[ignore]
async fn upsert_merges_with_coalesce_semantics() {
    let pool = test_pool().await;
    let store = ArticleStore::new(pool);
    let url = unique_url("upsert");

    let first = ArticleDraft {
        title_ko: Some("첫 제목".to_string()),
        content_ko: Some("본문".to_string()),
        author: Some("홍길동".to_string()),
        process_status: ProcessStatus::Scraped,
        ..Default::default()
    };
    let id1 = store.upsert_article(&url, &first, None).await.unwrap();

    // second upsert carries NULL title/author: must not clobber
    let second = ArticleDraft {
        title_en: Some("English Title".to_string()),
        process_status: ProcessStatus::Scraped,
        ..Default::default()
    };
    let id2 = store.upsert_article(&url, &second, None).await.unwrap();
    assert_eq!(id1, id2);

    let row = store.get_by_url(&url).await.unwrap().unwrap();
    assert_eq!(row.title_ko.as_deref(), Some("첫 제목"));
    assert_eq!(row.author.as_deref(), Some("홍길동"));
    assert_eq!(row.title_en.as_deref(), Some("English Title"));
}

#[tokio::test]
#[ignore]
async fn claim_pending_hands_each_job_to_one_worker() {
    let pool = test_pool().await;
    let queue = JobQueueService::new(pool);

    let job_id = queue
        .create_job(
            "scrape",
            serde_json::json!({"source_url": unique_url("claim")}),
            9,
            3,
        )
        .await
        .unwrap();

    // two workers race for the same queue
    let (a, b) = tokio::join!(queue.claim_pending("worker-a"), queue.claim_pending("worker-b"));
    let a = a.unwrap();
    let b = b.unwrap();

    let claimed: Vec<i64> = [a, b]
        .into_iter()
        .flatten()
        .filter(|j| j.id == job_id)
        .map(|j| j.id)
        .collect();
    assert_eq!(claimed.len(), 1, "exactly one worker may claim the job");

    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
#[ignore]
async fn claim_job_targets_the_exact_row() {
    let pool = test_pool().await;
    let queue = JobQueueService::new(pool);

    // a higher-priority job sits in front of the one we want
    let decoy_id = queue
        .create_job("scrape", serde_json::json!({}), 9, 3)
        .await
        .unwrap();
    let target_id = queue
        .create_job("scrape", serde_json::json!({}), 1, 3)
        .await
        .unwrap();

    let claimed = queue
        .claim_job(target_id, "worker-single")
        .await
        .unwrap()
        .expect("target job should be claimable");
    assert_eq!(claimed.id, target_id);
    assert_eq!(claimed.status, JobStatus::Running);

    // the decoy is untouched and a second targeted claim comes back empty
    let decoy = queue.get_job(decoy_id).await.unwrap().unwrap();
    assert_eq!(decoy.status, JobStatus::Pending);
    assert!(queue
        .claim_job(target_id, "worker-other")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore]
async fn increment_retry_requeues_until_budget_spent() {
    let pool = test_pool().await;
    let queue = JobQueueService::new(pool);

    let job_id = queue
        .create_job("scrape", serde_json::json!({}), 5, 2)
        .await
        .unwrap();
    queue.claim_pending("worker-a").await.unwrap();

    let count = queue.increment_retry(job_id).await.unwrap();
    assert_eq!(count, 1);
    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.worker_id.is_none());
    assert!(job.started_at.is_none());

    let count = queue.increment_retry(job_id).await.unwrap();
    assert_eq!(count, 2);
    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
#[ignore]
async fn cancel_only_touches_pending_jobs() {
    let pool = test_pool().await;
    let queue = JobQueueService::new(pool);

    let job_id = queue
        .create_job("scrape", serde_json::json!({}), 1, 3)
        .await
        .unwrap();
    assert!(queue.cancel_job(job_id).await.unwrap());
    // a second cancel is a no-op
    assert!(!queue.cancel_job(job_id).await.unwrap());
}
