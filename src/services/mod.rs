// Services module

pub mod article_store;
pub mod entity_store;
pub mod enricher;
pub mod feed;
pub mod fetcher;
pub mod intelligence;
pub mod job_queue;
pub mod llm;
pub mod param_store;
pub mod parser;
pub mod resolver;
pub mod scrape_engine;
pub mod simple_processor;
pub mod system_log;
pub mod throttle;
pub mod thumbnail;
pub mod worker;

pub use article_store::ArticleStore;
pub use entity_store::EntityStore;
pub use enricher::{ProfileEnricher, ReferenceCorpus};
pub use feed::{FeedConfig, FeedDiscovery, FeedEntry};
pub use fetcher::{FetcherConfig, PoliteFetcher};
pub use intelligence::{IntelligenceEngine, TranslationTier};
pub use job_queue::JobQueueService;
pub use llm::{GeminiProvider, LlmClient, LlmProvider, RpmLimiter};
pub use param_store::{MemoryParamStore, ParamStore, SsmParamStore};
pub use parser::ArticleParser;
pub use resolver::SelfHealingResolver;
pub use scrape_engine::{BatchResult, CheckResult, ScrapeEngine, ScrapeOptions};
pub use simple_processor::SimpleProcessor;
pub use system_log::SystemLogger;
pub use throttle::{DomainThrottle, ThrottleRule};
pub use thumbnail::{NoopThumbnailService, ThumbnailService};
pub use worker::Worker;
