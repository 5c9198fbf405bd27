//! Polite HTTP fetcher
//!
//! Two throttling layers on every request: the shared [`DomainThrottle`]
//! enforces per-host politeness invariants, and a human-jitter delay of
//! `uniform(delay_min, delay_max)` seconds makes the cadence irregular.
//! Error semantics: 403 aborts immediately (no retry), 429 honors
//! Retry-After plus jitter, 5xx and network errors retry with exponential
//! backoff.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;

use crate::error::ScrapeError;
use crate::services::throttle::DomainThrottle;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Human-jitter delay bounds in seconds.
    pub delay_min: f64,
    pub delay_max: f64,
    pub max_retries: u32,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            delay_min: 2.0,
            delay_max: 5.0,
            max_retries: 3,
            timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Throttled HTTP client shared by the scraper and the image pipeline.
pub struct PoliteFetcher {
    client: reqwest::Client,
    throttle: Arc<DomainThrottle>,
    config: FetcherConfig,
}

impl PoliteFetcher {
    pub fn new(throttle: Arc<DomainThrottle>, config: FetcherConfig) -> anyhow::Result<Self> {
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            throttle,
            config,
        })
    }

    pub fn throttle(&self) -> Arc<DomainThrottle> {
        self.throttle.clone()
    }

    fn jitter(lo: f64, hi: f64) -> Duration {
        let secs = rand::thread_rng().gen_range(lo..hi);
        Duration::from_secs_f64(secs)
    }

    /// Random human-like pause, regenerated per call.
    async fn human_delay(&self) {
        if self.config.delay_max <= 0.0 {
            return;
        }
        let wait = Self::jitter(self.config.delay_min, self.config.delay_max.max(self.config.delay_min + f64::EPSILON));
        tracing::debug!(wait_ms = wait.as_millis() as u64, "human delay");
        tokio::time::sleep(wait).await;
    }

    /// Exponential backoff with jitter: `2·2^attempt + uniform(0,1)` seconds.
    async fn backoff(&self, attempt: u32) {
        let wait = Duration::from_secs_f64(2.0 * f64::from(1u32 << attempt))
            + Self::jitter(0.0, 1.0);
        tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "backoff");
        tokio::time::sleep(wait).await;
    }

    /// Polite GET with retries.
    pub async fn fetch(&self, url: &str) -> Result<reqwest::Response, ScrapeError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.backoff(attempt - 1).await;
            }

            self.human_delay().await;
            self.throttle.wait(url).await;

            tracing::info!(url, attempt, "fetch");
            let resp = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "network error");
                    last_error = e.to_string();
                    continue;
                }
            };

            match resp.status() {
                StatusCode::FORBIDDEN => {
                    // IP/UA block: retrying will not resolve it, the caller
                    // must abort the whole batch.
                    tracing::error!(url, "HTTP 403, aborting");
                    return Err(ScrapeError::Forbidden {
                        url: url.to_string(),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= self.config.max_retries {
                        return Err(ScrapeError::RateLimit {
                            url: url.to_string(),
                            retries: self.config.max_retries,
                        });
                    }
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(30);
                    let wait = Duration::from_secs(retry_after) + Self::jitter(1.0, 5.0);
                    tracing::warn!(url, attempt, retry_after, "HTTP 429, waiting");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                status if status.is_success() => {
                    tracing::info!(url, status = status.as_u16(), "fetch ok");
                    return Ok(resp);
                }
                status => {
                    tracing::warn!(url, status = status.as_u16(), attempt, "http error");
                    last_error = format!("HTTP {}", status.as_u16());
                    continue;
                }
            }
        }

        Err(ScrapeError::Exhausted {
            url: url.to_string(),
            retries: self.config.max_retries,
            message: last_error,
        })
    }

    /// Fetch and decode the response body.
    pub async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        let resp = self.fetch(url).await?;
        resp.text().await.map_err(|e| ScrapeError::Exhausted {
            url: url.to_string(),
            retries: 0,
            message: format!("body read failed: {e}"),
        })
    }

    /// Throttled GET without the human delay or retry dance. Used for RSS
    /// feeds and list pages where a single quiet request is enough.
    pub async fn get_quiet(&self, url: &str) -> anyhow::Result<reqwest::Response> {
        self.throttle.wait(url).await;
        Ok(self.client.get(url).send().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::throttle::ThrottleRule;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_fetcher(max_retries: u32) -> PoliteFetcher {
        let throttle = Arc::new(DomainThrottle::with_rules(
            vec![],
            ThrottleRule::new(0, 100_000),
        ));
        PoliteFetcher::new(
            throttle,
            FetcherConfig {
                delay_min: 0.0,
                delay_max: 0.0,
                max_retries,
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher(3);
        let body = fetcher
            .fetch_text(&format!("{}/a/1", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_forbidden_aborts_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fast_fetcher(3);
        let err = fetcher
            .fetch(&format!("{}/blocked", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Forbidden { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_exhaust() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        // max_retries = 1 → two attempts total
        let fetcher = fast_fetcher(1);
        let err = fetcher
            .fetch(&format!("{}/flaky", server.uri()))
            .await
            .unwrap_err();
        match err {
            ScrapeError::Exhausted { retries, message, .. } => {
                assert_eq!(retries, 1);
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_honors_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher(3);
        let resp = fetcher
            .fetch(&format!("{}/busy", server.uri()))
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_exhausts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wall"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher(1);
        let err = fetcher
            .fetch(&format!("{}/wall", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::RateLimit { retries: 1, .. }));
    }
}
