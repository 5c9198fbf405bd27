//! Rate-limited Gemini client
//!
//! Every call runs the same gauntlet: kill-switch check against the
//! external parameter store, a sliding-window RPM slot, the provider call,
//! then token accounting into the monthly counter. Crossing the monthly
//! limit flips the kill switch for the whole fleet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::LlmError;
use crate::services::param_store::ParamStore;

const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// Cost/latency metrics for one provider call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CallMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub response_time_ms: u64,
}

/// Provider seam. Production uses the Gemini REST API; tests script
/// responses.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<(String, CallMetrics), LlmError>;
}

/// Sliding-window RPM limiter. The wait is computed under the lock but
/// slept outside it, then re-checked, so no lock is ever held across a
/// sleep.
pub struct RpmLimiter {
    limit: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RpmLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a call slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= WINDOW {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < self.limit {
                    window.push_back(now);
                    return;
                }

                let oldest = *window.front().expect("window is non-empty");
                WINDOW.saturating_sub(now.duration_since(oldest)) + SAFETY_MARGIN
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rpm limit reached");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn current_usage(&self) -> usize {
        let window = self.window.lock().await;
        let now = Instant::now();
        window
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count()
    }
}

/// Gemini REST provider (`models/{model}:generateContent`), JSON response
/// mode with low temperature.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(
            api_key,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, model: &str, prompt: &str) -> Result<(String, CallMetrics), LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": 0.1,
                "responseMimeType": "application/json",
            },
        });

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        let response_time_ms = started.elapsed().as_millis() as u64;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("HTTP {}", resp.status().as_u16())));
        }

        let payload: serde_json::Value =
            resp.json().await.map_err(|e| LlmError::Api(e.to_string()))?;

        let text = payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LlmError::Api("empty candidates in response".to_string()))?
            .to_string();

        let usage = payload.get("usageMetadata").cloned().unwrap_or_default();
        let metrics = CallMetrics {
            prompt_tokens: usage
                .get("promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            completion_tokens: usage
                .get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            total_tokens: usage
                .get("totalTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            response_time_ms,
        };

        Ok((text, metrics))
    }
}

/// Kill-switched, RPM-limited client wrapper.
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    limiter: RpmLimiter,
    params: Arc<dyn ParamStore>,
    kill_switch_path: String,
    monthly_tokens_path: String,
    monthly_token_limit: u64,
    /// Kill-switch and token accounting only apply in production; the
    /// parameter service is a no-op in development.
    enforce_budget: bool,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        params: Arc<dyn ParamStore>,
        rpm_limit: u32,
        kill_switch_path: String,
        monthly_tokens_path: String,
        monthly_token_limit: u64,
        enforce_budget: bool,
    ) -> Self {
        Self {
            provider,
            limiter: RpmLimiter::new(rpm_limit),
            params,
            kill_switch_path,
            monthly_tokens_path,
            monthly_token_limit,
            enforce_budget,
        }
    }

    /// Raise when the kill-switch flag reads "true" (case-insensitive,
    /// trimmed).
    async fn check_kill_switch(&self) -> Result<(), LlmError> {
        if !self.enforce_budget {
            return Ok(());
        }

        let flag = self
            .params
            .get(&self.kill_switch_path)
            .await
            .unwrap_or(None);

        match flag {
            Some(value) if value.trim().eq_ignore_ascii_case("true") => Err(LlmError::KillSwitch),
            Some(_) => Ok(()),
            None => {
                tracing::warn!(
                    path = %self.kill_switch_path,
                    "kill switch parameter unreadable, allowing this call"
                );
                Ok(())
            }
        }
    }

    /// Add this call's tokens to the monthly counter. Crossing the limit
    /// sets the kill switch and logs a critical event.
    async fn record_usage(&self, total_tokens: u64) {
        if !self.enforce_budget || total_tokens == 0 {
            return;
        }

        let current: u64 = self
            .params
            .get(&self.monthly_tokens_path)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        let total = current + total_tokens;

        if let Err(e) = self
            .params
            .put(&self.monthly_tokens_path, &total.to_string())
            .await
        {
            tracing::warn!(error = %e, "monthly token counter write failed");
        }

        tracing::debug!(
            call_tokens = total_tokens,
            monthly_total = total,
            limit = self.monthly_token_limit,
            "token usage recorded"
        );

        if total >= self.monthly_token_limit {
            if let Err(e) = self.params.put(&self.kill_switch_path, "true").await {
                tracing::error!(error = %e, "kill switch activation write failed");
            }
            tracing::error!(
                monthly_total = total,
                limit = self.monthly_token_limit,
                "monthly token limit exceeded, kill switch activated"
            );
        }
    }

    /// One guarded provider call.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<(String, CallMetrics), LlmError> {
        self.check_kill_switch().await?;
        self.limiter.acquire().await;

        let (text, metrics) = self.provider.generate(model, prompt).await?;
        self.record_usage(metrics.total_tokens).await;

        Ok((text, metrics))
    }

    /// Generate and JSON-parse, stripping a markdown code fence if present.
    pub async fn generate_json(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<(serde_json::Value, CallMetrics), LlmError> {
        let (text, metrics) = self.generate(model, prompt).await?;
        let value = Self::parse_json(&text)?;
        Ok((value, metrics))
    }

    /// Strip a ```json fence wrapper and parse.
    pub fn parse_json(raw: &str) -> Result<serde_json::Value, LlmError> {
        let stripped = Self::strip_code_fence(raw);
        serde_json::from_str(stripped).map_err(|e| {
            LlmError::Validation(format!(
                "JSON parse failed: {e}; prefix: {}",
                stripped.chars().take(120).collect::<String>()
            ))
        })
    }

    pub fn strip_code_fence(raw: &str) -> &str {
        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_suffix("```").unwrap_or(rest);
        rest.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::param_store::MemoryParamStore;

    struct ScriptedProvider {
        response: String,
        tokens: u64,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> Result<(String, CallMetrics), LlmError> {
            Ok((
                self.response.clone(),
                CallMetrics {
                    prompt_tokens: self.tokens / 2,
                    completion_tokens: self.tokens / 2,
                    total_tokens: self.tokens,
                    response_time_ms: 5,
                },
            ))
        }
    }

    fn client(tokens: u64, store: Arc<MemoryParamStore>, enforce: bool) -> LlmClient {
        LlmClient::new(
            Arc::new(ScriptedProvider {
                response: "{\"ok\": true}".to_string(),
                tokens,
            }),
            store,
            60,
            "/test/kill".to_string(),
            "/test/tokens".to_string(),
            1_000,
            enforce,
        )
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(
            LlmClient::strip_code_fence("```json\n{\"a\": 1}\n```"),
            "{\"a\": 1}"
        );
        assert_eq!(LlmClient::strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(LlmClient::strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_json_failure_is_validation_error() {
        let err = LlmClient::parse_json("definitely not json").unwrap_err();
        assert!(matches!(err, LlmError::Validation(_)));
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_calls() {
        let store = Arc::new(MemoryParamStore::new());
        store.put("/test/kill", " TRUE ").await.unwrap();
        let client = client(10, store, true);

        let err = client.generate("m", "p").await.unwrap_err();
        assert!(matches!(err, LlmError::KillSwitch));
    }

    #[tokio::test]
    async fn test_kill_switch_false_allows_calls() {
        let store = Arc::new(MemoryParamStore::new());
        store.put("/test/kill", "false").await.unwrap();
        let client = client(10, store, true);
        assert!(client.generate("m", "p").await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_accumulates_and_trips_switch() {
        let store = Arc::new(MemoryParamStore::new());
        let client = client(600, store.clone(), true);

        client.generate("m", "p").await.unwrap();
        assert_eq!(store.get("/test/tokens").await.unwrap().as_deref(), Some("600"));
        assert_eq!(store.get("/test/kill").await.unwrap(), None);

        // second call crosses the 1_000 limit
        client.generate("m", "p").await.unwrap();
        assert_eq!(
            store.get("/test/tokens").await.unwrap().as_deref(),
            Some("1200")
        );
        assert_eq!(store.get("/test/kill").await.unwrap().as_deref(), Some("true"));

        // and the third call is refused
        let err = client.generate("m", "p").await.unwrap_err();
        assert!(matches!(err, LlmError::KillSwitch));
    }

    #[tokio::test]
    async fn test_development_mode_skips_budget() {
        let store = Arc::new(MemoryParamStore::new());
        store.put("/test/kill", "true").await.unwrap();
        let client = client(600, store.clone(), false);

        // kill switch ignored, nothing recorded
        assert!(client.generate("m", "p").await.is_ok());
        assert_eq!(store.get("/test/tokens").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_limiter_blocks_at_capacity() {
        let limiter = RpmLimiter::new(2);
        let t0 = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(t0.elapsed() < Duration::from_secs(1));

        limiter.acquire().await;
        assert!(t0.elapsed() >= Duration::from_secs(60));
        assert!(limiter.current_usage().await <= 2);
    }
}
