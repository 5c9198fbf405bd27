//! Per-host request pacing
//!
//! Two limits per hostname, both enforced under a per-host lock:
//! a minimum interval between admissions and a sliding 60-second RPM
//! window. Callers may be concurrent; admissions for the same host are
//! serialized, different hosts proceed independently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// (minimum interval, max requests per minute) for one hostname.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleRule {
    pub min_interval: Duration,
    pub max_rpm: usize,
}

impl ThrottleRule {
    pub const fn new(min_interval_ms: u64, max_rpm: usize) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            max_rpm,
        }
    }
}

const DEFAULT_RULE: ThrottleRule = ThrottleRule::new(1_000, 30);

/// Known-host rule table. Subdomain suffix matching applies, so
/// `entertain.naver.example` picks up the `naver.example` rule.
fn default_rules() -> Vec<(String, ThrottleRule)> {
    [
        ("news.tenasia.example", ThrottleRule::new(1_000, 30)),
        ("naver.example", ThrottleRule::new(500, 60)),
        ("daum.example", ThrottleRule::new(800, 40)),
        ("youtube.com", ThrottleRule::new(1_000, 30)),
        ("instagram.com", ThrottleRule::new(2_000, 15)),
        ("x.com", ThrottleRule::new(2_000, 15)),
        ("twitter.com", ThrottleRule::new(2_000, 15)),
    ]
    .into_iter()
    .map(|(h, r)| (h.to_string(), r))
    .collect()
}

#[derive(Debug)]
struct HostState {
    last_admission: Option<Instant>,
    window: VecDeque<Instant>,
}

/// Per-host snapshot for operational logging.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HostStats {
    pub requests_last_60s: usize,
    pub seconds_since_last: Option<f64>,
}

/// Domain throttle shared by every HTTP caller in the process.
pub struct DomainThrottle {
    rules: Vec<(String, ThrottleRule)>,
    default_rule: ThrottleRule,
    hosts: DashMap<String, Arc<Mutex<HostState>>>,
}

impl DomainThrottle {
    pub fn new() -> Self {
        Self::with_rules(default_rules(), DEFAULT_RULE)
    }

    pub fn with_rules(rules: Vec<(String, ThrottleRule)>, default_rule: ThrottleRule) -> Self {
        Self {
            rules,
            default_rule,
            hosts: DashMap::new(),
        }
    }

    fn extract_host(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default()
    }

    fn rule_for(&self, host: &str) -> ThrottleRule {
        for (key, rule) in &self.rules {
            if host == key || host.ends_with(&format!(".{key}")) {
                return *rule;
            }
        }
        self.default_rule
    }

    fn host_state(&self, host: &str) -> Arc<Mutex<HostState>> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(HostState {
                    last_admission: None,
                    window: VecDeque::new(),
                }))
            })
            .clone()
    }

    /// Block until a request to `url`'s host is admissible, then record the
    /// admission. The per-host lock is held across the waits so concurrent
    /// callers for one host queue up behind each other.
    pub async fn wait(&self, url: &str) {
        let host = Self::extract_host(url);
        let rule = self.rule_for(&host);
        let state = self.host_state(&host);

        let mut guard = state.lock().await;

        // Minimum interval since the previous admission
        if let Some(last) = guard.last_admission {
            let elapsed = last.elapsed();
            if elapsed < rule.min_interval {
                let wait = rule.min_interval - elapsed;
                tracing::debug!(host = %host, wait_ms = wait.as_millis() as u64, "interval wait");
                tokio::time::sleep(wait).await;
            }
        }

        // Sliding-window RPM
        loop {
            let now = Instant::now();
            while let Some(front) = guard.window.front() {
                if now.duration_since(*front) >= WINDOW {
                    guard.window.pop_front();
                } else {
                    break;
                }
            }

            if guard.window.len() < rule.max_rpm {
                break;
            }

            let oldest = *guard.window.front().expect("window is non-empty");
            let wait = WINDOW.saturating_sub(now.duration_since(oldest)) + SAFETY_MARGIN;
            tracing::debug!(
                host = %host,
                rpm = rule.max_rpm,
                wait_ms = wait.as_millis() as u64,
                "rpm wait"
            );
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        guard.window.push_back(now);
        guard.last_admission = Some(now);
    }

    /// Current per-host request statistics.
    pub async fn stats(&self) -> std::collections::HashMap<String, HostStats> {
        let mut out = std::collections::HashMap::new();
        for entry in self.hosts.iter() {
            let state = entry.value().lock().await;
            let now = Instant::now();
            let recent = state
                .window
                .iter()
                .filter(|t| now.duration_since(**t) < WINDOW)
                .count();
            out.insert(
                entry.key().clone(),
                HostStats {
                    requests_last_60s: recent,
                    seconds_since_last: state
                        .last_admission
                        .map(|t| t.elapsed().as_secs_f64()),
                },
            );
        }
        out
    }
}

impl Default for DomainThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(min_interval_ms: u64, max_rpm: usize) -> DomainThrottle {
        DomainThrottle::with_rules(vec![], ThrottleRule::new(min_interval_ms, max_rpm))
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(
            DomainThrottle::extract_host("https://News.Example.com/a/1?x=1"),
            "news.example.com"
        );
        assert_eq!(DomainThrottle::extract_host("not a url"), "");
    }

    #[test]
    fn test_subdomain_suffix_matching() {
        let t = DomainThrottle::new();
        let rule = t.rule_for("entertain.naver.example");
        assert_eq!(rule.max_rpm, 60);
        let rule = t.rule_for("naver.example");
        assert_eq!(rule.max_rpm, 60);
        // unrelated host falls back to the default
        let rule = t.rule_for("blog.example.org");
        assert_eq!(rule.max_rpm, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_admissions() {
        let t = throttle(1_000, 1_000);
        let url = "https://host-a.example/x";

        let t0 = Instant::now();
        t.wait(url).await;
        t.wait(url).await;
        t.wait(url).await;
        let elapsed = t0.elapsed();

        // three admissions need at least two full intervals
        assert!(elapsed >= Duration::from_millis(2_000), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpm_window_blocks_excess() {
        let t = throttle(0, 3);
        let url = "https://host-b.example/x";

        let t0 = Instant::now();
        for _ in 0..3 {
            t.wait(url).await;
        }
        // the window is full; the 4th admission must wait ~60s
        t.wait(url).await;
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");

        let stats = t.stats().await;
        let hs = stats.get("host-b.example").unwrap();
        assert!(hs.requests_last_60s <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let t = throttle(5_000, 100);

        let t0 = Instant::now();
        t.wait("https://host-c.example/x").await;
        t.wait("https://host-d.example/x").await;
        // different hosts: no interval applies between them
        assert!(t0.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_interval() {
        let t = Arc::new(throttle(500, 1_000));
        let url = "https://host-e.example/x";

        let t0 = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let t = t.clone();
            handles.push(tokio::spawn(async move {
                t.wait(url).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // four admissions across concurrent tasks still need three intervals
        assert!(t0.elapsed() >= Duration::from_millis(1_500));
    }
}
