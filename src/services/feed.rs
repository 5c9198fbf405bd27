//! Feed discovery
//!
//! Candidate article URLs come from the site RSS feed first (RSS 2.0 or
//! Atom, parsed prefix-independently by feed-rs) and from paginated list
//! pages when the feed does not reach far enough back. Entries without a
//! parseable date are kept as candidates; the per-article date is
//! re-checked during scraping.

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use url::Url;

use crate::services::fetcher::PoliteFetcher;
use crate::services::parser::ArticleParser;

/// One article candidate from the feed or a list page.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub rss_url: String,
    pub list_base_url: String,
    pub list_path: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            rss_url: "https://news.tenasia.example/rss/allnews.rss".to_string(),
            list_base_url: "https://news.tenasia.example".to_string(),
            list_path: "/all".to_string(),
        }
    }
}

/// List-page link selectors, tried in order; the first selector that yields
/// links wins.
const LIST_PAGE_SELECTORS: &[&str] = &[
    "article.news-item a",
    ".article-list a",
    ".news_list li a",
    "ul.list_news li a",
    ".content_list .item a",
    "div.list_area a",
];

pub struct FeedDiscovery<'a> {
    fetcher: &'a PoliteFetcher,
    config: FeedConfig,
}

impl<'a> FeedDiscovery<'a> {
    pub fn new(fetcher: &'a PoliteFetcher, config: FeedConfig) -> Self {
        Self { fetcher, config }
    }

    // ── RSS ──────────────────────────────────────────────────

    /// Fetch and parse the RSS/Atom feed. Failures yield an empty list so
    /// callers can fall back to list pages.
    pub async fn fetch_rss(&self) -> Vec<FeedEntry> {
        if self.config.rss_url.is_empty() {
            return Vec::new();
        }

        let body = match self.fetcher.get_quiet(&self.config.rss_url).await {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(url = %self.config.rss_url, error = %e, "rss body read failed");
                    return Vec::new();
                }
            },
            Ok(resp) => {
                tracing::warn!(url = %self.config.rss_url, status = resp.status().as_u16(), "rss fetch failed");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(url = %self.config.rss_url, error = %e, "rss fetch error");
                return Vec::new();
            }
        };

        let entries = Self::parse_feed(&body);
        tracing::info!(url = %self.config.rss_url, count = entries.len(), "rss fetched");
        entries
    }

    /// Parse RSS 2.0 `<item>` / Atom `<entry>` nodes into candidates.
    pub fn parse_feed(bytes: &[u8]) -> Vec<FeedEntry> {
        let feed = match feed_rs::parser::parse(bytes) {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(error = %e, "feed parse failed");
                return Vec::new();
            }
        };

        feed.entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.trim().to_string())
                    .filter(|u| !u.is_empty())?;
                Some(FeedEntry {
                    url,
                    title: entry.title.map(|t| t.content).unwrap_or_default(),
                    published_at: entry.published.or(entry.updated),
                })
            })
            .collect()
    }

    // ── list pages ───────────────────────────────────────────

    fn list_page_url(&self, page: u32) -> String {
        let base = format!("{}{}", self.config.list_base_url, self.config.list_path);
        if page > 1 {
            format!("{base}?page={page}")
        } else {
            base
        }
    }

    /// Extract candidate URLs (+ nearby dates) from one list page.
    pub async fn fetch_list_page(&self, page: u32) -> Vec<FeedEntry> {
        let url = self.list_page_url(page);

        let html = match self.fetcher.get_quiet(&url).await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(url, error = %e, "list page body read failed");
                    return Vec::new();
                }
            },
            Ok(resp) => {
                tracing::warn!(url, status = resp.status().as_u16(), "list page fetch failed");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "list page fetch error");
                return Vec::new();
            }
        };

        let entries = Self::parse_list_page(&html, &self.config.list_base_url);
        tracing::info!(page, count = entries.len(), "list page fetched");
        entries
    }

    pub fn parse_list_page(html: &str, base_url: &str) -> Vec<FeedEntry> {
        let doc = Html::parse_document(html);
        let article_pattern = Regex::new(r"/article[s]?/|\d{8,}").unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut entries = Vec::new();

        for selector in LIST_PAGE_SELECTORS {
            let sel = Selector::parse(selector).unwrap();
            let links: Vec<ElementRef> = doc.select(&sel).collect();
            if links.is_empty() {
                continue;
            }

            for link in links {
                let Some(href) = link.value().attr("href").map(str::trim) else {
                    continue;
                };
                if href.is_empty() {
                    continue;
                }
                let href = Self::absolutize(href, base_url);
                if !article_pattern.is_match(&href) || !seen.insert(href.clone()) {
                    continue;
                }
                entries.push(FeedEntry {
                    title: link.text().collect::<String>().trim().to_string(),
                    published_at: Self::date_near(link),
                    url: href,
                });
            }

            if !entries.is_empty() {
                break;
            }
        }

        // fallback: any <a> with an article-shaped href
        if entries.is_empty() {
            let sel = Selector::parse("a[href]").unwrap();
            let fallback_pattern = Regex::new(r"/article[s]?/|\d{10,}").unwrap();
            for link in doc.select(&sel) {
                let href = link.value().attr("href").unwrap_or_default().trim();
                if href.is_empty() {
                    continue;
                }
                let href = Self::absolutize(href, base_url);
                if fallback_pattern.is_match(&href) && seen.insert(href.clone()) {
                    entries.push(FeedEntry {
                        title: link.text().collect::<String>().trim().to_string(),
                        published_at: None,
                        url: href,
                    });
                }
            }
        }

        entries
    }

    fn absolutize(href: &str, base_url: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        Url::parse(base_url)
            .ok()
            .and_then(|base| base.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| href.to_string())
    }

    /// Probe up to three ancestors of a link for a `<time datetime>` or a
    /// `.date`/`.time` element.
    fn date_near(link: ElementRef) -> Option<DateTime<Utc>> {
        let time_sel = Selector::parse("time").unwrap();
        let class_pattern = Regex::new(r"(?i)\b(date|time)\b").unwrap();

        let mut node = link.parent();
        for _ in 0..3 {
            let current = node?;
            if let Some(el) = ElementRef::wrap(current) {
                if let Some(time_el) = el.select(&time_sel).next() {
                    let raw = time_el
                        .value()
                        .attr("datetime")
                        .map(str::to_string)
                        .unwrap_or_else(|| time_el.text().collect::<String>());
                    if let Some(dt) = ArticleParser::parse_datetime(raw.trim()) {
                        return Some(dt);
                    }
                }

                for candidate in el.children().filter_map(ElementRef::wrap) {
                    let classes = candidate.value().attr("class").unwrap_or_default();
                    if class_pattern.is_match(classes) {
                        let raw: String = candidate.text().collect();
                        if let Some(dt) = ArticleParser::parse_datetime(raw.trim()) {
                            return Some(dt);
                        }
                    }
                }
            }
            node = current.parent();
        }

        None
    }

    // ── combined collection ──────────────────────────────────

    /// Collect candidates from RSS plus, when RSS does not reach back to
    /// `start`, paginated list pages. Pagination stops early once a page's
    /// oldest dated entry precedes `start`.
    pub async fn collect_entries(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        max_pages: u32,
    ) -> Vec<FeedEntry> {
        let mut entries: Vec<FeedEntry> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for entry in self.fetch_rss().await {
            if seen.insert(entry.url.clone()) {
                entries.push(entry);
            }
        }

        if Self::needs_list_pages(&entries, start) {
            for page in 1..=max_pages {
                let page_entries = self.fetch_list_page(page).await;
                if page_entries.is_empty() {
                    break;
                }

                let mut added = false;
                for entry in &page_entries {
                    if seen.insert(entry.url.clone()) {
                        entries.push(entry.clone());
                        added = true;
                    }
                }

                let page_oldest = page_entries.iter().filter_map(|e| e.published_at).min();
                if let (Some(oldest), Some(start)) = (page_oldest, start) {
                    if oldest < start {
                        break;
                    }
                }
                if !added {
                    break;
                }
            }
        }

        let filtered = Self::filter_by_range(entries, start, end);
        tracing::info!(total = filtered.len(), "feed entries collected");
        filtered
    }

    /// List pages are needed when a start bound is set and the feed is
    /// either empty or its oldest entry is still newer than the bound.
    pub fn needs_list_pages(entries: &[FeedEntry], start: Option<DateTime<Utc>>) -> bool {
        let Some(start) = start else {
            return false;
        };
        if entries.is_empty() {
            return true;
        }
        match entries.iter().filter_map(|e| e.published_at).min() {
            Some(oldest) => oldest > start,
            None => false,
        }
    }

    /// Drop dated entries outside [start, end]; undated entries survive for
    /// the per-article recheck.
    pub fn filter_by_range(
        entries: Vec<FeedEntry>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<FeedEntry> {
        if start.is_none() && end.is_none() {
            return entries;
        }
        entries
            .into_iter()
            .filter(|e| match e.published_at {
                Some(pa) => {
                    start.map_or(true, |s| pa >= s) && end.map_or(true, |en| pa <= en)
                }
                None => true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS_SAMPLE: &[u8] = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>K-News</title>
    <item>
      <title>첫 번째 기사</title>
      <link>https://news.tenasia.example/article/1001</link>
      <pubDate>Tue, 10 Feb 2026 09:00:00 +0900</pubDate>
    </item>
    <item>
      <title>두 번째 기사</title>
      <link>https://news.tenasia.example/article/1002</link>
      <pubDate>Mon, 09 Feb 2026 09:00:00 +0900</pubDate>
    </item>
  </channel>
</rss>"#.as_bytes();

    const ATOM_SAMPLE: &[u8] = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>K-News Atom</title>
  <entry>
    <title>아톰 기사</title>
    <link href="https://news.tenasia.example/article/2001"/>
    <published>2026-02-08T03:00:00Z</published>
  </entry>
</feed>"#.as_bytes();

    #[test]
    fn test_parse_rss_items() {
        let entries = FeedDiscovery::parse_feed(RSS_SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://news.tenasia.example/article/1001");
        assert_eq!(entries[0].title, "첫 번째 기사");
        assert_eq!(
            entries[0].published_at.unwrap().to_rfc3339(),
            "2026-02-10T00:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_atom_entries() {
        let entries = FeedDiscovery::parse_feed(ATOM_SAMPLE);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://news.tenasia.example/article/2001");
        assert!(entries[0].published_at.is_some());
    }

    #[test]
    fn test_parse_garbage_feed_is_empty() {
        assert!(FeedDiscovery::parse_feed(b"not xml at all").is_empty());
    }

    #[test]
    fn test_list_page_selector_and_pattern() {
        let html = r#"<html><body><ul class="news_list">
            <li><a href="/article/3001">기사 링크</a><span class="date">2026.02.07</span></li>
            <li><a href="/about">소개 페이지</a></li>
            <li><a href="/article/3001">중복 링크</a></li>
        </ul></body></html>"#;
        let entries =
            FeedDiscovery::parse_list_page(html, "https://news.tenasia.example");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://news.tenasia.example/article/3001");
        assert_eq!(
            entries[0].published_at.unwrap().to_rfc3339(),
            "2026-02-07T00:00:00+00:00"
        );
    }

    #[test]
    fn test_list_page_anchor_fallback() {
        let html = r#"<html><body>
            <a href="https://news.tenasia.example/article/4001">폴백 기사</a>
        </body></html>"#;
        let entries =
            FeedDiscovery::parse_list_page(html, "https://news.tenasia.example");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "https://news.tenasia.example/article/4001");
    }

    fn entry(url: &str, at: Option<&str>) -> FeedEntry {
        FeedEntry {
            url: url.to_string(),
            title: String::new(),
            published_at: at.map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .unwrap()
                    .with_timezone(&Utc)
            }),
        }
    }

    #[test]
    fn test_filter_by_range_keeps_undated() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 59).unwrap();
        let entries = vec![
            entry("https://a/1", Some("2026-02-10T00:00:00Z")),
            entry("https://a/2", Some("2026-01-20T00:00:00Z")),
            entry("https://a/3", None),
            entry("https://a/4", Some("2026-03-01T00:00:00Z")),
        ];
        let kept = FeedDiscovery::filter_by_range(entries, Some(start), Some(end));
        let urls: Vec<&str> = kept.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/1", "https://a/3"]);
    }

    #[test]
    fn test_needs_list_pages() {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        // RSS reaches past the start bound → no list pages
        let covered = vec![entry("https://a/1", Some("2026-01-15T00:00:00Z"))];
        assert!(!FeedDiscovery::needs_list_pages(&covered, Some(start)));
        // RSS too recent → paginate
        let shallow = vec![entry("https://a/1", Some("2026-02-20T00:00:00Z"))];
        assert!(FeedDiscovery::needs_list_pages(&shallow, Some(start)));
        // empty feed → paginate
        assert!(FeedDiscovery::needs_list_pages(&[], Some(start)));
        // no bound → never
        assert!(!FeedDiscovery::needs_list_pages(&shallow, None));
    }
}
