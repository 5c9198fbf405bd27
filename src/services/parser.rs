//! Site article parser
//!
//! Extraction is layered: embedded JSON-LD (`Article`/`NewsArticle`) is the
//! most reliable source, then OpenGraph/Twitter-Card meta tags, then
//! site-specific CSS selectors, then generic HTML fallbacks. The
//! representative image comes only from OG/Twitter meta; inline `<img>`
//! tags are enumerated separately for the image pipeline and never promoted
//! to the thumbnail.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::ScrapeError;

/// Tags whose subtrees never contribute body text: media first, then
/// layout/script noise.
const SKIP_TAGS: &[&str] = &[
    // media
    "img", "figure", "picture", "video", "audio", "source", "track", "iframe", "embed", "object",
    "canvas", "svg",
    // noise
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "button", "select",
    "input", "textarea", "ins",
];

const TITLE_SELECTORS: &[&str] = &[
    "h1.article-title",
    "h1.headline",
    "h1[itemprop='headline']",
    ".article_title h1",
    ".news_tit",
    "h1",
];

const CONTENT_SELECTORS: &[&str] = &[
    "div.article-body",
    "div.article_view",
    "div#article_body",
    "div#articleBody",
    "section.article-content",
    "div[itemprop='articleBody']",
    "div.news_cnt_detail_wrap",
    "div.article_txt",
];

const AUTHOR_SELECTORS: &[&str] = &[
    "[itemprop='author'] [itemprop='name']",
    ".reporter_name",
    ".article_info .name",
    "span.reporter",
    "em.reporter",
    ".byline .name",
    "meta[name='author']",
];

const DATE_SELECTORS: &[&str] = &[
    "time[datetime]",
    "[itemprop='datePublished']",
    "meta[property='article:published_time']",
    ".article_date time",
    ".date",
    "span.date_info",
];

fn boilerplate_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"무단\s*전재\s*(?:및\s*)?재배포\s*금지",
            r"저작권자\s*[©ⓒ(c)]*\s*[\w가-힣\s]+,?\s*무단",
            r"(?i)Copyright\s*[©ⓒ]?\s*[\w\s]+\.\s*All\s+Rights\s+Reserved",
            r"기사\s*제보\s*:\s*[\w@.\-]+",
            r"\[[\w가-힣\s]+\s*기자\]",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

/// Result of parsing one article page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedArticle {
    pub title_ko: String,
    pub content_ko: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// From `og:image` / `twitter:image` only.
    pub thumbnail_url: Option<String>,
    /// Inline `(url, alt)` pairs in document order, deduplicated by URL.
    pub image_urls: Vec<(String, Option<String>)>,
}

pub struct ArticleParser;

impl ArticleParser {
    /// Parse an article page. Fails only when no title can be recovered.
    pub fn parse(url: &str, raw_html: &str) -> Result<ParsedArticle, ScrapeError> {
        let doc = Html::parse_document(raw_html);

        let ld = Self::extract_ld_json(&doc);
        let og = Self::extract_meta(&doc);

        let thumbnail_url = Self::extract_thumbnail(&og);
        let image_urls = Self::extract_image_urls(&doc);

        let title_ko = Self::extract_title(&doc, &ld, &og).ok_or_else(|| ScrapeError::Parse {
            url: url.to_string(),
        })?;
        let content_ko = Self::extract_content(&doc, &ld);
        let author = Self::extract_author(&doc, &ld, &og);
        let published_at = Self::extract_published_at(&doc, &ld, &og);

        tracing::debug!(
            url,
            title = %title_ko.chars().take(50).collect::<String>(),
            content_len = content_ko.as_deref().map(str::len).unwrap_or(0),
            has_author = author.is_some(),
            has_date = published_at.is_some(),
            "parsed"
        );

        Ok(ParsedArticle {
            title_ko,
            content_ko,
            author,
            published_at,
            thumbnail_url,
            image_urls,
        })
    }

    // ── structured data ──────────────────────────────────────

    /// First JSON-LD block whose `@type` matches Article/NewsArticle
    /// (case-insensitive); arrays of candidates are flattened.
    fn extract_ld_json(doc: &Html) -> serde_json::Value {
        let selector = Selector::parse("script[type='application/ld+json']").unwrap();
        let mut candidates: Vec<serde_json::Value> = Vec::new();

        for script in doc.select(&selector) {
            let raw: String = script.text().collect();
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(serde_json::Value::Array(items)) => candidates.extend(items),
                Ok(value @ serde_json::Value::Object(_)) => candidates.push(value),
                _ => continue,
            }
        }

        for candidate in &candidates {
            let dtype = match candidate.get("@type") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
                _ => String::new(),
            };
            if dtype.to_lowercase().contains("article") {
                return candidate.clone();
            }
        }

        candidates.into_iter().next().unwrap_or_default()
    }

    /// All `<meta>` property/name → content pairs (OG, Twitter Card, author).
    fn extract_meta(doc: &Html) -> HashMap<String, String> {
        let selector = Selector::parse("meta").unwrap();
        let mut meta = HashMap::new();
        for tag in doc.select(&selector) {
            let key = tag
                .value()
                .attr("property")
                .or_else(|| tag.value().attr("name"))
                .unwrap_or_default();
            let content = tag.value().attr("content").unwrap_or_default().trim();
            if !key.is_empty() && !content.is_empty() {
                meta.insert(key.to_string(), content.to_string());
            }
        }
        meta
    }

    fn extract_thumbnail(og: &HashMap<String, String>) -> Option<String> {
        og.get("og:image")
            .or_else(|| og.get("twitter:image"))
            .cloned()
    }

    // ── field extraction ─────────────────────────────────────

    fn extract_title(
        doc: &Html,
        ld: &serde_json::Value,
        og: &HashMap<String, String>,
    ) -> Option<String> {
        for key in ["headline", "name"] {
            if let Some(headline) = ld.get(key).and_then(|v| v.as_str()) {
                let headline = headline.trim();
                if !headline.is_empty() {
                    return Some(headline.to_string());
                }
            }
        }

        if let Some(title) = og.get("og:title") {
            return Some(title.trim().to_string());
        }

        for selector in TITLE_SELECTORS {
            let sel = Selector::parse(selector).unwrap();
            if let Some(el) = doc.select(&sel).next() {
                let text = Self::element_text(el);
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }

        // <title> fallback, site-name suffix split off
        let sel = Selector::parse("title").unwrap();
        if let Some(el) = doc.select(&sel).next() {
            let raw = Self::element_text(el);
            let split = Regex::new(r"\s*[|·—]\s*").unwrap();
            let first = split.split(&raw).next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }

        None
    }

    fn extract_author(
        doc: &Html,
        ld: &serde_json::Value,
        og: &HashMap<String, String>,
    ) -> Option<String> {
        let from_ld = match ld.get("author") {
            Some(serde_json::Value::Object(obj)) => {
                obj.get("name").and_then(|v| v.as_str()).map(str::to_string)
            }
            Some(serde_json::Value::Array(items)) => items
                .first()
                .and_then(|v| v.get("name"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        };
        if let Some(name) = from_ld {
            let name = name.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }

        if let Some(author) = og.get("author") {
            return Some(author.trim().to_string());
        }

        let reporter_suffix = Regex::new(r"\s*기자$").unwrap();
        for selector in AUTHOR_SELECTORS {
            let sel = Selector::parse(selector).unwrap();
            let Some(el) = doc.select(&sel).next() else {
                continue;
            };
            let value = if el.value().name() == "meta" {
                el.value().attr("content").unwrap_or_default().to_string()
            } else {
                Self::element_text(el)
            };
            let value = reporter_suffix.replace(&value, "").trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }

        None
    }

    fn extract_published_at(
        doc: &Html,
        ld: &serde_json::Value,
        og: &HashMap<String, String>,
    ) -> Option<DateTime<Utc>> {
        for key in ["datePublished", "dateCreated"] {
            if let Some(raw) = ld.get(key).and_then(|v| v.as_str()) {
                if let Some(dt) = Self::parse_datetime(raw) {
                    return Some(dt);
                }
            }
        }

        for key in ["article:published_time", "article:published_date", "pubdate"] {
            if let Some(raw) = og.get(key) {
                if let Some(dt) = Self::parse_datetime(raw) {
                    return Some(dt);
                }
            }
        }

        for selector in DATE_SELECTORS {
            let sel = Selector::parse(selector).unwrap();
            let Some(el) = doc.select(&sel).next() else {
                continue;
            };
            let raw = el
                .value()
                .attr("datetime")
                .or_else(|| el.value().attr("content"))
                .map(str::to_string)
                .unwrap_or_else(|| Self::element_text(el));
            if let Some(dt) = Self::parse_datetime(&raw) {
                return Some(dt);
            }
        }

        None
    }

    fn extract_content(doc: &Html, ld: &serde_json::Value) -> Option<String> {
        if let Some(body) = ld.get("articleBody").and_then(|v| v.as_str()) {
            let cleaned = Self::clean_text(body);
            if cleaned.chars().count() >= 50 {
                return Some(cleaned);
            }
        }

        let mut container: Option<ElementRef> = None;
        for selector in CONTENT_SELECTORS {
            let sel = Selector::parse(selector).unwrap();
            container = doc.select(&sel).next();
            if container.is_some() {
                break;
            }
        }
        if container.is_none() {
            let sel = Selector::parse("article").unwrap();
            container = doc.select(&sel).next();
        }
        let container = container?;

        // Paragraph structure: direct-child p/div only, short UI strings
        // filtered out.
        let mut paragraphs: Vec<String> = Vec::new();
        for child in container.children() {
            let Some(el) = ElementRef::wrap(child) else {
                continue;
            };
            let name = el.value().name();
            if name != "p" && name != "div" {
                continue;
            }
            let text = Self::element_text(el);
            if text.chars().count() >= 15 {
                paragraphs.push(text);
            }
        }

        let raw = if paragraphs.is_empty() {
            Self::element_text(container)
        } else {
            paragraphs.join("\n\n")
        };

        let cleaned = Self::clean_text(&raw);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Inline `(url, alt)` pairs. Lazy-loading attributes are tried in
    /// order; only absolute http(s) URLs are kept; first occurrence wins.
    fn extract_image_urls(doc: &Html) -> Vec<(String, Option<String>)> {
        let sel = Selector::parse("img").unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut results = Vec::new();

        for img in doc.select(&sel) {
            let mut url = "";
            for attr in ["src", "data-src", "data-lazy-src", "data-original"] {
                if let Some(candidate) = img.value().attr(attr) {
                    let candidate = candidate.trim();
                    if !candidate.is_empty() {
                        url = candidate;
                        break;
                    }
                }
            }

            if !url.starts_with("http") || !seen.insert(url.to_string()) {
                continue;
            }

            let alt = img
                .value()
                .attr("alt")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            results.push((url.to_string(), alt));
        }

        results
    }

    // ── text helpers ─────────────────────────────────────────

    /// Descendant text with media/noise subtrees skipped, whitespace
    /// collapsed.
    fn element_text(el: ElementRef) -> String {
        let mut out = String::new();
        Self::collect_text(el, &mut out);
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn collect_text(el: ElementRef, out: &mut String) {
        for child in el.children() {
            if let Some(text) = child.value().as_text() {
                out.push_str(text);
            } else if let Some(child_el) = ElementRef::wrap(child) {
                if !SKIP_TAGS.contains(&child_el.value().name()) {
                    Self::collect_text(child_el, out);
                    out.push(' ');
                }
            }
        }
    }

    /// Collapse runs of whitespace and strip Korean news boilerplate.
    pub fn clean_text(text: &str) -> String {
        let mut text = Regex::new(r"[ \t]+").unwrap().replace_all(text, " ").to_string();
        text = Regex::new(r"\n{3,}").unwrap().replace_all(&text, "\n\n").to_string();
        for pattern in boilerplate_patterns() {
            text = pattern.replace_all(&text, "").to_string();
        }
        text.trim().to_string()
    }

    // ── date parsing ─────────────────────────────────────────

    const DATETIME_FORMATS: &'static [&'static str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
        "%Y/%m/%d %H:%M",
    ];

    const DATE_FORMATS: &'static [&'static str] = &["%Y.%m.%d", "%Y-%m-%d"];

    /// Parse the fixed set of accepted date shapes. Korean-form dates
    /// (`2024년 1월 15일`) are normalized by regex pre-substitution; a
    /// generic RFC 2822 parse is tried last.
    pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        let korean = Regex::new(r"(\d{4})년\s*(\d{1,2})월\s*(\d{1,2})일").unwrap();
        let value = korean
            .replace(value, |caps: &regex::Captures| {
                format!(
                    "{}-{:02}-{:02}",
                    &caps[1],
                    caps[2].parse::<u32>().unwrap_or(1),
                    caps[3].parse::<u32>().unwrap_or(1)
                )
            })
            .to_string();

        // ISO 8601 with offset (or trailing Z)
        if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
            return Some(dt.with_timezone(&Utc));
        }

        for fmt in Self::DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(&value, fmt) {
                return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
            }
        }

        for fmt in Self::DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(&value, fmt) {
                let dt = d.and_hms_opt(0, 0, 0)?;
                return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
            }
        }

        // opportunistic generic parse
        if let Ok(dt) = DateTime::parse_from_rfc2822(&value) {
            return Some(dt.with_timezone(&Utc));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LD_JSON_PAGE: &str = r#"<html><head>
        <script type="application/ld+json">
        {"@type": "NewsArticle",
         "headline": "아이유, 새 앨범 발표",
         "articleBody": "가수 아이유가 새 앨범을 발표했다. 소속사에 따르면 다음 달 발매될 예정이며 타이틀곡은 아직 공개되지 않았다.",
         "author": {"name": "홍길동"},
         "datePublished": "2026-02-10T09:30:00+09:00"}
        </script>
        <meta property="og:image" content="https://img.example/rep.jpg" />
        </head><body><h1>무시되는 제목</h1></body></html>"#;

    #[test]
    fn test_ld_json_takes_precedence() {
        let parsed = ArticleParser::parse("https://news.example/a/1", LD_JSON_PAGE).unwrap();
        assert_eq!(parsed.title_ko, "아이유, 새 앨범 발표");
        assert_eq!(parsed.author.as_deref(), Some("홍길동"));
        assert_eq!(
            parsed.thumbnail_url.as_deref(),
            Some("https://img.example/rep.jpg")
        );
        let dt = parsed.published_at.unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-10T00:30:00+00:00");
        assert!(parsed.content_ko.unwrap().starts_with("가수 아이유"));
    }

    #[test]
    fn test_og_fallback_when_no_ld() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG 제목입니다" />
            <meta property="article:published_time" content="2026-01-05T12:00:00Z" />
            <meta name="author" content="김기자" />
            <meta property="twitter:image" content="https://img.example/tw.jpg" />
            </head><body></body></html>"#;
        let parsed = ArticleParser::parse("https://news.example/a/2", html).unwrap();
        assert_eq!(parsed.title_ko, "OG 제목입니다");
        assert_eq!(parsed.author.as_deref(), Some("김기자"));
        assert_eq!(
            parsed.thumbnail_url.as_deref(),
            Some("https://img.example/tw.jpg")
        );
    }

    #[test]
    fn test_css_selector_fallback() {
        let html = r#"<html><body>
            <h1 class="article-title">셀렉터로 찾은 제목</h1>
            <span class="reporter">박뉴스 기자</span>
            <div class="article-body">
              <p>본문 첫 단락입니다. 충분히 긴 텍스트가 들어가 있습니다.</p>
              <p>짧음</p>
              <p>본문 둘째 단락도 충분히 길게 작성되어 있습니다.</p>
            </div>
            </body></html>"#;
        let parsed = ArticleParser::parse("https://news.example/a/3", html).unwrap();
        assert_eq!(parsed.title_ko, "셀렉터로 찾은 제목");
        // "기자" suffix stripped
        assert_eq!(parsed.author.as_deref(), Some("박뉴스"));
        let content = parsed.content_ko.unwrap();
        assert!(content.contains("첫 단락"));
        assert!(content.contains("둘째 단락"));
        assert!(!content.contains("짧음"));
    }

    #[test]
    fn test_missing_title_is_parse_error() {
        let err = ArticleParser::parse("https://news.example/a/4", "<html><body></body></html>")
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Parse { .. }));
    }

    #[test]
    fn test_media_and_noise_excluded_from_body() {
        let html = r#"<html><body><h1>제목</h1>
            <div class="article-body">
              <p>유효한 본문 단락이 여기에 있습니다.</p>
              <div><script>var x = "스크립트 내용";</script>텍스트가 충분히 길면 포함됩니다 확실히.</div>
              <figure><img src="https://img.example/1.jpg" alt="첫 이미지"><figcaption>캡션</figcaption></figure>
            </div></body></html>"#;
        let parsed = ArticleParser::parse("https://news.example/a/5", html).unwrap();
        let content = parsed.content_ko.unwrap();
        assert!(!content.contains("스크립트"));
        assert!(!content.contains("캡션"));
        assert!(content.contains("유효한 본문"));
        // inline image still enumerated
        assert_eq!(parsed.image_urls.len(), 1);
        assert_eq!(parsed.image_urls[0].0, "https://img.example/1.jpg");
        assert_eq!(parsed.image_urls[0].1.as_deref(), Some("첫 이미지"));
        // but never promoted to the thumbnail
        assert!(parsed.thumbnail_url.is_none());
    }

    #[test]
    fn test_image_attribute_priority_and_dedup() {
        let html = r#"<html><body><h1>제목</h1>
            <img data-src="https://img.example/lazy.jpg">
            <img src="https://img.example/lazy.jpg" alt="dup">
            <img src="/relative/skip.jpg">
            <img data-original="https://img.example/orig.jpg">
            </body></html>"#;
        let parsed = ArticleParser::parse("https://news.example/a/6", html).unwrap();
        let urls: Vec<&str> = parsed.image_urls.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://img.example/lazy.jpg", "https://img.example/orig.jpg"]
        );
    }

    #[test]
    fn test_boilerplate_stripped() {
        let text = "본문입니다.\n무단 전재 및 재배포 금지\n[홍길동 기자]";
        let cleaned = ArticleParser::clean_text(text);
        assert!(cleaned.contains("본문입니다."));
        assert!(!cleaned.contains("무단"));
        assert!(!cleaned.contains("기자"));
    }

    #[test]
    fn test_date_formats() {
        let cases = [
            ("2026-02-10T09:30:00+09:00", "2026-02-10T00:30:00+00:00"),
            ("2026-02-10T09:30:00Z", "2026-02-10T09:30:00+00:00"),
            ("2026-02-10 09:30:00", "2026-02-10T09:30:00+00:00"),
            ("2026.02.10 09:30", "2026-02-10T09:30:00+00:00"),
            ("2026.02.10", "2026-02-10T00:00:00+00:00"),
            ("2026-02-10", "2026-02-10T00:00:00+00:00"),
            ("2026/02/10 09:30", "2026-02-10T09:30:00+00:00"),
            ("2026년 2월 10일", "2026-02-10T00:00:00+00:00"),
        ];
        for (input, expected) in cases {
            let dt = ArticleParser::parse_datetime(input)
                .unwrap_or_else(|| panic!("failed to parse {input}"));
            assert_eq!(dt.to_rfc3339(), expected, "input {input}");
        }
        assert!(ArticleParser::parse_datetime("언젠가").is_none());
        assert!(ArticleParser::parse_datetime("").is_none());
    }

    #[test]
    fn test_rfc2822_fallback() {
        let dt = ArticleParser::parse_datetime("Tue, 10 Feb 2026 09:30:00 +0900").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-10T00:30:00+00:00");
    }

    #[test]
    fn test_title_tag_fallback_splits_site_name() {
        let html = "<html><head><title>기사 제목 | 뉴스사이트</title></head><body></body></html>";
        let parsed = ArticleParser::parse("https://news.example/a/7", html).unwrap();
        assert_eq!(parsed.title_ko, "기사 제목");
    }
}
