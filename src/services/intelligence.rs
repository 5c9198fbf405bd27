//! Intelligence engine
//!
//! Per-article pipeline over SCRAPED/PENDING rows: pick a translation tier
//! from the denormalized artist name, build a tier-shaped bilingual prompt
//! with the glossary and localization guide injected, extract structured
//! intelligence, link detections to the entity registry with a weighted
//! match score, hand the result to the self-healing resolver, and route the
//! article to VERIFIED / PROCESSED / MANUAL_REVIEW by layered thresholds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use validator::Validate;

use crate::config::PipelineThresholds;
use crate::error::LlmError;
use crate::models::{
    EntityType, GlossaryTerm, LogCategory, LogLevel, ProcessStatus, Sentiment,
};
use crate::services::article_store::{
    ArticleStore, ArticleStatusUpdate, MappingRecord, PendingArticle,
};
use crate::services::entity_store::{EntityStore, GroupRef};
use crate::services::llm::{CallMetrics, LlmClient};
use crate::services::resolver::SelfHealingResolver;
use crate::services::system_log::{SystemEvent, SystemLogger};
use crate::models::ArtistRef;

const TEXT_MAX_CHARS: usize = 6_000;
const ARTIST_CACHE_TTL: Duration = Duration::from_secs(300);
const MAX_DETECTED_ENTITIES: usize = 20;
const MAX_CONTEXT_HINTS: usize = 10;
const MAX_HASHTAGS: usize = 15;
const GLOSSARY_PROMPT_LIMIT: i64 = 300;

// ─────────────────────────────────────────────────────────────
// Translation tier
// ─────────────────────────────────────────────────────────────

/// Selected from the best (smallest) `global_priority` among registry
/// artists matching the article's denormalized artist name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationTier {
    /// priority 1 / NULL: bilingual title + summary, 5–10 hashtags.
    Full,
    /// priority 2: bilingual title + 3-sentence summary, 5–7 hashtags.
    TitleOnly,
    /// priority 3: Korean entity extraction only.
    KoOnly,
}

impl TranslationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationTier::Full => "full",
            TranslationTier::TitleOnly => "title_only",
            TranslationTier::KoOnly => "ko_only",
        }
    }

    pub fn wants_translation(&self) -> bool {
        !matches!(self, TranslationTier::KoOnly)
    }
}

// ─────────────────────────────────────────────────────────────
// Structured LLM output
// ─────────────────────────────────────────────────────────────

fn default_mention_count() -> u32 {
    1
}

fn default_entity_confidence() -> f64 {
    1.0
}

fn default_entity_type() -> EntityType {
    EntityType::Artist
}

/// One entity detection from the model, with its self-assessed confidence
/// and ambiguity verdict.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DetectedEntity {
    #[validate(length(min = 1))]
    pub name_ko: String,
    #[serde(default)]
    pub name_en: Option<String>,
    #[serde(default)]
    pub context_hints: Vec<String>,
    #[serde(default = "default_mention_count")]
    #[validate(range(min = 1))]
    pub mention_count: u32,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default = "default_entity_type")]
    pub entity_type: EntityType,
    #[serde(default = "default_entity_confidence")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_score: f64,
    #[serde(default)]
    pub is_ambiguous: bool,
    #[serde(default)]
    pub ambiguity_reason: Option<String>,
}

impl DetectedEntity {
    fn normalize(&mut self) {
        self.name_ko = self.name_ko.trim().to_string();
        self.name_en = self
            .name_en
            .take()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self.context_hints = self
            .context_hints
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .take(MAX_CONTEXT_HINTS)
            .collect();
        self.ambiguity_reason = self
            .ambiguity_reason
            .take()
            .map(|r| r.chars().take(300).collect::<String>())
            .filter(|r| !r.is_empty());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl SentimentLabel {
    /// Column mapping; `mixed` stores as NULL.
    pub fn to_column(self) -> Option<Sentiment> {
        match self {
            SentimentLabel::Positive => Some(Sentiment::Positive),
            SentimentLabel::Negative => Some(Sentiment::Negative),
            SentimentLabel::Neutral => Some(Sentiment::Neutral),
            SentimentLabel::Mixed => None,
        }
    }
}

fn default_sentiment() -> SentimentLabel {
    SentimentLabel::Neutral
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MainCategory {
    Music,
    Drama,
    Film,
    Fashion,
    Entertainment,
    Award,
    Other,
}

fn default_category() -> MainCategory {
    MainCategory::Other
}

/// Full structured extraction for one article.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ArticleIntelligence {
    #[serde(default)]
    pub title_ko: String,
    #[serde(default)]
    pub title_en: String,
    #[serde(default)]
    #[validate(nested)]
    pub detected_artists: Vec<DetectedEntity>,
    #[serde(default)]
    pub topic_summary: String,
    #[serde(default)]
    pub topic_summary_en: String,
    #[serde(default)]
    pub seo_hashtags: Vec<String>,
    #[serde(default = "default_sentiment")]
    pub sentiment: SentimentLabel,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub relevance_score: f64,
    #[serde(default = "default_category")]
    pub main_category: MainCategory,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
}

impl ArticleIntelligence {
    /// Deserialize, normalize, and validate the model's JSON. Any schema
    /// violation is a `Validation` error and the article goes to ERROR.
    pub fn from_json(value: serde_json::Value) -> Result<Self, LlmError> {
        let mut parsed: ArticleIntelligence = serde_json::from_value(value)
            .map_err(|e| LlmError::Validation(format!("schema mismatch: {e}")))?;
        parsed.normalize();
        parsed
            .validate()
            .map_err(|e| LlmError::Validation(e.to_string()))?;
        Ok(parsed)
    }

    fn normalize(&mut self) {
        self.title_ko = self.title_ko.trim().to_string();
        self.title_en = self.title_en.trim().to_string();
        self.topic_summary = self.topic_summary.trim().to_string();
        self.topic_summary_en = self.topic_summary_en.trim().to_string();

        // hashtags always start with '#', capped
        self.seo_hashtags = self
            .seo_hashtags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| {
                if t.starts_with('#') {
                    t
                } else {
                    format!("#{t}")
                }
            })
            .take(MAX_HASHTAGS)
            .collect();

        self.detected_artists.truncate(MAX_DETECTED_ENTITIES);
        for entity in &mut self.detected_artists {
            entity.normalize();
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Linking
// ─────────────────────────────────────────────────────────────

/// One detection after registry matching.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedEntity {
    pub detected_name_ko: String,
    pub entity_type: EntityType,
    pub artist_id: Option<i64>,
    pub group_id: Option<i64>,
    pub entity_name_ko: String,
    /// Registry match score, distinct from the model's own confidence.
    pub match_score: f64,
    pub context_snippet: String,
    pub mention_count: u32,
    pub is_primary: bool,
    pub gemini_confidence: f64,
    pub is_ambiguous: bool,
    pub ambiguity_reason: Option<String>,
}

impl LinkedEntity {
    pub fn is_linked(&self) -> bool {
        self.artist_id.is_some() || self.group_id.is_some()
    }
}

/// Weighted match score between a detection and one registry candidate.
/// Contributions stack (an exact match also earns its substring weight)
/// and the total is capped at 1.0.
pub fn score_candidate(
    detected: &DetectedEntity,
    cand_name_ko: &str,
    cand_stage_ko: Option<&str>,
    cand_name_en: Option<&str>,
    cand_stage_en: Option<&str>,
) -> f64 {
    let mut score: f64 = 0.0;

    let name_ko = detected.name_ko.trim();
    let cand_ko = cand_name_ko.trim();
    if !name_ko.is_empty() && !cand_ko.is_empty() {
        if name_ko == cand_ko {
            score += 0.50;
        }
        if name_ko.contains(cand_ko) || cand_ko.contains(name_ko) {
            score += 0.30;
        }
    }

    // stage name only earns points when distinct from the legal name
    if let Some(stage_ko) = cand_stage_ko.map(str::trim).filter(|s| !s.is_empty()) {
        if stage_ko != cand_ko && !name_ko.is_empty() {
            if name_ko == stage_ko {
                score += 0.50;
            }
            if name_ko.contains(stage_ko) || stage_ko.contains(name_ko) {
                score += 0.25;
            }
        }
    }

    let name_en = detected
        .name_en
        .as_deref()
        .map(|n| n.trim().to_lowercase())
        .unwrap_or_default();
    let cand_en = cand_name_en
        .map(|n| n.trim().to_lowercase())
        .unwrap_or_default();
    if !name_en.is_empty() && !cand_en.is_empty() {
        if name_en == cand_en {
            score += 0.20;
        }
        if name_en.contains(&cand_en) || cand_en.contains(&name_en) {
            score += 0.10;
        }
    }

    if let Some(stage_en) = cand_stage_en
        .map(|n| n.trim().to_lowercase())
        .filter(|s| !s.is_empty())
    {
        if stage_en != cand_en && !name_en.is_empty() {
            if name_en == stage_en {
                score += 0.20;
            }
            if name_en.contains(&stage_en) || stage_en.contains(&name_en) {
                score += 0.10;
            }
        }
    }

    score.min(1.0)
}

/// Match detections against the cached registries. The best candidate wins
/// iff its score reaches `min_match_score`; otherwise the mapping stays
/// unlinked. EVENT detections are never linked.
pub fn contextual_link(
    detected: &[DetectedEntity],
    artists: &[ArtistRef],
    groups: &[GroupRef],
    min_match_score: f64,
) -> Vec<LinkedEntity> {
    let mut results = Vec::with_capacity(detected.len());

    for entity in detected {
        let mut best_score = 0.0;
        let mut best_artist: Option<&ArtistRef> = None;
        let mut best_group: Option<&GroupRef> = None;

        match entity.entity_type {
            EntityType::Artist => {
                for candidate in artists {
                    let s = score_candidate(
                        entity,
                        &candidate.name_ko,
                        candidate.stage_name_ko.as_deref(),
                        candidate.name_en.as_deref(),
                        candidate.stage_name_en.as_deref(),
                    );
                    if s > best_score {
                        best_score = s;
                        best_artist = Some(candidate);
                    }
                }
            }
            EntityType::Group => {
                for candidate in groups {
                    let s = score_candidate(
                        entity,
                        &candidate.name_ko,
                        None,
                        candidate.name_en.as_deref(),
                        None,
                    );
                    if s > best_score {
                        best_score = s;
                        best_group = Some(candidate);
                    }
                }
            }
            EntityType::Event => {}
        }

        let linked = best_score >= min_match_score;
        let (artist_id, group_id, entity_name_ko) = if linked {
            match (best_artist, best_group) {
                (Some(a), _) => (Some(a.id), None, a.name_ko.clone()),
                (_, Some(g)) => (None, Some(g.id), g.name_ko.clone()),
                _ => (None, None, entity.name_ko.clone()),
            }
        } else {
            (None, None, entity.name_ko.clone())
        };

        if linked {
            tracing::debug!(
                detected = %entity.name_ko,
                score = best_score,
                artist_id = ?artist_id,
                group_id = ?group_id,
                "entity linked"
            );
        } else {
            tracing::debug!(detected = %entity.name_ko, score = best_score, "entity unlinked");
        }

        results.push(LinkedEntity {
            detected_name_ko: entity.name_ko.clone(),
            entity_type: entity.entity_type,
            artist_id,
            group_id,
            entity_name_ko,
            match_score: (best_score * 10_000.0).round() / 10_000.0,
            context_snippet: entity
                .context_hints
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            mention_count: entity.mention_count,
            is_primary: entity.is_primary,
            gemini_confidence: entity.confidence_score,
            is_ambiguous: entity.is_ambiguous,
            ambiguity_reason: entity.ambiguity_reason.clone(),
        });
    }

    results
}

// ─────────────────────────────────────────────────────────────
// Tier selection and status decision (pure)
// ─────────────────────────────────────────────────────────────

/// Best (smallest) `global_priority` among artists matching the
/// denormalized name, mapped to a tier. Unknown names and NULL priorities
/// default to FULL so nothing silently loses translation.
pub fn translation_tier(artist_name_ko: Option<&str>, artists: &[ArtistRef]) -> TranslationTier {
    let Some(name) = artist_name_ko.map(str::trim).filter(|n| !n.is_empty()) else {
        return TranslationTier::Full;
    };

    let mut best_priority: Option<i32> = None;
    for artist in artists {
        let cand = artist.name_ko.trim();
        if cand.is_empty() {
            continue;
        }
        if name == cand || name.contains(cand) || cand.contains(name) {
            if let Some(priority) = artist.global_priority {
                if best_priority.map_or(true, |best| priority < best) {
                    best_priority = Some(priority);
                }
            }
        }
    }

    match best_priority {
        None => TranslationTier::Full,
        Some(p) if p <= 1 => TranslationTier::Full,
        Some(2) => TranslationTier::TitleOnly,
        Some(_) => TranslationTier::KoOnly,
    }
}

/// Layered status decision. Any reason routes to MANUAL_REVIEW with a
/// human-readable note; a clean pass auto-commits to VERIFIED at the
/// auto-commit threshold and otherwise lands in PROCESSED.
pub fn decide_status(
    intelligence: &ArticleIntelligence,
    tier: TranslationTier,
    thresholds: &PipelineThresholds,
) -> (ProcessStatus, Option<String>) {
    let mut reasons: Vec<String> = Vec::new();

    for entity in &intelligence.detected_artists {
        if entity.confidence_score < thresholds.entity_confidence {
            reasons.push(format!(
                "'{}' detection confidence low ({:.2} < {:.2})",
                entity.name_ko, entity.confidence_score, thresholds.entity_confidence
            ));
        }
        if entity.is_ambiguous {
            let why = entity.ambiguity_reason.as_deref().unwrap_or("unclear context");
            reasons.push(format!("'{}' ambiguous: {}", entity.name_ko, why));
        }
    }

    if intelligence.relevance_score < thresholds.min_relevance {
        reasons.push(format!(
            "K-entertainment relevance low ({:.2} < {:.2})",
            intelligence.relevance_score, thresholds.min_relevance
        ));
    }
    if intelligence.confidence < thresholds.min_confidence {
        reasons.push(format!(
            "overall confidence low ({:.2} < {:.2})",
            intelligence.confidence, thresholds.min_confidence
        ));
    }

    if tier.wants_translation() {
        if intelligence.title_en.trim().is_empty() {
            reasons.push(format!(
                "English title missing (tier={})",
                tier.as_str()
            ));
        }
        if intelligence.topic_summary_en.trim().is_empty() {
            reasons.push(format!(
                "English summary missing (tier={})",
                tier.as_str()
            ));
        }
    }

    if !reasons.is_empty() {
        let note = format!("MANUAL_REVIEW 사유: {}", reasons.join("; "));
        return (ProcessStatus::ManualReview, Some(note));
    }

    if intelligence.confidence >= thresholds.auto_commit {
        let note = format!(
            "Auto-Commit: confidence={:.4} ≥ {:.2} threshold",
            intelligence.confidence, thresholds.auto_commit
        );
        return (ProcessStatus::Verified, Some(note));
    }

    tracing::info!(
        confidence = intelligence.confidence,
        threshold = thresholds.auto_commit,
        "below auto-commit threshold, PROCESSED"
    );
    (ProcessStatus::Processed, None)
}

// ─────────────────────────────────────────────────────────────
// Prompt construction
// ─────────────────────────────────────────────────────────────

/// Idiomatic K-pop Korean terms and their expected English renderings.
const LOCALIZATION_GUIDE: &[(&str, &str)] = &[
    ("역주행", "\"viral comeback\" / \"reverse chart surge\""),
    ("대세돌", "\"trending it-idol\" / \"breakout star\""),
    ("컴백", "\"comeback\""),
    ("음방", "\"music show performance\""),
    ("초동", "\"first-week sales\""),
    ("더블타이틀", "\"double title track\""),
    ("완전체", "\"full group lineup\""),
    ("선공개", "\"pre-released track\""),
    ("음원", "\"digital single\" / \"streaming release\""),
    ("차트인", "\"chart entry\" / \"charted on\""),
    ("팬미팅", "\"fan meeting\""),
    ("월드투어", "\"world tour\""),
    ("데뷔", "\"debut\""),
    ("타이틀곡", "\"title track\""),
    ("수록곡", "\"b-side track\""),
    ("팬덤", "\"fandom\""),
    ("스밍", "\"streaming\""),
];

fn glossary_section(glossary: &[GlossaryTerm]) -> String {
    if glossary.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "## Canonical English spellings (glossary — always use these)\n",
    );
    for (category, label) in [
        ("ARTIST", "Artists/Groups"),
        ("AGENCY", "Agencies"),
        ("EVENT", "Events/Shows"),
    ] {
        let terms: Vec<&GlossaryTerm> = glossary
            .iter()
            .filter(|t| t.category.as_str() == category)
            .collect();
        if terms.is_empty() {
            continue;
        }
        out.push_str(&format!("\n[{label}]\n"));
        for term in terms {
            if let Some(en) = term.term_en.as_deref() {
                match term.description.as_deref() {
                    Some(desc) => out.push_str(&format!("  {} → {}  ({})\n", term.term_ko, en, desc)),
                    None => out.push_str(&format!("  {} → {}\n", term.term_ko, en)),
                }
            }
        }
    }
    out
}

fn localization_section() -> String {
    let mut out = String::from(
        "## Korean K-entertainment expressions → English localization guide\n\
         Translate these idioms for global fans, never literally:\n",
    );
    for (ko, en) in LOCALIZATION_GUIDE {
        out.push_str(&format!("  {ko} → {en}\n"));
    }
    out
}

const ENTITY_RULES: &str = "\
## Entity detection rules (all tiers)
detected_artists: every singer, group, actor, and MC directly mentioned.
  - context_hints: agency (YG, SM, HYBE ...), group name, brand, drama/album title
  - entity_type: ARTIST (solo), GROUP (band/team), EVENT (award show/event)
  - confidence_score (0.0-1.0): your own certainty about this detection.
      0.9-1.0 name and context clearly identify one specific act
      0.7-0.9 mostly certain, some ambiguity
      0.5-0.7 homonym or insufficient context
      0.0-0.5 very ambiguous or no direct evidence in the text
  - is_ambiguous: true when a homonym or unclear context prevents
    identifying one specific act (e.g. '지수' could be BLACKPINK's JISOO or
    someone else)
  - ambiguity_reason: one sentence explaining why, when is_ambiguous=true
sentiment: positive | negative | neutral | mixed
relevance_score: relevance to K-pop / K-drama / K-entertainment (0.0-1.0)
main_category: music|drama|film|fashion|entertainment|award|other
confidence: your overall analysis confidence (0.0-1.0)";

const ENTITY_JSON_SHAPE: &str = r#"    {
      "name_ko": "Korean name",
      "name_en": "English name or null",
      "context_hints": ["agency", "group", "brand"],
      "mention_count": 3,
      "is_primary": true,
      "entity_type": "ARTIST",
      "confidence_score": 0.95,
      "is_ambiguous": false,
      "ambiguity_reason": null
    }"#;

/// Build the extraction prompt for one article.
pub fn build_prompt(
    title: &str,
    content: &str,
    tier: TranslationTier,
    glossary: &[GlossaryTerm],
) -> String {
    let role = if tier.wants_translation() {
        "You are a K-entertainment analyst and global K-pop content translator.\n\
         Analyze the article below and produce bilingual structured data."
    } else {
        "You are a K-entertainment analyst.\n\
         Extract Korean entities only from the article below. No translation needed."
    };

    let json_shape = match tier {
        TranslationTier::KoOnly => format!(
            "Respond with exactly this JSON shape (Korean-only extraction):\n\
             {{\n  \"detected_artists\": [\n{ENTITY_JSON_SHAPE}\n  ],\n\
             \"topic_summary\": \"key topic in at most 2 Korean sentences\",\n\
             \"sentiment\": \"positive\",\n  \"relevance_score\": 0.95,\n\
             \"main_category\": \"music\",\n  \"confidence\": 0.88\n}}"
        ),
        TranslationTier::TitleOnly => format!(
            "Respond with exactly this JSON shape (English title + 3-sentence summary):\n\
             {{\n  \"title_ko\": \"Korean headline\",\n\
             \"title_en\": \"K-pop fan friendly English title (max 100 chars)\",\n\
             \"detected_artists\": [\n{ENTITY_JSON_SHAPE}\n  ],\n\
             \"topic_summary\": \"key topic in at most 2 Korean sentences\",\n\
             \"topic_summary_en\": \"summary in at most 3 English sentences, fan-friendly\",\n\
             \"seo_hashtags\": [\"#KPOP\", \"#ArtistName\", \"#NewMusic\"],\n\
             \"sentiment\": \"positive\",\n  \"relevance_score\": 0.95,\n\
             \"main_category\": \"music\",\n  \"confidence\": 0.88\n}}\n\n\
             Generate 5-7 seo_hashtags: artist + genre + event tags, each starting with #."
        ),
        TranslationTier::Full => format!(
            "Respond with exactly this JSON shape (full bilingual extraction):\n\
             {{\n  \"title_ko\": \"Korean headline\",\n\
             \"title_en\": \"K-pop fan friendly English title, NOT a literal translation (max 100 chars)\",\n\
             \"detected_artists\": [\n{ENTITY_JSON_SHAPE}\n  ],\n\
             \"topic_summary\": \"key topic in at most 3 Korean sentences\",\n\
             \"topic_summary_en\": \"summary in at most 3 English sentences, fan-friendly tone\",\n\
             \"seo_hashtags\": [\"#KPOP\", \"#BTS\", \"#NewMusic\", \"#KPOPTwitter\"],\n\
             \"sentiment\": \"positive\",\n  \"relevance_score\": 0.95,\n\
             \"main_category\": \"music\",\n  \"confidence\": 0.88\n}}\n\n\
             Generate 5-10 seo_hashtags global fans actually use on X/Instagram, each\n\
             starting with #; prefer official artist tags and fandom tags (#ARMY, #BLINK)."
        ),
    };

    let mut sections: Vec<String> = Vec::new();
    if tier.wants_translation() {
        let glossary_text = glossary_section(glossary);
        if !glossary_text.is_empty() {
            sections.push(glossary_text);
        }
        sections.push(localization_section());
        sections.push(
            "title_en and topic_summary_en must never be empty. Write them the way\n\
             global fans talk on X/Reddit, not as literal translations.\n\
             Example: \"방탄소년단, 신곡 공개\" → \"BTS Drops New Single\""
                .to_string(),
        );
    }
    sections.push(ENTITY_RULES.to_string());

    format!(
        "{role}\n\
         Respond with JSON only. No explanations, no comments, no markdown fences.\n\n\
         === ARTICLE ===\n\
         Title: {title}\n\
         Body:\n{content}\n\
         === END ===\n\n\
         {json_shape}\n\n\
         {}",
        sections.join("\n\n")
    )
}

// ─────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub article_id: i64,
    pub status: ProcessStatus,
    pub linked: Vec<LinkedEntity>,
    pub duration_ms: u64,
    pub token_metrics: Option<CallMetrics>,
    pub system_note: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineBatchResult {
    pub total: usize,
    pub verified: usize,
    pub processed: usize,
    pub manual_review: usize,
    pub failed: usize,
    pub total_tokens: u64,
}

struct CacheCell<T> {
    loaded_at: Option<Instant>,
    items: Arc<Vec<T>>,
}

impl<T> CacheCell<T> {
    fn empty() -> Self {
        Self {
            loaded_at: None,
            items: Arc::new(Vec::new()),
        }
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.map_or(false, |at| at.elapsed() < ttl)
    }
}

pub struct IntelligenceEngine {
    articles: ArticleStore,
    entities: EntityStore,
    resolver: SelfHealingResolver,
    llm: Arc<LlmClient>,
    syslog: SystemLogger,
    thresholds: PipelineThresholds,
    model_name: String,
    batch_size: i64,
    artists_cache: RwLock<CacheCell<ArtistRef>>,
    groups_cache: RwLock<CacheCell<GroupRef>>,
    glossary_cache: RwLock<CacheCell<GlossaryTerm>>,
}

impl IntelligenceEngine {
    pub fn new(
        articles: ArticleStore,
        entities: EntityStore,
        resolver: SelfHealingResolver,
        llm: Arc<LlmClient>,
        syslog: SystemLogger,
        thresholds: PipelineThresholds,
        model_name: String,
        batch_size: i64,
    ) -> Self {
        tracing::info!(
            model = %model_name,
            batch_size,
            entity_threshold = thresholds.entity_confidence,
            "intelligence engine initialized"
        );
        Self {
            articles,
            entities,
            resolver,
            llm,
            syslog,
            thresholds,
            model_name,
            batch_size,
            artists_cache: RwLock::new(CacheCell::empty()),
            groups_cache: RwLock::new(CacheCell::empty()),
            glossary_cache: RwLock::new(CacheCell::empty()),
        }
    }

    // ── caches ───────────────────────────────────────────────

    async fn artists(&self) -> anyhow::Result<Arc<Vec<ArtistRef>>> {
        {
            let cache = self.artists_cache.read().await;
            if cache.fresh(ARTIST_CACHE_TTL) {
                return Ok(cache.items.clone());
            }
        }
        let items = Arc::new(self.entities.all_artist_refs().await?);
        let mut cache = self.artists_cache.write().await;
        cache.items = items.clone();
        cache.loaded_at = Some(Instant::now());
        tracing::debug!(count = items.len(), "artist cache refreshed");
        Ok(items)
    }

    async fn groups(&self) -> anyhow::Result<Arc<Vec<GroupRef>>> {
        {
            let cache = self.groups_cache.read().await;
            if cache.fresh(ARTIST_CACHE_TTL) {
                return Ok(cache.items.clone());
            }
        }
        let items = Arc::new(self.entities.all_group_refs().await?);
        let mut cache = self.groups_cache.write().await;
        cache.items = items.clone();
        cache.loaded_at = Some(Instant::now());
        Ok(items)
    }

    async fn glossary(&self) -> anyhow::Result<Arc<Vec<GlossaryTerm>>> {
        {
            let cache = self.glossary_cache.read().await;
            if cache.fresh(self.thresholds.glossary_cache_ttl) {
                return Ok(cache.items.clone());
            }
        }
        let items = Arc::new(self.entities.glossary_terms(GLOSSARY_PROMPT_LIMIT).await?);
        let mut cache = self.glossary_cache.write().await;
        cache.items = items.clone();
        cache.loaded_at = Some(Instant::now());
        tracing::debug!(count = items.len(), "glossary cache refreshed");
        Ok(items)
    }

    async fn invalidate_glossary(&self) {
        self.glossary_cache.write().await.loaded_at = None;
    }

    // ── extraction ───────────────────────────────────────────

    async fn extract(
        &self,
        title_ko: Option<&str>,
        content_ko: Option<&str>,
        tier: TranslationTier,
        glossary: &[GlossaryTerm],
    ) -> Result<(ArticleIntelligence, CallMetrics), LlmError> {
        let title = title_ko
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("(untitled)");
        let mut content = content_ko.unwrap_or_default().trim().to_string();
        if content.chars().count() > TEXT_MAX_CHARS {
            content = content.chars().take(TEXT_MAX_CHARS).collect::<String>() + "\n...(truncated)";
        }
        if content.is_empty() {
            tracing::warn!("article has no body, analyzing the title alone");
        }

        let prompt = build_prompt(title, &content, tier, glossary);
        let (value, metrics) = self.llm.generate_json(&self.model_name, &prompt).await?;
        let intelligence = ArticleIntelligence::from_json(value)?;

        tracing::info!(
            artists = intelligence.detected_artists.len(),
            sentiment = ?intelligence.sentiment,
            relevance = intelligence.relevance_score,
            confidence = intelligence.confidence,
            tokens = metrics.total_tokens,
            time_ms = metrics.response_time_ms,
            "extraction complete"
        );

        Ok((intelligence, metrics))
    }

    // ── per-article pipeline ─────────────────────────────────

    pub async fn process_article(
        &self,
        article: &PendingArticle,
        dry_run: bool,
    ) -> ProcessingOutcome {
        let started = Instant::now();

        match self.process_article_inner(article, dry_run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let error_msg = e.to_string();
                tracing::error!(
                    article_id = article.id,
                    dry_run,
                    error = %error_msg,
                    "article processing failed"
                );

                if !dry_run {
                    if let Err(db_err) = self.articles.mark_error(article.id).await {
                        tracing::error!(article_id = article.id, error = %db_err, "ERROR transition failed");
                    }
                    self.syslog
                        .log(
                            LogCategory::AiProcess,
                            SystemEvent {
                                article_id: Some(article.id),
                                job_id: article.job_id,
                                level: Some(LogLevel::Error),
                                event: "entity_extract_failed",
                                message: &format!("extraction failed: {error_msg}"),
                                details: Some(serde_json::json!({
                                    "error": error_msg,
                                    "title_ko": article.title_ko,
                                    "source_url": article.source_url,
                                })),
                                duration_ms: Some(duration_ms as i32),
                            },
                        )
                        .await;
                }

                ProcessingOutcome {
                    article_id: article.id,
                    status: ProcessStatus::Error,
                    linked: Vec::new(),
                    duration_ms,
                    token_metrics: None,
                    system_note: None,
                    error: Some(error_msg),
                }
            }
        }
    }

    async fn process_article_inner(
        &self,
        article: &PendingArticle,
        dry_run: bool,
    ) -> anyhow::Result<ProcessingOutcome> {
        let started = Instant::now();

        // 0. tier + glossary
        let artists = self.artists().await?;
        let tier = translation_tier(article.artist_name_ko.as_deref(), &artists);
        let glossary = if tier.wants_translation() {
            self.glossary().await?
        } else {
            Arc::new(Vec::new())
        };
        tracing::info!(
            article_id = article.id,
            tier = tier.as_str(),
            glossary = glossary.len(),
            "translation tier decided"
        );

        // 1. extraction
        let (intelligence, metrics) = self
            .extract(
                article.title_ko.as_deref(),
                article.content_ko.as_deref(),
                tier,
                &glossary,
            )
            .await?;

        // 2. contextual linking
        let groups = self.groups().await?;
        let mut linked = contextual_link(
            &intelligence.detected_artists,
            &artists,
            &groups,
            self.thresholds.min_match_score,
        );

        // 2a/2b. self-healing: cross-validation, reconciliation, glossary
        // enrollment (never on dry runs)
        if !dry_run {
            linked = self
                .resolver
                .cross_validate(linked, &intelligence, article.id)
                .await;

            let enrolled = self
                .resolver
                .enroll_new_entities(&intelligence.detected_artists, &linked, article.id)
                .await;
            if enrolled > 0 {
                self.invalidate_glossary().await;
            }
        }

        // 3. mapping replacement
        let records: Vec<MappingRecord> = linked
            .iter()
            .map(|l| MappingRecord {
                entity_type: l.entity_type,
                artist_id: l.artist_id,
                group_id: l.group_id,
                entity_name_ko: l.entity_name_ko.clone(),
                confidence_score: l.match_score,
                context_snippet: l.context_snippet.clone(),
            })
            .collect();
        if !dry_run && !records.is_empty() {
            let saved = self
                .articles
                .replace_entity_mappings(article.id, &records)
                .await?;
            tracing::debug!(article_id = article.id, count = saved, "entity mappings replaced");
        }

        // 4. status decision
        let (status, system_note) = decide_status(&intelligence, tier, &self.thresholds);

        // 4b. SEO hashtag metadata blob
        let seo_hashtags = (!intelligence.seo_hashtags.is_empty() && tier.wants_translation())
            .then(|| {
                serde_json::json!({
                    "tags": intelligence.seo_hashtags,
                    "model": self.model_name,
                    "generated_at": Utc::now().to_rfc3339(),
                    "confidence": (intelligence.confidence * 10_000.0).round() / 10_000.0,
                    "tier": tier.as_str(),
                })
            });

        // 5. write-through
        if !dry_run {
            self.articles
                .update_article_status(
                    article.id,
                    &ArticleStatusUpdate {
                        status,
                        topic_summary: Some(intelligence.topic_summary.clone())
                            .filter(|s| !s.is_empty()),
                        system_note: system_note.clone(),
                        title_en: Some(intelligence.title_en.clone()).filter(|s| !s.is_empty()),
                        summary_en: Some(intelligence.topic_summary_en.clone())
                            .filter(|s| !s.is_empty()),
                        hashtags_en: (!intelligence.seo_hashtags.is_empty())
                            .then(|| intelligence.seo_hashtags.clone()),
                        seo_hashtags,
                        sentiment: intelligence.sentiment.to_column(),
                    },
                )
                .await?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;

        // 6. audit trail / dry-run preview
        if dry_run {
            let preview = serde_json::json!({
                "article_id": article.id,
                "translation_tier": tier.as_str(),
                "status_would_be": status,
                "system_note": system_note,
                "intelligence": intelligence,
                "linked": linked,
                "token_metrics": metrics,
            });
            println!(
                "[DRY RUN] article_id={}\n{}",
                article.id,
                serde_json::to_string_pretty(&preview).unwrap_or_default()
            );
        } else {
            let ambiguous: Vec<&str> = linked
                .iter()
                .filter(|l| l.is_ambiguous)
                .map(|l| l.detected_name_ko.as_str())
                .collect();
            let low_confidence: Vec<String> = linked
                .iter()
                .filter(|l| l.gemini_confidence < self.thresholds.entity_confidence)
                .map(|l| format!("{}({:.2})", l.detected_name_ko, l.gemini_confidence))
                .collect();
            let entity_scores = serde_json::Value::Object(
                linked
                    .iter()
                    .map(|l| {
                        (
                            l.detected_name_ko.clone(),
                            serde_json::json!(l.gemini_confidence),
                        )
                    })
                    .collect(),
            );

            self.syslog
                .log(
                    LogCategory::AiProcess,
                    SystemEvent {
                        article_id: Some(article.id),
                        job_id: article.job_id,
                        level: Some(if status == ProcessStatus::ManualReview {
                            LogLevel::Warning
                        } else {
                            LogLevel::Info
                        }),
                        event: &format!("entity_extract_{}", status.as_str().to_lowercase()),
                        message: &format!(
                            "extraction complete ({}) | entities={} tokens={} time={}ms",
                            status.as_str(),
                            linked.len(),
                            metrics.total_tokens,
                            metrics.response_time_ms
                        ),
                        details: Some(serde_json::json!({
                            "status": status,
                            "system_note": system_note,
                            "translation_tier": tier.as_str(),
                            "sentiment": intelligence.sentiment,
                            "relevance_score": intelligence.relevance_score,
                            "confidence": intelligence.confidence,
                            "main_category": intelligence.main_category,
                            "entity_scores": entity_scores,
                            "ambiguous_entities": ambiguous,
                            "low_conf_entities": low_confidence,
                            "linked_artist_ids": linked
                                .iter()
                                .filter_map(|l| l.artist_id)
                                .collect::<Vec<_>>(),
                            "linked_group_ids": linked
                                .iter()
                                .filter_map(|l| l.group_id)
                                .collect::<Vec<_>>(),
                            "token_metrics": metrics,
                        })),
                        duration_ms: Some(duration_ms as i32),
                    },
                )
                .await;
        }

        Ok(ProcessingOutcome {
            article_id: article.id,
            status,
            linked,
            duration_ms,
            token_metrics: Some(metrics),
            system_note,
            error: None,
        })
    }

    // ── batch loop ───────────────────────────────────────────

    /// Claim up to `batch_size` PENDING articles and process them. Dry runs
    /// read without claiming and write nothing anywhere.
    pub async fn process_pending(
        &self,
        batch_size: Option<i64>,
        job_id: Option<i64>,
        dry_run: bool,
    ) -> anyhow::Result<EngineBatchResult> {
        let limit = batch_size.unwrap_or(self.batch_size);
        let articles = if dry_run {
            self.articles.read_pending_articles(limit, job_id).await?
        } else {
            self.articles.claim_pending_articles(limit, job_id).await?
        };

        let mut result = EngineBatchResult {
            total: articles.len(),
            ..Default::default()
        };

        if articles.is_empty() {
            tracing::info!(?job_id, dry_run, "no pending articles");
            return Ok(result);
        }

        tracing::info!(
            count = articles.len(),
            ?job_id,
            model = %self.model_name,
            dry_run,
            "batch processing started"
        );

        for (i, article) in articles.iter().enumerate() {
            let outcome = self.process_article(article, dry_run).await;

            if let Some(metrics) = outcome.token_metrics {
                result.total_tokens += metrics.total_tokens;
            }

            tracing::info!(
                n = i + 1,
                total = articles.len(),
                article_id = outcome.article_id,
                status = outcome.status.as_str(),
                duration_ms = outcome.duration_ms,
                "article done"
            );

            match outcome.status {
                ProcessStatus::Verified => result.verified += 1,
                ProcessStatus::Processed => result.processed += 1,
                ProcessStatus::ManualReview => result.manual_review += 1,
                _ => result.failed += 1,
            }
        }

        tracing::info!(
            total = result.total,
            verified = result.verified,
            processed = result.processed,
            manual_review = result.manual_review,
            failed = result.failed,
            total_tokens = result.total_tokens,
            "batch processing complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(name_ko: &str, name_en: Option<&str>, entity_type: EntityType) -> DetectedEntity {
        DetectedEntity {
            name_ko: name_ko.to_string(),
            name_en: name_en.map(str::to_string),
            context_hints: vec![],
            mention_count: 1,
            is_primary: false,
            entity_type,
            confidence_score: 0.95,
            is_ambiguous: false,
            ambiguity_reason: None,
        }
    }

    fn artist_ref(id: i64, name_ko: &str, name_en: Option<&str>, priority: Option<i32>) -> ArtistRef {
        ArtistRef {
            id,
            name_ko: name_ko.to_string(),
            name_en: name_en.map(str::to_string),
            stage_name_ko: None,
            stage_name_en: None,
            global_priority: priority,
            is_verified: true,
        }
    }

    fn intelligence(confidence: f64) -> ArticleIntelligence {
        ArticleIntelligence {
            title_ko: "신곡 발표".to_string(),
            title_en: "BTS Drops New Single".to_string(),
            detected_artists: vec![],
            topic_summary: "요약".to_string(),
            topic_summary_en: "Summary".to_string(),
            seo_hashtags: vec!["#KPOP".to_string()],
            sentiment: SentimentLabel::Positive,
            relevance_score: 0.95,
            main_category: MainCategory::Music,
            confidence,
        }
    }

    fn thresholds() -> PipelineThresholds {
        PipelineThresholds::from_env()
    }

    // ── scoring ──────────────────────────────────────────────

    #[test]
    fn test_exact_bilingual_match_caps_at_one() {
        let d = detected("방탄소년단", Some("BTS"), EntityType::Group);
        // exact KO (0.5 + 0.3 substring) + exact EN (0.2 + 0.1 substring) → capped
        let score = score_candidate(&d, "방탄소년단", None, Some("BTS"), None);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_exact_korean_only() {
        let d = detected("아이유", None, EntityType::Artist);
        let score = score_candidate(&d, "아이유", None, None, None);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_substring_korean_match() {
        let d = detected("지수", None, EntityType::Artist);
        let score = score_candidate(&d, "김지수", None, None, None);
        assert!((score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_stage_name_distinct_bonus() {
        let d = detected("아이유", None, EntityType::Artist);
        // legal name differs, stage name matches exactly
        let score = score_candidate(&d, "이지은", Some("아이유"), None, None);
        assert!((score - 0.75).abs() < 1e-9); // 0.50 exact + 0.25 substring
    }

    #[test]
    fn test_english_case_insensitive() {
        let d = detected("제니", Some("jennie"), EntityType::Artist);
        let score = score_candidate(&d, "김제니", None, Some("JENNIE"), None);
        // 0.3 KO substring + 0.2 EN exact + 0.1 EN substring
        assert!((score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_weak_match_stays_unlinked() {
        let artists = vec![artist_ref(1, "아이유", Some("IU"), Some(1))];
        let d = detected("누에라", Some("NouERA"), EntityType::Artist);
        let linked = contextual_link(&[d], &artists, &[], 0.35);
        assert_eq!(linked.len(), 1);
        assert!(!linked[0].is_linked());
        assert_eq!(linked[0].entity_name_ko, "누에라");
    }

    #[test]
    fn test_group_detection_links_group_id() {
        let groups = vec![GroupRef {
            id: 7,
            name_ko: "방탄소년단".to_string(),
            name_en: Some("BTS".to_string()),
            global_priority: Some(1),
        }];
        let d = detected("방탄소년단", Some("BTS"), EntityType::Group);
        let linked = contextual_link(&[d], &[], &groups, 0.35);
        assert_eq!(linked[0].group_id, Some(7));
        assert_eq!(linked[0].artist_id, None);
        assert_eq!(linked[0].match_score, 1.0);
    }

    #[test]
    fn test_event_never_links() {
        let artists = vec![artist_ref(1, "골든디스크", None, None)];
        let d = detected("골든디스크", Some("Golden Disc Awards"), EntityType::Event);
        let linked = contextual_link(&[d], &artists, &[], 0.35);
        assert!(!linked[0].is_linked());
    }

    // ── tier selection ───────────────────────────────────────

    #[test]
    fn test_tier_from_priority() {
        let artists = vec![
            artist_ref(1, "방탄소년단", Some("BTS"), Some(1)),
            artist_ref(2, "중견가수", None, Some(2)),
            artist_ref(3, "신인가수", None, Some(3)),
        ];
        assert_eq!(
            translation_tier(Some("방탄소년단"), &artists),
            TranslationTier::Full
        );
        assert_eq!(
            translation_tier(Some("중견가수"), &artists),
            TranslationTier::TitleOnly
        );
        assert_eq!(
            translation_tier(Some("신인가수"), &artists),
            TranslationTier::KoOnly
        );
    }

    #[test]
    fn test_tier_defaults_to_full() {
        let artists = vec![artist_ref(1, "무명가수", None, None)];
        // no artist name on the article
        assert_eq!(translation_tier(None, &artists), TranslationTier::Full);
        // unknown artist
        assert_eq!(
            translation_tier(Some("미등록"), &artists),
            TranslationTier::Full
        );
        // matched but NULL priority
        assert_eq!(
            translation_tier(Some("무명가수"), &artists),
            TranslationTier::Full
        );
    }

    #[test]
    fn test_tier_best_priority_wins() {
        let artists = vec![
            artist_ref(1, "지수", None, Some(3)),
            artist_ref(2, "김지수", None, Some(1)),
        ];
        // both match by substring; priority 1 wins
        assert_eq!(
            translation_tier(Some("지수"), &artists),
            TranslationTier::Full
        );
    }

    // ── status decision ──────────────────────────────────────

    #[test]
    fn test_auto_commit_boundary() {
        let t = thresholds();
        let (status, _) = decide_status(&intelligence(0.9499), TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::Processed);

        let (status, note) = decide_status(&intelligence(0.95), TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::Verified);
        assert!(note.unwrap().starts_with("Auto-Commit"));
    }

    #[test]
    fn test_entity_confidence_boundary() {
        let t = thresholds();
        let mut intel = intelligence(0.99);
        let mut entity = detected("지수", Some("JISOO"), EntityType::Artist);
        entity.confidence_score = 0.7999;
        intel.detected_artists = vec![entity];

        let (status, note) = decide_status(&intel, TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::ManualReview);
        let note = note.unwrap();
        assert!(note.starts_with("MANUAL_REVIEW 사유: "));
        assert!(note.contains("지수"));
    }

    #[test]
    fn test_ambiguity_routes_to_manual_review() {
        let t = thresholds();
        let mut intel = intelligence(0.97);
        let mut entity = detected("지수", Some("JISOO"), EntityType::Artist);
        entity.confidence_score = 0.72;
        entity.is_ambiguous = true;
        entity.ambiguity_reason = Some("'지수' 동명이인 가능".to_string());
        intel.detected_artists = vec![entity];

        let (status, note) = decide_status(&intel, TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::ManualReview);
        let note = note.unwrap();
        assert!(note.starts_with("MANUAL_REVIEW 사유: "));
        // both the low-confidence and the ambiguity reasons survive
        assert!(note.contains("0.72"));
        assert!(note.contains("'지수' 동명이인 가능"));
    }

    #[test]
    fn test_ko_only_tier_ignores_missing_english() {
        let t = thresholds();
        let mut intel = intelligence(0.97);
        intel.title_en = String::new();
        intel.topic_summary_en = String::new();

        let (status, _) = decide_status(&intel, TranslationTier::KoOnly, &t);
        assert_eq!(status, ProcessStatus::Verified);

        let (status, note) = decide_status(&intel, TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::ManualReview);
        assert!(note.unwrap().contains("English title missing"));
    }

    #[test]
    fn test_relevance_and_confidence_reasons() {
        let t = thresholds();
        let mut intel = intelligence(0.55);
        intel.relevance_score = 0.2;
        let (status, note) = decide_status(&intel, TranslationTier::Full, &t);
        assert_eq!(status, ProcessStatus::ManualReview);
        let note = note.unwrap();
        assert!(note.contains("relevance low"));
        assert!(note.contains("overall confidence low"));
    }

    // ── output normalization ─────────────────────────────────

    #[test]
    fn test_from_json_normalizes_hashtags() {
        let value = serde_json::json!({
            "title_ko": " 제목 ",
            "title_en": "Title",
            "topic_summary": "요약",
            "topic_summary_en": "Summary",
            "seo_hashtags": ["KPOP", "#BTS", "  ", "#NewMusic"],
            "sentiment": "positive",
            "relevance_score": 0.9,
            "main_category": "music",
            "confidence": 0.9,
        });
        let intel = ArticleIntelligence::from_json(value).unwrap();
        assert_eq!(intel.title_ko, "제목");
        assert_eq!(intel.seo_hashtags, vec!["#KPOP", "#BTS", "#NewMusic"]);
    }

    #[test]
    fn test_from_json_caps_hashtags_at_fifteen() {
        let tags: Vec<String> = (0..30).map(|i| format!("tag{i}")).collect();
        let value = serde_json::json!({
            "seo_hashtags": tags,
            "sentiment": "neutral",
            "relevance_score": 0.5,
            "confidence": 0.5,
        });
        let intel = ArticleIntelligence::from_json(value).unwrap();
        assert_eq!(intel.seo_hashtags.len(), 15);
        assert!(intel.seo_hashtags.iter().all(|t| t.starts_with('#')));
    }

    #[test]
    fn test_from_json_rejects_out_of_range_confidence() {
        let value = serde_json::json!({
            "sentiment": "neutral",
            "relevance_score": 0.5,
            "confidence": 1.5,
        });
        assert!(ArticleIntelligence::from_json(value).is_err());
    }

    #[test]
    fn test_from_json_rejects_unknown_sentiment() {
        let value = serde_json::json!({
            "sentiment": "ecstatic",
            "relevance_score": 0.5,
            "confidence": 0.5,
        });
        assert!(ArticleIntelligence::from_json(value).is_err());
    }

    #[test]
    fn test_context_hints_capped_at_ten() {
        let hints: Vec<String> = (0..20).map(|i| format!("hint{i}")).collect();
        let value = serde_json::json!({
            "detected_artists": [{
                "name_ko": "아이유",
                "context_hints": hints,
                "confidence_score": 0.9,
            }],
            "sentiment": "neutral",
            "relevance_score": 0.5,
            "confidence": 0.5,
        });
        let intel = ArticleIntelligence::from_json(value).unwrap();
        assert_eq!(intel.detected_artists[0].context_hints.len(), 10);
    }

    // ── prompt shape ─────────────────────────────────────────

    fn term(ko: &str, en: &str, category: crate::models::GlossaryCategory) -> GlossaryTerm {
        GlossaryTerm {
            term_ko: ko.to_string(),
            term_en: Some(en.to_string()),
            category,
            description: None,
        }
    }

    #[test]
    fn test_full_prompt_includes_glossary_and_localization() {
        use crate::models::GlossaryCategory;
        let glossary = vec![term("방탄소년단", "BTS", GlossaryCategory::Artist)];
        let prompt = build_prompt("제목", "본문", TranslationTier::Full, &glossary);
        assert!(prompt.contains("방탄소년단 → BTS"));
        assert!(prompt.contains("viral comeback"));
        assert!(prompt.contains("seo_hashtags"));
        assert!(prompt.contains("title_en"));
    }

    #[test]
    fn test_ko_only_prompt_omits_translation_sections() {
        use crate::models::GlossaryCategory;
        let glossary = vec![term("방탄소년단", "BTS", GlossaryCategory::Artist)];
        let prompt = build_prompt("제목", "본문", TranslationTier::KoOnly, &glossary);
        assert!(!prompt.contains("BTS"));
        assert!(!prompt.contains("viral comeback"));
        assert!(!prompt.contains("title_en"));
        assert!(prompt.contains("detected_artists"));
    }

    #[test]
    fn test_title_only_prompt_requests_fewer_hashtags() {
        let prompt = build_prompt("제목", "본문", TranslationTier::TitleOnly, &[]);
        assert!(prompt.contains("5-7"));
    }
}
