//! End-to-end decision scenarios over the extraction → linking → routing
//! chain, driven entirely through the public library surface.

use kenter_intel_backend::config::PipelineThresholds;
use kenter_intel_backend::models::{ArtistRef, EntityType, ProcessStatus};
use kenter_intel_backend::services::entity_store::GroupRef;
use kenter_intel_backend::services::intelligence::{
    contextual_link, decide_status, translation_tier, ArticleIntelligence, TranslationTier,
};
use kenter_intel_backend::services::llm::LlmClient;
use kenter_intel_backend::services::resolver::{
    conflict_score, parse_reconcile_verdict, ReconcileWinner,
};

fn thresholds() -> PipelineThresholds {
    PipelineThresholds::from_env()
}

fn registry_artist(id: i64, name_ko: &str, name_en: &str, priority: i32) -> ArtistRef {
    ArtistRef {
        id,
        name_ko: name_ko.to_string(),
        name_en: Some(name_en.to_string()),
        stage_name_ko: None,
        stage_name_en: None,
        global_priority: Some(priority),
        is_verified: true,
    }
}

/// Happy path, tier FULL: a confident bilingual extraction auto-commits to
/// VERIFIED and the group detection links with a capped score.
#[test]
fn happy_path_full_tier_auto_commits() {
    let artists = vec![registry_artist(1, "방탄소년단", "BTS", 1)];
    let groups = vec![GroupRef {
        id: 11,
        name_ko: "방탄소년단".to_string(),
        name_en: Some("BTS".to_string()),
        global_priority: Some(1),
    }];

    // the denormalized artist name selects the FULL tier
    let tier = translation_tier(Some("방탄소년단"), &artists);
    assert_eq!(tier, TranslationTier::Full);

    let intelligence = ArticleIntelligence::from_json(serde_json::json!({
        "title_ko": "신곡 발표",
        "title_en": "BTS Drops New Single",
        "topic_summary": "요약입니다.",
        "topic_summary_en": "Summary of the article.",
        "detected_artists": [{
            "name_ko": "방탄소년단",
            "name_en": "BTS",
            "confidence_score": 0.98,
            "is_ambiguous": false,
            "entity_type": "GROUP",
        }],
        "relevance_score": 0.95,
        "confidence": 0.97,
        "sentiment": "positive",
        "main_category": "music",
        "seo_hashtags": ["#KPOP", "#BTS"],
    }))
    .unwrap();

    let linked = contextual_link(
        &intelligence.detected_artists,
        &artists,
        &groups,
        thresholds().min_match_score,
    );
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].group_id, Some(11));
    assert_eq!(linked[0].artist_id, None);
    assert_eq!(linked[0].match_score, 1.0);

    let (status, _) = decide_status(&intelligence, tier, &thresholds());
    assert_eq!(status, ProcessStatus::Verified);
}

/// Ambiguity scenario: a low-confidence, ambiguous detection forces
/// MANUAL_REVIEW with both reasons in the note, while the mapping is still
/// produced.
#[test]
fn ambiguity_forces_manual_review_but_keeps_mapping() {
    let artists = vec![registry_artist(2, "지수", "JISOO", 1)];

    let intelligence = ArticleIntelligence::from_json(serde_json::json!({
        "title_ko": "지수 근황",
        "title_en": "Jisoo Update",
        "topic_summary": "요약입니다.",
        "topic_summary_en": "Summary.",
        "detected_artists": [{
            "name_ko": "지수",
            "name_en": "JISOO",
            "confidence_score": 0.72,
            "is_ambiguous": true,
            "ambiguity_reason": "'지수' 동명이인 가능",
            "entity_type": "ARTIST",
        }],
        "relevance_score": 0.95,
        "confidence": 0.97,
        "sentiment": "neutral",
        "main_category": "entertainment",
        "seo_hashtags": [],
    }))
    .unwrap();

    let linked = contextual_link(
        &intelligence.detected_artists,
        &artists,
        &[],
        thresholds().min_match_score,
    );
    assert_eq!(linked[0].artist_id, Some(2));

    let (status, note) = decide_status(&intelligence, TranslationTier::Full, &thresholds());
    assert_eq!(status, ProcessStatus::ManualReview);
    let note = note.unwrap();
    assert!(note.starts_with("MANUAL_REVIEW 사유: "));
    assert!(note.contains("0.72"));
    assert!(note.contains("'지수' 동명이인 가능"));
}

/// Reconciliation verdicts: the article-wins answer parses cleanly, and a
/// malformed second call degrades to an indeterminate verdict whose
/// conflict score stays in range.
#[test]
fn reconcile_verdicts_and_conflict_scores() {
    let verdict = parse_reconcile_verdict(&serde_json::json!({
        "winner": "article",
        "reason": "official spelling",
    }));
    assert_eq!(
        verdict,
        Some((ReconcileWinner::Article, "official spelling".to_string()))
    );

    // malformed answers are indeterminate
    assert!(parse_reconcile_verdict(&serde_json::json!({"verdict": "article"})).is_none());
    let garbage = LlmClient::parse_json("winner: article");
    assert!(garbage.is_err());

    let score = conflict_score("Jisoo", "JISOO");
    assert_eq!(score, 0.0);
    let score = conflict_score("Jisoo", "Karina");
    assert!((0.0..=1.0).contains(&score));
    assert!(score > 0.4);
}

/// An unmatched detection keeps its own name and no entity id — the shape
/// the glossary auto-enroll path consumes.
#[test]
fn unmatched_detection_is_enrollable() {
    let artists = vec![registry_artist(1, "아이유", "IU", 1)];

    let intelligence = ArticleIntelligence::from_json(serde_json::json!({
        "title_ko": "누에라 데뷔",
        "title_en": "NouERA Debuts",
        "topic_summary": "요약입니다.",
        "topic_summary_en": "Summary.",
        "detected_artists": [{
            "name_ko": "누에라",
            "name_en": "NouERA",
            "confidence_score": 0.9,
            "entity_type": "ARTIST",
        }],
        "relevance_score": 0.9,
        "confidence": 0.9,
        "sentiment": "positive",
        "main_category": "music",
    }))
    .unwrap();

    let linked = contextual_link(
        &intelligence.detected_artists,
        &artists,
        &[],
        thresholds().min_match_score,
    );
    assert!(!linked[0].is_linked());
    assert_eq!(linked[0].entity_name_ko, "누에라");
    assert_eq!(
        intelligence.detected_artists[0].entity_type,
        EntityType::Artist
    );
}

/// KO_ONLY tier articles with no English fields pass the completeness
/// check; the same payload under FULL does not.
#[test]
fn ko_only_tier_skips_translation_completeness() {
    let intelligence = ArticleIntelligence::from_json(serde_json::json!({
        "topic_summary": "요약입니다.",
        "detected_artists": [{
            "name_ko": "신인가수",
            "confidence_score": 0.96,
            "entity_type": "ARTIST",
        }],
        "relevance_score": 0.9,
        "confidence": 0.96,
        "sentiment": "neutral",
        "main_category": "music",
    }))
    .unwrap();

    let (status, _) = decide_status(&intelligence, TranslationTier::KoOnly, &thresholds());
    assert_eq!(status, ProcessStatus::Verified);

    let (status, note) = decide_status(&intelligence, TranslationTier::Full, &thresholds());
    assert_eq!(status, ProcessStatus::ManualReview);
    let note = note.unwrap();
    assert!(note.contains("English title missing"));
    assert!(note.contains("English summary missing"));
}
