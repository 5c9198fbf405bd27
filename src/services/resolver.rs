//! Self-healing resolver
//!
//! Three autonomous repair paths over the entity registry, driven by
//! article evidence: FILL writes into empty profile fields,
//! RECONCILE settles conflicts through a second narrow LLM judgement, and
//! ENROLL auto-provisions glossary terms for detections that matched no
//! registry entity. Every mutation writes the field update, a
//! DataUpdateLog row, an AutoResolutionLog row, and the field's
//! source-article pointer in one transaction; nothing else in the crate
//! touches those tables together.

use std::sync::Arc;

use sqlx::PgPool;

use crate::models::{EntityType, GlossaryCategory, LogCategory};
use crate::services::entity_store::EntityStore;
use crate::services::intelligence::{ArticleIntelligence, DetectedEntity, LinkedEntity};
use crate::services::llm::LlmClient;
use crate::services::system_log::{SystemEvent, SystemLogger};

/// Mapping-confidence bonus for evidence that agrees with (or fills) the
/// registry.
const VALIDATION_BOOST: f64 = 0.05;

/// Updatable artist profile fields. The closed enum is the whitelist:
/// column names only ever come from these match arms, so no caller-supplied
/// string can reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistField {
    NameEn,
    NationalityKo,
    NationalityEn,
    Mbti,
    BloodType,
    HeightCm,
    WeightKg,
}

impl ArtistField {
    pub fn column(&self) -> &'static str {
        match self {
            ArtistField::NameEn => "name_en",
            ArtistField::NationalityKo => "nationality_ko",
            ArtistField::NationalityEn => "nationality_en",
            ArtistField::Mbti => "mbti",
            ArtistField::BloodType => "blood_type",
            ArtistField::HeightCm => "height_cm",
            ArtistField::WeightKg => "weight_kg",
        }
    }

    /// Provenance column updated alongside the value. Height and weight
    /// share the body source; the two nationality halves share one too.
    pub fn source_column(&self) -> &'static str {
        match self {
            ArtistField::NameEn => "name_source_article_id",
            ArtistField::NationalityKo | ArtistField::NationalityEn => {
                "nationality_source_article_id"
            }
            ArtistField::Mbti => "mbti_source_article_id",
            ArtistField::BloodType => "blood_type_source_article_id",
            ArtistField::HeightCm | ArtistField::WeightKg => "body_source_article_id",
        }
    }

    fn value_cast(&self) -> &'static str {
        match self {
            ArtistField::HeightCm | ArtistField::WeightKg => "$2::integer",
            _ => "$2",
        }
    }
}

/// Second-opinion verdict from the reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileWinner {
    Article,
    Db,
}

/// Parse the strict `{"winner": "article"|"db", "reason": "..."}` response.
/// Anything else is indeterminate.
pub fn parse_reconcile_verdict(
    value: &serde_json::Value,
) -> Option<(ReconcileWinner, String)> {
    let winner = match value.get("winner").and_then(|v| v.as_str()) {
        Some("article") => ReconcileWinner::Article,
        Some("db") => ReconcileWinner::Db,
        _ => return None,
    };
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .chars()
        .take(60)
        .collect();
    Some((winner, reason))
}

/// Character-set Jaccard dissimilarity, clamped to [0, 1]. Completely
/// different names score near 1.0.
pub fn conflict_score(existing: &str, conflicting: &str) -> f64 {
    let a: std::collections::HashSet<char> = existing.to_lowercase().chars().collect();
    let b: std::collections::HashSet<char> = conflicting.to_lowercase().chars().collect();
    let intersection = a.intersection(&b).count() as f64;
    let denom = existing
        .chars()
        .count()
        .max(conflicting.chars().count())
        .max(1) as f64;
    (1.0 - intersection / denom).clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct SelfHealingResolver {
    pool: PgPool,
    entities: EntityStore,
    llm: Arc<LlmClient>,
    syslog: SystemLogger,
    model_name: String,
}

impl SelfHealingResolver {
    pub fn new(
        pool: PgPool,
        entities: EntityStore,
        llm: Arc<LlmClient>,
        syslog: SystemLogger,
        model_name: String,
    ) -> Self {
        Self {
            pool,
            entities,
            llm,
            syslog,
            model_name,
        }
    }

    // ── transactional triple writes ──────────────────────────

    /// FILL: write an empty field from article evidence. One transaction
    /// covering the field update (+ provenance pointer), the
    /// DataUpdateLog row, and the AutoResolutionLog row.
    pub async fn apply_fill(
        &self,
        article_id: i64,
        artist_id: i64,
        field: ArtistField,
        new_value: &str,
        gemini_confidence: f64,
        source_reliability: f64,
    ) -> anyhow::Result<()> {
        self.apply_update(
            article_id,
            artist_id,
            field,
            None,
            new_value,
            "FILL",
            None,
            Some(gemini_confidence),
            source_reliability,
        )
        .await
    }

    /// RECONCILE: overwrite a conflicting field after the second LLM call
    /// ruled for the article. Same transactional triple as FILL, with the
    /// model's reasoning recorded.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_reconcile(
        &self,
        article_id: i64,
        artist_id: i64,
        field: ArtistField,
        old_value: &str,
        new_value: &str,
        reasoning: &str,
        gemini_confidence: f64,
        source_reliability: f64,
    ) -> anyhow::Result<()> {
        self.apply_update(
            article_id,
            artist_id,
            field,
            Some(old_value),
            new_value,
            "RECONCILE",
            Some(reasoning),
            Some(gemini_confidence),
            source_reliability,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_update(
        &self,
        article_id: i64,
        artist_id: i64,
        field: ArtistField,
        old_value: Option<&str>,
        new_value: &str,
        resolution_type: &str,
        reasoning: Option<&str>,
        gemini_confidence: Option<f64>,
        source_reliability: f64,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        // column names come from the whitelist enum, never from input
        let update_sql = format!(
            "UPDATE artists SET {} = {}, {} = $3, updated_at = NOW() WHERE id = $1",
            field.column(),
            field.value_cast(),
            field.source_column(),
        );
        sqlx::query(&update_sql)
            .bind(artist_id)
            .bind(new_value)
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO data_update_logs
                (article_id, entity_type, entity_id, field_name,
                 old_value_json, new_value_json, updated_by)
            VALUES ($1, 'ARTIST', $2, $3, $4, $5, 'ai_pipeline')
            "#,
        )
        .bind(article_id)
        .bind(artist_id)
        .bind(field.column())
        .bind(serde_json::json!({ "value": old_value }))
        .bind(serde_json::json!({ "value": new_value }))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO auto_resolution_logs
                (article_id, entity_type, entity_id, field_name,
                 old_value_json, new_value_json, resolution_type,
                 gemini_reasoning, gemini_confidence, source_reliability)
            VALUES ($1, 'ARTIST', $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(article_id)
        .bind(artist_id)
        .bind(field.column())
        .bind(serde_json::json!({ "value": old_value }))
        .bind(serde_json::json!({ "value": new_value }))
        .bind(resolution_type)
        .bind(reasoning)
        .bind(gemini_confidence.map(|c| c as f32))
        .bind(source_reliability.clamp(0.0, 1.0) as f32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            artist_id,
            field = field.column(),
            resolution_type,
            old = ?old_value,
            new = new_value,
            "artist field auto-updated"
        );
        Ok(())
    }

    /// Record an unresolved contradiction.
    pub async fn flag_conflict(
        &self,
        article_id: i64,
        artist_id: i64,
        field: ArtistField,
        existing: &str,
        conflicting: &str,
        reason: &str,
    ) -> anyhow::Result<()> {
        let score = conflict_score(existing, conflicting);
        sqlx::query(
            r#"
            INSERT INTO conflict_flags
                (article_id, entity_type, entity_id, field_name,
                 existing_value_json, conflicting_value_json,
                 conflict_reason, conflict_score)
            VALUES ($1, 'ARTIST', $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(article_id)
        .bind(artist_id)
        .bind(field.column())
        .bind(serde_json::json!({ "value": existing }))
        .bind(serde_json::json!({ "value": conflicting }))
        .bind(reason)
        .bind(score as f32)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            artist_id,
            field = field.column(),
            score,
            existing,
            conflicting,
            "conflict flagged"
        );
        Ok(())
    }

    // ── reconciliation ───────────────────────────────────────

    /// Ask the model which of the two values is more current and
    /// authoritative. Indeterminate answers and call failures return None.
    pub async fn auto_reconcile(
        &self,
        artist_id: i64,
        article_id: i64,
        field: ArtistField,
        db_value: &str,
        detected_value: &str,
        article_context: &str,
    ) -> Option<(ReconcileWinner, String)> {
        let context: String = article_context.chars().take(200).collect();
        let prompt = format!(
            "A K-entertainment database has two conflicting values for one field.\n\
             Decide which value is more current and authoritative, and answer with\n\
             JSON only.\n\n\
             field        : {}\n\
             stored value : \"{}\"\n\
             article value: \"{}\"\n\
             article title: \"{}\"\n\n\
             Answer shape (JSON only, nothing else):\n\
             {{\"winner\": \"article\" | \"db\", \"reason\": \"at most 30 chars\"}}",
            field.column(),
            db_value,
            detected_value,
            context,
        );

        let verdict = match self.llm.generate_json(&self.model_name, &prompt).await {
            Ok((value, _)) => parse_reconcile_verdict(&value),
            Err(e) => {
                tracing::warn!(
                    artist_id,
                    field = field.column(),
                    error = %e,
                    "auto-reconcile call failed"
                );
                None
            }
        };

        if let Some((winner, reason)) = &verdict {
            tracing::info!(
                artist_id,
                field = field.column(),
                winner = ?winner,
                reason = %reason,
                db_value,
                detected_value,
                "auto-reconcile decided"
            );
            self.syslog
                .log(
                    LogCategory::AiProcess,
                    SystemEvent {
                        article_id: Some(article_id),
                        event: "auto_reconcile",
                        message: &format!(
                            "conflict settled: field={} winner={:?}",
                            field.column(),
                            winner
                        ),
                        details: Some(serde_json::json!({
                            "artist_id": artist_id,
                            "field": field.column(),
                            "db_value": db_value,
                            "detected_value": detected_value,
                            "winner": match winner {
                                ReconcileWinner::Article => "article",
                                ReconcileWinner::Db => "db",
                            },
                            "reason": reason,
                        })),
                        ..Default::default()
                    },
                )
                .await;
        }

        verdict
    }

    // ── cross-validation ─────────────────────────────────────

    /// Compare each linked artist detection against its stored profile.
    /// Empty DB field → FILL; agreement → confidence boost; conflict →
    /// auto-reconcile, falling back to a conflict flag. Returns the linked
    /// set with adjusted mapping confidences.
    pub async fn cross_validate(
        &self,
        linked: Vec<LinkedEntity>,
        intelligence: &ArticleIntelligence,
        article_id: i64,
    ) -> Vec<LinkedEntity> {
        if linked.is_empty() {
            return linked;
        }

        let mut updated = Vec::with_capacity(linked.len());

        for mut mapping in linked {
            let Some(artist_id) = mapping.artist_id.filter(|_| {
                mapping.entity_type == EntityType::Artist
            }) else {
                updated.push(mapping);
                continue;
            };

            let profile = match self.entities.get_artist(artist_id).await {
                Ok(Some(profile)) => profile,
                Ok(None) => {
                    updated.push(mapping);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(artist_id, error = %e, "profile lookup failed");
                    updated.push(mapping);
                    continue;
                }
            };

            let Some(detected) = intelligence
                .detected_artists
                .iter()
                .find(|d| d.name_ko == mapping.detected_name_ko)
            else {
                updated.push(mapping);
                continue;
            };

            if let Err(e) = self.entities.touch_last_verified(true, artist_id).await {
                tracing::warn!(artist_id, error = %e, "last_verified_at update failed");
            }

            let mut boost = 0.0;
            let detected_en = detected.name_en.as_deref().unwrap_or("").trim();
            let db_en = profile.name_en.as_deref().unwrap_or("").trim();

            if !detected_en.is_empty() {
                if db_en.is_empty() {
                    // empty field, article supplies a value
                    match self
                        .apply_fill(
                            article_id,
                            artist_id,
                            ArtistField::NameEn,
                            detected_en,
                            detected.confidence_score,
                            intelligence.confidence,
                        )
                        .await
                    {
                        Ok(()) => boost += VALIDATION_BOOST,
                        Err(e) => {
                            tracing::warn!(artist_id, error = %e, "FILL failed");
                        }
                    }
                } else if detected_en.eq_ignore_ascii_case(db_en) {
                    // agreement strengthens the mapping
                    boost += VALIDATION_BOOST;
                    tracing::debug!(artist_id, name_en = db_en, "name_en confirmed");
                } else {
                    match self
                        .auto_reconcile(
                            artist_id,
                            article_id,
                            ArtistField::NameEn,
                            db_en,
                            detected_en,
                            &intelligence.title_ko,
                        )
                        .await
                    {
                        Some((ReconcileWinner::Article, reason)) => {
                            if let Err(e) = self
                                .apply_reconcile(
                                    article_id,
                                    artist_id,
                                    ArtistField::NameEn,
                                    db_en,
                                    detected_en,
                                    &reason,
                                    detected.confidence_score,
                                    intelligence.confidence,
                                )
                                .await
                            {
                                tracing::warn!(artist_id, error = %e, "RECONCILE failed");
                            }
                        }
                        Some((ReconcileWinner::Db, _)) => {
                            // stored value stands; nothing changed so no
                            // resolution log is written
                        }
                        None => {
                            if let Err(e) = self
                                .flag_conflict(
                                    article_id,
                                    artist_id,
                                    ArtistField::NameEn,
                                    db_en,
                                    detected_en,
                                    "Auto-Reconcile 판단 불가: no usable model verdict",
                                )
                                .await
                            {
                                tracing::warn!(artist_id, error = %e, "conflict flag failed");
                            }
                        }
                    }
                }
            }

            mapping.match_score = (mapping.match_score + boost).min(1.0);
            updated.push(mapping);
        }

        updated
    }

    // ── glossary enrollment ──────────────────────────────────

    /// Auto-provision glossary terms for detections that matched nothing in
    /// the registry and carry an English name. Returns the number of terms
    /// newly enrolled.
    pub async fn enroll_new_entities(
        &self,
        detected: &[DetectedEntity],
        linked: &[LinkedEntity],
        article_id: i64,
    ) -> usize {
        let linked_names: std::collections::HashSet<&str> = linked
            .iter()
            .filter(|l| l.is_linked())
            .map(|l| l.detected_name_ko.as_str())
            .collect();

        let mut enrolled = 0;

        for entity in detected {
            if linked_names.contains(entity.name_ko.as_str()) {
                continue;
            }
            let Some(name_en) = entity.name_en.as_deref().map(str::trim).filter(|n| !n.is_empty())
            else {
                tracing::debug!(name_ko = %entity.name_ko, "no English name, enrollment skipped");
                continue;
            };

            let category = match entity.entity_type {
                EntityType::Artist | EntityType::Group => GlossaryCategory::Artist,
                EntityType::Event => GlossaryCategory::Event,
            };

            match self
                .entities
                .enroll_glossary_term(&entity.name_ko, name_en, category, Some(article_id))
                .await
            {
                Ok(true) => {
                    enrolled += 1;
                    if let Err(e) = self
                        .log_enrollment(article_id, entity, name_en)
                        .await
                    {
                        tracing::warn!(term = %entity.name_ko, error = %e, "ENROLL log failed");
                    }
                    tracing::info!(
                        term_ko = %entity.name_ko,
                        term_en = name_en,
                        category = category.as_str(),
                        "glossary term auto-provisioned"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(term = %entity.name_ko, error = %e, "enrollment failed");
                }
            }
        }

        if enrolled > 0 {
            tracing::info!(article_id, enrolled, "new glossary terms enrolled");
        }
        enrolled
    }

    async fn log_enrollment(
        &self,
        article_id: i64,
        entity: &DetectedEntity,
        name_en: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO auto_resolution_logs
                (article_id, entity_type, entity_id, field_name,
                 old_value_json, new_value_json, resolution_type,
                 gemini_reasoning, gemini_confidence, source_reliability)
            VALUES ($1, $2, 0, 'glossary_term', NULL, $3, 'ENROLL', $4, $5, 0.0)
            "#,
        )
        .bind(article_id)
        .bind(entity.entity_type.as_str())
        .bind(serde_json::json!({ "term_ko": entity.name_ko, "term_en": name_en }))
        .bind(format!("Auto-Provisioned: {} → {}", entity.name_ko, name_en))
        .bind(entity.confidence_score as f32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_column_mapping() {
        assert_eq!(ArtistField::NameEn.column(), "name_en");
        assert_eq!(ArtistField::NameEn.source_column(), "name_source_article_id");
        assert_eq!(ArtistField::HeightCm.source_column(), "body_source_article_id");
        assert_eq!(ArtistField::WeightKg.source_column(), "body_source_article_id");
        assert_eq!(
            ArtistField::NationalityEn.source_column(),
            "nationality_source_article_id"
        );
    }

    #[test]
    fn test_numeric_fields_cast() {
        assert_eq!(ArtistField::HeightCm.value_cast(), "$2::integer");
        assert_eq!(ArtistField::NameEn.value_cast(), "$2");
    }

    #[test]
    fn test_conflict_score_identical_is_zero() {
        assert_eq!(conflict_score("Jisoo", "jisoo"), 0.0);
    }

    #[test]
    fn test_conflict_score_disjoint_is_high() {
        let score = conflict_score("abc", "xyz");
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_conflict_score_partial_overlap() {
        // chars(jisoo) = {j,i,s,o}; chars(jiso) = {j,i,s,o}; overlap 4, max len 5
        let score = conflict_score("Jisoo", "Jiso");
        assert!((score - 0.2).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_parse_reconcile_verdict() {
        let v = serde_json::json!({"winner": "article", "reason": "official spelling"});
        let (winner, reason) = parse_reconcile_verdict(&v).unwrap();
        assert_eq!(winner, ReconcileWinner::Article);
        assert_eq!(reason, "official spelling");

        let v = serde_json::json!({"winner": "db", "reason": "db is canonical"});
        assert_eq!(parse_reconcile_verdict(&v).unwrap().0, ReconcileWinner::Db);
    }

    #[test]
    fn test_parse_reconcile_verdict_indeterminate() {
        assert!(parse_reconcile_verdict(&serde_json::json!({"winner": "maybe"})).is_none());
        assert!(parse_reconcile_verdict(&serde_json::json!({"reason": "no winner"})).is_none());
        assert!(parse_reconcile_verdict(&serde_json::json!("article")).is_none());
    }
}
