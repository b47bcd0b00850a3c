//! Named-entity extraction: wraps an external NER model, maps its label
//! taxonomy onto the domain's `EntityType`, and scores/contextualizes spans.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::EntityType;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;
const CONTEXT_WINDOW: usize = 100;

/// One span reported by a `NerModel`, prior to domain mapping.
#[derive(Debug, Clone)]
pub struct RawSpan {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// External collaborator: recognizes named-entity spans in raw text.
#[async_trait::async_trait]
pub trait NerModel: Send + Sync {
    async fn recognize(&self, text: &str) -> Vec<RawSpan>;
}

/// Deterministic, regex-backed stand-in for a model server: capitalized runs
/// tagged PERSON, runs ending in a corporate suffix tagged ORG. Suitable for
/// tests and for environments with no model server configured.
pub struct HeuristicNerModel;

fn capitalized_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-zA-Z'\-]+(?:\s+[A-Z][a-zA-Z'\-]+){0,3})\b").expect("valid regex")
    })
}

fn org_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][\w&\-]*(?:\s+[A-Z][\w&\-]*)*\s+(?:Inc|LLC|Ltd|Corp|Corporation|Company)\.?)\b")
            .expect("valid regex")
    })
}

#[async_trait::async_trait]
impl NerModel for HeuristicNerModel {
    async fn recognize(&self, text: &str) -> Vec<RawSpan> {
        let mut spans = Vec::new();
        for m in org_suffix_regex().find_iter(text) {
            spans.push(RawSpan {
                text: m.as_str().to_string(),
                label: "ORG".to_string(),
                start: m.start(),
                end: m.end(),
            });
        }
        for m in capitalized_run_regex().find_iter(text) {
            if spans.iter().any(|s| s.start <= m.start() && m.end() <= s.end()) {
                continue;
            }
            spans.push(RawSpan {
                text: m.as_str().to_string(),
                label: "PERSON".to_string(),
                start: m.start(),
                end: m.end(),
            });
        }
        spans
    }
}

fn map_label(label: &str) -> Option<EntityType> {
    match label {
        "PERSON" => Some(EntityType::Person),
        "ORG" | "NORP" | "LAW" => Some(EntityType::Org),
        "GPE" | "LOC" | "FAC" => Some(EntityType::Location),
        "PRODUCT" | "WORK_OF_ART" => Some(EntityType::Product),
        "DATE" | "TIME" | "EVENT" => Some(EntityType::Date),
        "MONEY" | "PERCENT" => Some(EntityType::Money),
        _ => None,
    }
}

fn score(span_text: &str) -> f64 {
    let words: Vec<&str> = span_text.split_whitespace().collect();
    let mut confidence: f64 = 0.70;
    if span_text.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        confidence -= 0.30;
    }
    if span_text.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        confidence += 0.10;
    }
    confidence += (0.05 * (words.len().saturating_sub(1)) as f64).min(0.15);
    if span_text.len() > 3 && span_text.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()) {
        confidence -= 0.10;
    }
    confidence.clamp(0.0, 1.0)
}

fn context_window(text: &str, start: usize, end: usize) -> String {
    let from = start.saturating_sub(CONTEXT_WINDOW / 2);
    let to = (end + CONTEXT_WINDOW / 2).min(text.len());
    let from = text.char_indices().map(|(i, _)| i).filter(|i| *i <= from).last().unwrap_or(0);
    let to = text.char_indices().map(|(i, _)| i).find(|i| *i >= to).unwrap_or(text.len());
    let mut window = text[from..to].trim().to_string();
    if from > 0 {
        window = format!("...{window}");
    }
    if to < text.len() {
        window.push_str("...");
    }
    window
}

fn role_table() -> &'static [(&'static str, &'static str)] {
    &[
        (r"(?i)\bCEO\b|chief executive officer", "CEO"),
        (r"(?i)\bCTO\b|chief technology officer", "CTO"),
        (r"(?i)\bCFO\b|chief financial officer", "CFO"),
        (r"(?i)\bfounder\b|\bco-founder\b", "Founder"),
        (r"(?i)\bpresident\b", "President"),
        (r"(?i)VP of ([A-Za-z ]+)", "VP"),
        (r"(?i)director of ([A-Za-z ]+)", "Director"),
        (r"(?i)head of ([A-Za-z ]+)", "Head"),
        (r"(?i)\bengineer\b", "Engineer"),
    ]
}

fn detect_role(context: &str) -> Option<String> {
    for (pattern, label) in role_table() {
        if Regex::new(pattern).expect("valid role regex").is_match(context) {
            return Some(label.to_string());
        }
    }
    None
}

fn relationship_table() -> &'static [(&'static str, &'static str)] {
    &[
        (r"(?i)\bpartner(ed|ship)?\b", "partner"),
        (r"(?i)\bclient\b", "client"),
        (r"(?i)\binvestor\b", "investor"),
        (r"(?i)\bcompetitor\b", "competitor"),
        (r"(?i)\bacquir(ed|es|ing)\b", "acquired"),
    ]
}

fn detect_relationships(context: &str) -> Vec<String> {
    relationship_table()
        .iter()
        .filter(|(pattern, _)| Regex::new(pattern).expect("valid relationship regex").is_match(context))
        .map(|(_, label)| label.to_string())
        .collect()
}

/// A scored, context-carrying entity candidate prior to deduplication.
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: f64,
    pub context: String,
    pub role: Option<String>,
    pub relationships: Vec<String>,
}

pub struct NamedEntityExtractor<M: NerModel> {
    model: M,
    min_confidence: f64,
}

impl<M: NerModel> NamedEntityExtractor<M> {
    pub fn new(model: M) -> Self {
        NamedEntityExtractor {
            model,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub async fn extract(&self, text: &str) -> Vec<ExtractedEntity> {
        let spans = self.model.recognize(text).await;
        let mut out = Vec::new();

        for span in spans {
            let Some(entity_type) = map_label(&span.label) else {
                continue;
            };
            let confidence = score(&span.text);
            if confidence < self.min_confidence {
                continue;
            }

            let context = context_window(text, span.start, span.end);
            let (role, relationships) = match entity_type {
                EntityType::Person => (detect_role(&context), vec![]),
                EntityType::Org => (None, detect_relationships(&context)),
                _ => (None, vec![]),
            };

            out.push(ExtractedEntity {
                entity_type,
                value: span.text,
                confidence,
                context,
                role,
                relationships,
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_person_detected_with_role() {
        let extractor = NamedEntityExtractor::new(HeuristicNerModel);
        let entities = extractor
            .extract("Jane Smith is the CEO of the company.")
            .await;
        let person = entities.iter().find(|e| e.entity_type == EntityType::Person).unwrap();
        assert_eq!(person.value, "Jane Smith");
        assert_eq!(person.role.as_deref(), Some("CEO"));
    }

    #[tokio::test]
    async fn test_org_detected_with_relationship() {
        let extractor = NamedEntityExtractor::new(HeuristicNerModel);
        let entities = extractor
            .extract("Acme Corp is a key investor in our product.")
            .await;
        let org = entities.iter().find(|e| e.entity_type == EntityType::Org).unwrap();
        assert!(org.relationships.contains(&"investor".to_string()));
    }

    #[tokio::test]
    async fn test_low_confidence_spans_dropped() {
        let extractor = NamedEntityExtractor::new(HeuristicNerModel).with_min_confidence(0.99);
        let entities = extractor.extract("Jane Smith works here.").await;
        assert!(entities.is_empty());
    }

    #[test]
    fn test_score_boosts_multiword_uppercase() {
        assert!(score("Jane Smith") > score("jane"));
    }

    #[test]
    fn test_context_window_truncation_markers() {
        let text = "a".repeat(200);
        let window = context_window(&text, 100, 101);
        assert!(window.starts_with("..."));
        assert!(window.ends_with("..."));
    }
}
