//! Merges same-type entity candidates into canonical groups using per-type
//! matching rules and a longest-common-subsequence similarity ratio.

use std::collections::{HashMap, HashSet};

use crate::models::{Entity, EntityType};

const SIMILARITY_THRESHOLD: f64 = 0.85;
const LEGAL_SUFFIXES: &[&str] = &["inc", "llc", "ltd", "corp", "corporation", "company", "co", "limited"];

/// `2 * LCS(a, b) / (|a| + |b|)`.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let lcs = lcs_len(a, b) as f64;
    (2.0 * lcs) / (a.len() + b.len()) as f64
}

fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

fn normalize_org(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut words: Vec<&str> = lower.split_whitespace().collect();
    while let Some(last) = words.last() {
        let stripped: String = last.chars().filter(|c| c.is_alphanumeric()).collect();
        if LEGAL_SUFFIXES.contains(&stripped.as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    words
        .join(" ")
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn person_names_match(a: &str, b: &str) -> bool {
    let a_fold = a.trim().to_lowercase();
    let b_fold = b.trim().to_lowercase();
    if a_fold == b_fold {
        return true;
    }

    let a_tokens: Vec<&str> = a_fold.split_whitespace().collect();
    let b_tokens: Vec<&str> = b_fold.split_whitespace().collect();
    if a_tokens.len() < 2 || b_tokens.len() < 2 {
        return false;
    }
    if a_tokens.last() != b_tokens.last() {
        return false;
    }

    let a_first = a_tokens[0];
    let b_first = b_tokens[0];
    a_first == b_first
        || (a_first.chars().count() == 1 && b_first.starts_with(a_first))
        || (b_first.chars().count() == 1 && a_first.starts_with(b_first))
}

fn fits_group(entity_type: EntityType, candidate: &str, canonical: &str) -> bool {
    match entity_type {
        EntityType::Email | EntityType::Phone => candidate == canonical,
        EntityType::Person => person_names_match(candidate, canonical),
        EntityType::Org => {
            let (a, b) = (normalize_org(candidate), normalize_org(canonical));
            a == b || a.contains(&b) || b.contains(&a) || similarity_ratio(&a, &b) >= SIMILARITY_THRESHOLD
        }
        _ => {
            let (a, b) = (candidate.to_lowercase(), canonical.to_lowercase());
            similarity_ratio(&a, &b) >= SIMILARITY_THRESHOLD
        }
    }
}

/// Greedily group `entities` of a single type and merge each group.
pub fn dedupe(entities: Vec<Entity>) -> Vec<Entity> {
    let mut by_type: HashMap<EntityType, Vec<Entity>> = HashMap::new();
    for e in entities {
        by_type.entry(e.entity_type).or_default().push(e);
    }

    let mut merged = Vec::new();
    for (entity_type, items) in by_type {
        let mut groups: Vec<Vec<Entity>> = Vec::new();
        for item in items {
            let target = groups
                .iter_mut()
                .find(|g| fits_group(entity_type, &item.value, &g[0].value));
            match target {
                Some(group) => group.push(item),
                None => groups.push(vec![item]),
            }
        }
        for group in groups {
            merged.push(merge_group(group));
        }
    }
    merged
}

fn merge_group(group: Vec<Entity>) -> Entity {
    let canonical = group
        .iter()
        .max_by_key(|e| e.value.len())
        .cloned()
        .expect("non-empty group");

    let max_confidence = group.iter().map(|e| e.confidence).fold(0.0_f64, f64::max);
    let bonus = (0.02 * group.len() as f64).min(0.2);

    let mut source_urls: HashSet<String> = HashSet::new();
    let mut contexts: HashSet<String> = HashSet::new();
    let mut roles: HashSet<String> = HashSet::new();
    let mut relationships: HashSet<String> = HashSet::new();
    let mut mention_count = 0u32;

    for e in &group {
        source_urls.extend(e.source_urls.iter().cloned());
        if let Some(ctx) = &e.context {
            contexts.insert(ctx.clone());
        }
        mention_count += e.mention_count.max(1);
        if let Some(r) = e.extra_data.get("role").and_then(|v| v.as_str()) {
            roles.insert(r.to_string());
        }
        if let Some(rels) = e.extra_data.get("relationships").and_then(|v| v.as_array()) {
            for r in rels {
                if let Some(s) = r.as_str() {
                    relationships.insert(s.to_string());
                }
            }
        }
    }

    let mut extra_data = canonical.extra_data.clone();
    if !roles.is_empty() {
        extra_data.insert("roles".to_string(), serde_json::json!(roles.into_iter().collect::<Vec<_>>()));
    }
    if !relationships.is_empty() {
        extra_data.insert(
            "relationships".to_string(),
            serde_json::json!(relationships.into_iter().collect::<Vec<_>>()),
        );
    }

    Entity {
        id: canonical.id,
        company_id: canonical.company_id,
        entity_type: canonical.entity_type,
        value: canonical.value,
        context: contexts.into_iter().next(),
        source_urls: source_urls.into_iter().collect(),
        confidence: (max_confidence + bonus).min(1.0),
        extra_data,
        mention_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, entity_type: EntityType, value: &str, confidence: f64) -> Entity {
        Entity {
            id: id.to_string(),
            company_id: "c1".to_string(),
            entity_type,
            value: value.to_string(),
            context: None,
            source_urls: vec![format!("https://example.com/{id}")],
            confidence,
            extra_data: Default::default(),
            mention_count: 1,
        }
    }

    #[test]
    fn test_similarity_ratio_identical() {
        assert_eq!(similarity_ratio("acme", "acme"), 1.0);
    }

    #[test]
    fn test_similarity_ratio_partial() {
        let r = similarity_ratio("acme corp", "acme corporation");
        assert!(r > 0.7 && r < 1.0);
    }

    #[test]
    fn test_email_exact_match_dedup() {
        let entities = vec![
            entity("e1", EntityType::Email, "a@acme.com", 0.9),
            entity("e2", EntityType::Email, "a@acme.com", 0.8),
        ];
        let merged = dedupe(entities);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].mention_count, 2);
    }

    #[test]
    fn test_person_initial_matches_full_name() {
        let entities = vec![
            entity("e1", EntityType::Person, "J. Smith", 0.7),
            entity("e2", EntityType::Person, "Jane Smith", 0.8),
        ];
        let merged = dedupe(entities);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].value, "Jane Smith");
    }

    #[test]
    fn test_org_legal_suffix_normalized() {
        let entities = vec![
            entity("e1", EntityType::Org, "Acme Inc", 0.7),
            entity("e2", EntityType::Org, "Acme Corporation", 0.8),
        ];
        let merged = dedupe(entities);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_unrelated_entities_not_merged() {
        let entities = vec![
            entity("e1", EntityType::Org, "Acme Inc", 0.7),
            entity("e2", EntityType::Org, "Globex Corporation", 0.8),
        ];
        let merged = dedupe(entities);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_confidence_bonus_capped() {
        let entities: Vec<Entity> = (0..20)
            .map(|i| entity(&format!("e{i}"), EntityType::Email, "a@acme.com", 0.9))
            .collect();
        let merged = dedupe(entities);
        assert!(merged[0].confidence <= 1.0);
    }
}
