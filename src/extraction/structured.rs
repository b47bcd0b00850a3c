//! Regex-driven structured extraction: emails, phones, addresses, social
//! handles, and an optional tech-stack dictionary match.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const CONTEXT_WINDOW: usize = 100;
const DISPOSABLE_DOMAINS: &[&str] = &["mailinator.com", "tempmail.com", "10minutemail.com", "guerrillamail.com"];
const EXAMPLE_DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "test.com", "domain.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredKind {
    Email,
    Phone,
    Address,
    SocialHandle,
    TechStack,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StructuredItem {
    pub kind: StructuredKind,
    pub value: String,
    pub normalized: String,
    pub confidence: f64,
    pub context: String,
    #[serde(default)]
    pub extra_data: std::collections::HashMap<String, serde_json::Value>,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[a-z0-9._%+\-]+\s*(?:@|\[at\])\s*[a-z0-9.\-]+\s*(?:\.|\[dot\])\s*[a-z]{2,}")
            .expect("valid email regex")
    })
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\+?1[\s.\-]?)?\(?\d{3}\)?[\s.\-]\d{3}[\s.\-]\d{4}").expect("valid phone regex")
    })
}

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\d+\s+[A-Za-z0-9.'\s]{2,40}\s(?:St|Street|Ave|Avenue|Blvd|Boulevard|Rd|Road|Ln|Lane|Dr|Drive|Way|Suite|Ste)\.?(?:\s+\w+)?(?:,\s*[A-Za-z.\s]+)?(?:,\s*[A-Z]{2}\s*\d{5}(-\d{4})?)?",
        )
        .expect("valid address regex")
    })
}

fn social_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:https?://)?(?:www\.)?(linkedin|twitter|x|facebook|instagram|youtube|github)\.com/([A-Za-z0-9_\-./]+)",
        )
        .expect("valid social handle regex")
    })
}

fn tech_dictionary() -> &'static [(&'static str, &'static str)] {
    &[
        ("rust", "languages"),
        ("python", "languages"),
        ("typescript", "languages"),
        ("golang", "languages"),
        ("react", "frameworks"),
        ("django", "frameworks"),
        ("rails", "frameworks"),
        ("kubernetes", "cloud"),
        ("postgresql", "databases"),
        ("mongodb", "databases"),
        ("redis", "databases"),
        ("aws", "cloud"),
        ("gcp", "cloud"),
        ("azure", "cloud"),
    ]
}

fn context_window(text: &str, start: usize, end: usize) -> String {
    let from = start.saturating_sub(CONTEXT_WINDOW / 2);
    let to = (end + CONTEXT_WINDOW / 2).min(text.len());
    let from = text
        .char_indices()
        .map(|(i, _)| i)
        .filter(|i| *i <= from)
        .last()
        .unwrap_or(0);
    let to = text
        .char_indices()
        .map(|(i, _)| i)
        .find(|i| *i >= to)
        .unwrap_or(text.len());
    text[from..to].trim().to_string()
}

fn normalize_email(raw: &str) -> String {
    raw.replace("[at]", "@")
        .replace("[dot]", ".")
        .replace(char::is_whitespace, "")
        .to_lowercase()
}

fn is_valid_email(normalized: &str) -> bool {
    let Some((_, domain)) = normalized.split_once('@') else {
        return false;
    };
    !DISPOSABLE_DOMAINS.contains(&domain) && !EXAMPLE_DOMAINS.contains(&domain)
}

fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Extract every configured structured item from `text`, deduped within the
/// document by normalized value.
pub fn extract(text: &str, extract_tech_stack: bool) -> Vec<StructuredItem> {
    let mut items = Vec::new();
    let mut seen: HashSet<(StructuredKind, String)> = HashSet::new();

    for m in email_regex().find_iter(text) {
        let normalized = normalize_email(m.as_str());
        if !is_valid_email(&normalized) {
            continue;
        }
        if seen.insert((StructuredKind::Email, normalized.clone())) {
            items.push(StructuredItem {
                kind: StructuredKind::Email,
                value: m.as_str().to_string(),
                normalized,
                confidence: 0.9,
                context: context_window(text, m.start(), m.end()),
                extra_data: Default::default(),
            });
        }
    }

    for m in phone_regex().find_iter(text) {
        let normalized = normalize_phone(m.as_str());
        if normalized.len() < 10 {
            continue;
        }
        if seen.insert((StructuredKind::Phone, normalized.clone())) {
            items.push(StructuredItem {
                kind: StructuredKind::Phone,
                value: m.as_str().to_string(),
                normalized,
                confidence: 0.8,
                context: context_window(text, m.start(), m.end()),
                extra_data: Default::default(),
            });
        }
    }

    for m in address_regex().find_iter(text) {
        let normalized = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if seen.insert((StructuredKind::Address, normalized.clone())) {
            items.push(StructuredItem {
                kind: StructuredKind::Address,
                value: m.as_str().trim().to_string(),
                normalized,
                confidence: 0.6,
                context: context_window(text, m.start(), m.end()),
                extra_data: Default::default(),
            });
        }
    }

    for m in social_url_regex().captures_iter(text) {
        let platform = m.get(1).map(|p| p.as_str().to_lowercase()).unwrap_or_default();
        let handle = m.get(2).map(|h| h.as_str().trim_matches('/').to_string()).unwrap_or_default();
        if handle.is_empty() {
            continue;
        }
        let normalized = format!("{platform}:{}", handle.to_lowercase());
        if seen.insert((StructuredKind::SocialHandle, normalized.clone())) {
            let mut extra = std::collections::HashMap::new();
            extra.insert("platform".to_string(), serde_json::json!(platform));
            let whole = m.get(0).unwrap();
            items.push(StructuredItem {
                kind: StructuredKind::SocialHandle,
                value: whole.as_str().to_string(),
                normalized,
                confidence: 0.8,
                context: context_window(text, whole.start(), whole.end()),
                extra_data: extra,
            });
        }
    }

    if extract_tech_stack {
        let lower = text.to_lowercase();
        let mut counts: std::collections::HashMap<&str, (u32, &str)> = std::collections::HashMap::new();
        for (name, category) in tech_dictionary() {
            let count = lower.matches(name).count() as u32;
            if count > 0 {
                counts.insert(name, (count, category));
            }
        }
        for (name, (count, category)) in counts {
            let normalized = name.to_string();
            if seen.insert((StructuredKind::TechStack, normalized.clone())) {
                let confidence = (0.5 + 0.1 * (count.min(3) as f64)).min(0.9);
                let mut extra = std::collections::HashMap::new();
                extra.insert("category".to_string(), serde_json::json!(category));
                extra.insert("mentions".to_string(), serde_json::json!(count));
                items.push(StructuredItem {
                    kind: StructuredKind::TechStack,
                    value: name.to_string(),
                    normalized,
                    confidence,
                    context: String::new(),
                    extra_data: extra,
                });
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_extracted_and_normalized() {
        let items = extract("Contact us at Hello@Acme.com for details.", false);
        let email = items.iter().find(|i| i.kind == StructuredKind::Email).unwrap();
        assert_eq!(email.normalized, "hello@acme.com");
    }

    #[test]
    fn test_obfuscated_email_repaired() {
        let items = extract("reach me at jane [at] acme [dot] com", false);
        let email = items.iter().find(|i| i.kind == StructuredKind::Email).unwrap();
        assert_eq!(email.normalized, "jane@acme.com");
    }

    #[test]
    fn test_example_domain_rejected() {
        let items = extract("contact test@example.com", false);
        assert!(!items.iter().any(|i| i.kind == StructuredKind::Email));
    }

    #[test]
    fn test_phone_normalized_to_digits() {
        let items = extract("Call us at (415) 555-0199 anytime.", false);
        let phone = items.iter().find(|i| i.kind == StructuredKind::Phone).unwrap();
        assert_eq!(phone.normalized, "4155550199");
    }

    #[test]
    fn test_phone_with_country_prefix() {
        let items = extract("Call +1 415-555-0199 now.", false);
        let phone = items.iter().find(|i| i.kind == StructuredKind::Phone).unwrap();
        assert_eq!(phone.normalized, "4155550199");
    }

    #[test]
    fn test_address_extracted() {
        let items = extract("Visit us at 123 Main Street, Springfield, IL 62704.", false);
        assert!(items.iter().any(|i| i.kind == StructuredKind::Address));
    }

    #[test]
    fn test_tech_stack_disabled_by_default() {
        let items = extract("We use Rust and PostgreSQL everywhere.", false);
        assert!(!items.iter().any(|i| i.kind == StructuredKind::TechStack));
    }

    #[test]
    fn test_tech_stack_enabled_boosts_repeated_mentions() {
        let items = extract("Rust Rust Rust is great. We also use Rust daily.", true);
        let rust = items.iter().find(|i| i.normalized == "rust").unwrap();
        assert!(rust.confidence > 0.7);
    }

    #[test]
    fn test_duplicate_emails_collapsed() {
        let items = extract("a@acme.com and again A@ACME.com", false);
        assert_eq!(items.iter().filter(|i| i.kind == StructuredKind::Email).count(), 1);
    }
}
