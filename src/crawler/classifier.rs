//! Assigns a page-type tag from URL and content pattern rules with
//! confidence scoring.

use regex::Regex;
use std::sync::OnceLock;

/// Page types, ordered by crawl priority tier (lower = sooner, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    About,
    Team,
    Product,
    Service,
    Contact,
    Careers,
    Pricing,
    Blog,
    News,
    Other,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::About => "about",
            PageType::Team => "team",
            PageType::Product => "product",
            PageType::Service => "service",
            PageType::Contact => "contact",
            PageType::Careers => "careers",
            PageType::Pricing => "pricing",
            PageType::Blog => "blog",
            PageType::News => "news",
            PageType::Other => "other",
        }
    }

    /// Priority tier used to order the crawl queue (§4.5).
    pub fn priority(&self) -> u32 {
        match self {
            PageType::About => 1,
            PageType::Team => 2,
            PageType::Product => 3,
            PageType::Service => 4,
            PageType::Contact => 5,
            PageType::Careers => 6,
            PageType::Pricing => 7,
            PageType::Blog => 8,
            PageType::News => 9,
            PageType::Other => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Url,
    Content,
    Combined,
    Default,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Classification {
    pub page_type: PageType,
    pub confidence: f64,
    pub match_source: MatchSource,
    pub matched_patterns: Vec<String>,
}

struct PatternRule {
    regex: Regex,
    confidence: f64,
}

fn url_rules() -> &'static Vec<(PageType, Vec<PatternRule>)> {
    static RULES: OnceLock<Vec<(PageType, Vec<PatternRule>)>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            (PageType::About, vec![rule(r"/about(-us)?/?$", 0.9), rule(r"/company/?$", 0.75)]),
            (PageType::Team, vec![rule(r"/(our-)?team/?", 0.9), rule(r"/people/?$", 0.8), rule(r"/leadership/?", 0.85)]),
            (PageType::Product, vec![rule(r"/products?/?", 0.85), rule(r"/solutions?/?", 0.7)]),
            (PageType::Service, vec![rule(r"/services?/?", 0.85)]),
            (PageType::Contact, vec![rule(r"/contact(-us)?/?$", 0.9)]),
            (PageType::Careers, vec![rule(r"/careers?/?", 0.9), rule(r"/jobs/?", 0.85), rule(r"/join-us/?", 0.75)]),
            (PageType::Pricing, vec![rule(r"/pricing/?$", 0.9), rule(r"/plans/?$", 0.7)]),
            (PageType::Blog, vec![rule(r"/blog(/|$)", 0.85), rule(r"/articles?/", 0.7)]),
            (PageType::News, vec![rule(r"/news(/|$)", 0.85), rule(r"/press(-releases?)?/?", 0.8)]),
        ]
    })
}

fn content_rules() -> &'static Vec<(PageType, Vec<PatternRule>)> {
    static RULES: OnceLock<Vec<(PageType, Vec<PatternRule>)>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            (PageType::About, vec![rule(r"(?i)our mission", 0.6), rule(r"(?i)founded in \d{4}", 0.55)]),
            (PageType::Team, vec![rule(r"(?i)meet the team", 0.65), rule(r"(?i)(chief|co-)?founder", 0.5)]),
            (PageType::Product, vec![rule(r"(?i)(features|pricing tiers?|get started)", 0.5)]),
            (PageType::Service, vec![rule(r"(?i)our services include", 0.55)]),
            (PageType::Contact, vec![rule(r"(?i)(get in touch|contact us|email us)", 0.6)]),
            (PageType::Careers, vec![rule(r"(?i)(we're hiring|open positions|apply now)", 0.65)]),
            (PageType::Pricing, vec![rule(r"(?i)(\$\d+\s*/\s*(mo|month|year)|free trial)", 0.55)]),
            (PageType::Blog, vec![rule(r"(?i)(posted on|by\s+\w+\s+\w+\s+on)", 0.45)]),
            (PageType::News, vec![rule(r"(?i)(press release|announces|today announced)", 0.55)]),
        ]
    })
}

fn rule(pattern: &str, confidence: f64) -> PatternRule {
    PatternRule {
        regex: Regex::new(pattern).expect("valid classifier regex"),
        confidence,
    }
}

fn best_match(rules: &[(PageType, Vec<PatternRule>)], haystack: &str) -> Option<(PageType, f64, String)> {
    rules
        .iter()
        .flat_map(|(pt, patterns)| {
            patterns
                .iter()
                .filter(|p| p.regex.is_match(haystack))
                .map(move |p| (*pt, p.confidence, p.regex.as_str().to_string()))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Classify a page from its URL and (optional) extracted text.
pub fn classify(url: &str, text: Option<&str>) -> Classification {
    let url_match = best_match(url_rules(), url);
    let content_match = text.and_then(|t| best_match(content_rules(), t));

    match (url_match, content_match) {
        (Some((u_type, u_conf, u_pat)), Some((c_type, c_conf, c_pat))) if u_type == c_type => {
            Classification {
                page_type: u_type,
                confidence: ((u_conf + c_conf) / 1.5).min(1.0),
                match_source: MatchSource::Combined,
                matched_patterns: vec![u_pat, c_pat],
            }
        }
        (Some((u_type, u_conf, u_pat)), Some((c_type, c_conf, c_pat))) => {
            // Moderate disagreement: take the higher-confidence source with a 10% penalty.
            if u_conf >= c_conf {
                Classification {
                    page_type: u_type,
                    confidence: (u_conf * 0.9).max(0.0),
                    match_source: MatchSource::Url,
                    matched_patterns: vec![u_pat],
                }
            } else {
                Classification {
                    page_type: c_type,
                    confidence: (c_conf * 0.9).max(0.0),
                    match_source: MatchSource::Content,
                    matched_patterns: vec![c_pat],
                }
            }
        }
        (Some((u_type, u_conf, u_pat)), None) => Classification {
            page_type: u_type,
            confidence: u_conf,
            match_source: MatchSource::Url,
            matched_patterns: vec![u_pat],
        },
        (None, Some((c_type, c_conf, c_pat))) => Classification {
            page_type: c_type,
            confidence: c_conf,
            match_source: MatchSource::Content,
            matched_patterns: vec![c_pat],
        },
        (None, None) => Classification {
            page_type: PageType::Other,
            confidence: 0.3,
            match_source: MatchSource::Default,
            matched_patterns: vec![],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_only_classification() {
        let c = classify("https://example.com/about", None);
        assert_eq!(c.page_type, PageType::About);
        assert_eq!(c.match_source, MatchSource::Url);
    }

    #[test]
    fn test_combined_agreement_boosts_confidence() {
        let c = classify("https://example.com/careers", Some("We're hiring across every team."));
        assert_eq!(c.page_type, PageType::Careers);
        assert_eq!(c.match_source, MatchSource::Combined);
        assert!(c.confidence > 0.9);
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let c = classify("https://example.com/xyz123", Some("lorem ipsum"));
        assert_eq!(c.page_type, PageType::Other);
        assert_eq!(c.match_source, MatchSource::Default);
    }

    #[test]
    fn test_content_only_classification() {
        let c = classify("https://example.com/p/9981", Some("Meet the team behind our mission."));
        assert_eq!(c.match_source, MatchSource::Content);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PageType::About.priority() < PageType::News.priority());
        assert_eq!(PageType::Other.priority(), 10);
    }
}
