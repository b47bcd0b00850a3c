//! Detects social-platform links among a page's outgoing anchors and filters
//! them to the set a Company is configured to follow.

use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

const HANDLE_BLOCKLIST: &[&str] = &["share", "login", "signin", "signup", "intent", "sharer", "home"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Linkedin,
    Twitter,
    Facebook,
    Instagram,
    Youtube,
    Github,
}

impl SocialPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Linkedin => "linkedin",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Github => "github",
        }
    }

    fn hosts(&self) -> &'static [&'static str] {
        match self {
            SocialPlatform::Linkedin => &["linkedin.com", "www.linkedin.com"],
            SocialPlatform::Twitter => &["twitter.com", "x.com", "www.twitter.com", "www.x.com"],
            SocialPlatform::Facebook => &["facebook.com", "www.facebook.com", "fb.com"],
            SocialPlatform::Instagram => &["instagram.com", "www.instagram.com"],
            SocialPlatform::Youtube => &["youtube.com", "www.youtube.com", "youtu.be"],
            SocialPlatform::Github => &["github.com", "www.github.com"],
        }
    }

    fn from_host(host: &str) -> Option<Self> {
        [
            SocialPlatform::Linkedin,
            SocialPlatform::Twitter,
            SocialPlatform::Facebook,
            SocialPlatform::Instagram,
            SocialPlatform::Youtube,
            SocialPlatform::Github,
        ]
        .into_iter()
        .find(|p| p.hosts().contains(&host))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SocialLink {
    pub platform: SocialPlatform,
    pub url: String,
    pub handle: String,
}

fn extract_handle(platform: SocialPlatform, path: &str) -> Option<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let handle = match platform {
        SocialPlatform::Linkedin => trimmed
            .strip_prefix("company/")
            .or_else(|| trimmed.strip_prefix("in/"))
            .unwrap_or(trimmed),
        _ => trimmed.trim_start_matches('@'),
    };
    let handle = handle.split('/').next().unwrap_or(handle);
    if handle.is_empty() || HANDLE_BLOCKLIST.contains(&handle.to_lowercase().as_str()) {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Extract social-platform links from an HTML document, resolving relative
/// and protocol-relative hrefs against `base`.
pub fn detect_links(html: &str, base: &str) -> Vec<SocialLink> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("valid selector");
    let base_url = Url::parse(base).ok();

    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };

        let resolved = if let Some(stripped) = href.strip_prefix("//") {
            Url::parse(&format!("https://{stripped}")).ok()
        } else if let Some(base) = &base_url {
            base.join(href).ok()
        } else {
            Url::parse(href).ok()
        };

        let Some(resolved) = resolved else { continue };
        let Some(host) = resolved.host_str().map(|h| h.to_lowercase()) else {
            continue;
        };
        let Some(platform) = SocialPlatform::from_host(&host) else {
            continue;
        };
        let Some(handle) = extract_handle(platform, resolved.path()) else {
            continue;
        };

        let key = format!("{}:{}", platform.as_str(), handle.to_lowercase());
        if seen.insert(key) {
            out.push(SocialLink {
                platform,
                url: resolved.to_string(),
                handle,
            });
        }
    }

    out
}

/// Consults per-platform follow flags in the Company config.
pub fn should_follow(platform: SocialPlatform, follow_flags: &HashMap<String, bool>) -> bool {
    follow_flags.get(platform.as_str()).copied().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_linkedin_company_handle() {
        let html = r#"<a href="https://www.linkedin.com/company/acme-corp">LinkedIn</a>"#;
        let links = detect_links(html, "https://acme.test");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].platform, SocialPlatform::Linkedin);
        assert_eq!(links[0].handle, "acme-corp");
    }

    #[test]
    fn test_detect_twitter_at_handle() {
        let html = r#"<a href="https://x.com/@acme">X</a>"#;
        let links = detect_links(html, "https://acme.test");
        assert_eq!(links[0].platform, SocialPlatform::Twitter);
        assert_eq!(links[0].handle, "acme");
    }

    #[test]
    fn test_blocklisted_handle_dropped() {
        let html = r#"<a href="https://twitter.com/share">Share</a>"#;
        let links = detect_links(html, "https://acme.test");
        assert!(links.is_empty());
    }

    #[test]
    fn test_protocol_relative_resolved() {
        let html = r#"<a href="//github.com/acme">GitHub</a>"#;
        let links = detect_links(html, "https://acme.test");
        assert_eq!(links[0].platform, SocialPlatform::Github);
    }

    #[test]
    fn test_non_social_links_ignored() {
        let html = r#"<a href="https://news.ycombinator.com/item?id=1">HN</a>"#;
        let links = detect_links(html, "https://acme.test");
        assert!(links.is_empty());
    }

    #[test]
    fn test_should_follow_respects_config() {
        let mut flags = HashMap::new();
        flags.insert("linkedin".to_string(), true);
        assert!(should_follow(SocialPlatform::Linkedin, &flags));
        assert!(!should_follow(SocialPlatform::Github, &flags));
    }

    #[test]
    fn test_dedup_by_platform_and_handle() {
        let html = r#"
            <a href="https://linkedin.com/company/acme">A</a>
            <a href="https://www.linkedin.com/company/acme/">B</a>
        "#;
        let links = detect_links(html, "https://acme.test");
        assert_eq!(links.len(), 1);
    }
}
