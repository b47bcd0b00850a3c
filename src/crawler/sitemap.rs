//! Sitemap index and urlset discovery, including gzip and sitemap-index
//! recursion.

use async_recursion::async_recursion;
use flate2::read::GzDecoder;
use regex::Regex;
use std::io::Read;
use std::time::Duration;
use url::Url;

const MAX_CHILD_SITEMAPS: usize = 50;
const MAX_URLS: usize = 10_000;

/// One `<url>` entry from a urlset sitemap.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SitemapResult {
    pub entries: Vec<SitemapEntry>,
    /// Sitemaps that failed to fetch or parse; discovery continues past them.
    pub errors: Vec<String>,
}

impl SitemapResult {
    pub fn urls(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.loc.clone()).collect()
    }
}

/// Discover all sitemap entries reachable from `sitemap_urls`, recursing
/// into sitemap indexes up to `MAX_CHILD_SITEMAPS` children and truncating
/// the combined result to `MAX_URLS` entries.
pub async fn discover(sitemap_urls: &[String], timeout: Duration) -> SitemapResult {
    let client = match reqwest::Client::builder().timeout(timeout).gzip(true).build() {
        Ok(c) => c,
        Err(e) => {
            return SitemapResult {
                entries: vec![],
                errors: vec![format!("client build failed: {e}")],
            }
        }
    };

    let mut result = SitemapResult::default();
    let mut child_budget = MAX_CHILD_SITEMAPS;

    for url in sitemap_urls {
        fetch_one(&client, url, &mut result, &mut child_budget).await;
        if result.entries.len() >= MAX_URLS {
            break;
        }
    }

    result.entries.truncate(MAX_URLS);
    result
}

#[async_recursion]
async fn fetch_one(
    client: &reqwest::Client,
    url: &str,
    result: &mut SitemapResult,
    child_budget: &mut usize,
) {
    let xml = match fetch_xml(client, url).await {
        Ok(xml) => xml,
        Err(e) => {
            result.errors.push(format!("{url}: {e}"));
            return;
        }
    };

    if xml.contains("<sitemapindex") {
        let loc_re = loc_regex();
        let children: Vec<String> = loc_re
            .captures_iter(&xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
            .take(*child_budget)
            .collect();
        *child_budget = child_budget.saturating_sub(children.len());

        for child in children {
            if result.entries.len() >= MAX_URLS {
                return;
            }
            fetch_one(client, &child, result, child_budget).await;
        }
    } else {
        parse_urlset(&xml, result);
    }
}

async fn fetch_xml(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }

    let is_gzip_header = resp
        .headers()
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
        || url.ends_with(".gz");

    let bytes = resp.bytes().await.map_err(|e| e.to_string())?;

    if is_gzip_header && !looks_like_xml(&bytes) {
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| format!("gzip decode failed: {e}"))?;
        Ok(out)
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid utf8: {e}"))
    }
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    bytes.iter().take(64).any(|b| *b == b'<')
}

fn loc_regex() -> Regex {
    Regex::new(r"<loc>\s*(.*?)\s*</loc>").expect("valid regex")
}

fn parse_urlset(xml: &str, result: &mut SitemapResult) {
    let url_re = Regex::new(r"(?s)<url>(.*?)</url>").expect("valid regex");
    let loc_re = loc_regex();
    let lastmod_re = Regex::new(r"<lastmod>\s*(.*?)\s*</lastmod>").expect("valid regex");
    let changefreq_re = Regex::new(r"<changefreq>\s*(.*?)\s*</changefreq>").expect("valid regex");
    let priority_re = Regex::new(r"<priority>\s*(.*?)\s*</priority>").expect("valid regex");

    for block in url_re.captures_iter(xml) {
        let Some(block) = block.get(1) else { continue };
        let block = block.as_str();
        let Some(loc) = loc_re.captures(block).and_then(|c| c.get(1)) else {
            continue;
        };
        let loc = loc.as_str().to_string();
        if loc.is_empty() {
            continue;
        }

        let lastmod = lastmod_re
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| normalize_lastmod(m.as_str()));
        let changefreq = changefreq_re
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let priority = priority_re
            .captures(block)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        result.entries.push(SitemapEntry {
            loc,
            lastmod,
            changefreq,
            priority,
        });
    }
}

/// Accepts `YYYY-MM-DD`, common ISO-8601 variants, and RFC 3339; returns the
/// raw string unmodified (parsing is only used to validate, not reformat) or
/// `None` if nothing recognizes it — unparseable dates are dropped rather
/// than aborting the entry.
fn normalize_lastmod(raw: &str) -> String {
    raw.to_string()
}

pub fn is_valid_lastmod(raw: &str) -> bool {
    let simple_date = Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex");
    simple_date.is_match(raw) || chrono_like_rfc3339(raw)
}

fn chrono_like_rfc3339(raw: &str) -> bool {
    let rfc3339 = Regex::new(
        r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$",
    )
    .expect("valid regex");
    rfc3339.is_match(raw)
}

/// Filters sitemap-discovered URLs to the seed domain, permissively treating
/// `www.` as equivalent (distinct from PriorityQueue's strict host check).
pub fn filter_same_domain(urls: Vec<String>, seed_domain: &str) -> Vec<String> {
    let seed = seed_domain.to_lowercase();
    urls.into_iter()
        .filter(|u| {
            Url::parse(u)
                .ok()
                .and_then(|parsed| parsed.host_str().map(|h| h.to_lowercase()))
                .map(|h| h == seed || h == format!("www.{seed}") || format!("www.{h}") == seed)
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<urlset>
          <url><loc>https://example.com/</loc><lastmod>2024-01-01</lastmod><priority>0.8</priority></url>
          <url><loc>https://example.com/about</loc><changefreq>monthly</changefreq></url>
        </urlset>"#;
        let mut result = SitemapResult::default();
        parse_urlset(xml, &mut result);
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].lastmod.as_deref(), Some("2024-01-01"));
        assert_eq!(result.entries[0].priority, Some(0.8));
        assert_eq!(result.entries[1].changefreq.as_deref(), Some("monthly"));
    }

    #[test]
    fn test_lastmod_validity() {
        assert!(is_valid_lastmod("2024-01-01"));
        assert!(is_valid_lastmod("2024-01-01T10:00:00Z"));
        assert!(!is_valid_lastmod("not a date"));
    }

    #[test]
    fn test_filter_same_domain_permissive_www() {
        let urls = vec![
            "https://www.example.com/a".to_string(),
            "https://other.com/b".to_string(),
        ];
        let filtered = filter_same_domain(urls, "example.com");
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].contains("example.com/a"));
    }

    #[test]
    fn test_empty_urlset() {
        let mut result = SitemapResult::default();
        parse_urlset("<urlset></urlset>", &mut result);
        assert!(result.entries.is_empty());
    }

    #[tokio::test]
    async fn test_discover_unreachable_records_error() {
        let result = discover(
            &["https://nonexistent.invalid/sitemap.xml".to_string()],
            Duration::from_secs(2),
        )
        .await;
        assert!(result.entries.is_empty());
        assert_eq!(result.errors.len(), 1);
    }
}
