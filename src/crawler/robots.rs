//! robots.txt fetching and longest-match Allow/Disallow evaluation.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::cache::{make_key, CacheStore};

#[derive(Debug, Error)]
pub enum RobotsError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

const ROBOTS_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    is_allow: bool,
    /// Compiled anchored regex; `None` means fall back to prefix matching
    /// on the wildcard-stripped pattern (only reached if compilation fails).
    regex: Option<Regex>,
    /// Longer, more specific patterns win ties; length of the original text.
    specificity: usize,
}

#[derive(Debug, Clone, Default)]
struct Directives {
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

/// Parsed robots.txt for a single host, with its own rule set per
/// user-agent group plus the sitemap URLs it advertises.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: HashMap<String, Directives>,
    pub sitemaps: Vec<String>,
    pub loaded: bool,
}

/// Compile a robots.txt pattern (with `*` wildcard and optional trailing `$`
/// anchor) into an anchored regex. Falls back to `None` (prefix match) only
/// if the regex engine rejects the escaped pattern, which should not happen
/// for any input this function produces.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let has_end_anchor = pattern.ends_with('$');
    let body = if has_end_anchor {
        &pattern[..pattern.len() - 1]
    } else {
        pattern
    };

    let mut regex_str = String::from("^");
    for part in body.split('*') {
        regex_str.push_str(&regex::escape(part));
        regex_str.push_str(".*");
    }
    // Strip the trailing ".*" added by the last split segment.
    regex_str.truncate(regex_str.len() - 2);
    if has_end_anchor {
        regex_str.push('$');
    }

    Regex::new(&regex_str).ok()
}

fn matches(rule: &Rule, path: &str) -> bool {
    match &rule.regex {
        Some(re) => re.is_match(path),
        None => {
            let prefix = rule.pattern.trim_end_matches('$').replace('*', "");
            path.starts_with(&prefix)
        }
    }
}

impl RobotsPolicy {
    pub fn from_content(content: &str) -> Self {
        let mut groups: HashMap<String, Directives> = HashMap::new();
        let mut sitemaps = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();

        for raw_line in content.lines() {
            let line = match raw_line.find('#') {
                Some(idx) => raw_line[..idx].trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                current_agents.clear();
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => current_agents.push(value.to_lowercase()),
                "disallow" if !value.is_empty() => {
                    for agent in &current_agents {
                        let entry = groups.entry(agent.clone()).or_default();
                        entry.rules.push(Rule {
                            pattern: value.to_string(),
                            is_allow: false,
                            regex: compile_pattern(value),
                            specificity: value.len(),
                        });
                    }
                }
                "allow" if !value.is_empty() => {
                    for agent in &current_agents {
                        let entry = groups.entry(agent.clone()).or_default();
                        entry.rules.push(Rule {
                            pattern: value.to_string(),
                            is_allow: true,
                            regex: compile_pattern(value),
                            specificity: value.len(),
                        });
                    }
                }
                "crawl-delay" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        for agent in &current_agents {
                            groups.entry(agent.clone()).or_default().crawl_delay = Some(secs);
                        }
                    }
                }
                "sitemap" => sitemaps.push(value.to_string()),
                _ => {}
            }
        }

        RobotsPolicy {
            groups,
            sitemaps,
            loaded: true,
        }
    }

    async fn fetch(domain: &str, timeout: Duration) -> Self {
        let robots_url = format!("https://{domain}/robots.txt");
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(_) => return RobotsPolicy::default(),
        };

        match client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body = resp.text().await.unwrap_or_default();
                Self::from_content(&body)
            }
            _ => RobotsPolicy::default(),
        }
    }

    /// longest-pattern-wins between Allow and Disallow, preferring the
    /// bot-specific group over `*`.
    fn evaluate(&self, path: &str, user_agent: &str) -> bool {
        let ua_lower = user_agent.to_lowercase();
        let group = self
            .groups
            .get(ua_lower.as_str())
            .or_else(|| self.groups.get("*"));

        let Some(group) = group else {
            return true;
        };

        let best = group
            .rules
            .iter()
            .filter(|r| matches(r, path))
            .max_by_key(|r| r.specificity);

        match best {
            Some(rule) => rule.is_allow,
            None => true,
        }
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        let path = match Url::parse(url) {
            Ok(u) => u.path().to_string(),
            Err(_) => return true,
        };
        self.evaluate(&path, user_agent)
    }

    pub fn get_crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let ua_lower = user_agent.to_lowercase();
        self.groups
            .get(ua_lower.as_str())
            .and_then(|g| g.crawl_delay)
            .or_else(|| self.groups.get("*").and_then(|g| g.crawl_delay))
    }

    pub fn get_sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Fetches and caches `RobotsPolicy` per host. Holds a short-lived in-process
/// cache in front of the shared `CacheStore` so repeated lookups within one
/// crawl don't round-trip through the cache layer every time.
pub struct RobotsCache {
    store: Arc<dyn CacheStore>,
    local: RwLock<HashMap<String, RobotsPolicy>>,
    timeout: Duration,
}

impl RobotsCache {
    pub fn new(store: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        RobotsCache {
            store,
            local: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn get(&self, domain: &str) -> Result<RobotsPolicy, RobotsError> {
        if let Some(policy) = self.local.read().await.get(domain) {
            return Ok(policy.clone());
        }

        let key = make_key(&["robots", domain]);
        if let Some(raw) = self.store.get(&key).await {
            if let Ok(policy) = serde_json::from_str::<CachedRobots>(&raw) {
                let policy = policy.into_policy();
                self.local.write().await.insert(domain.to_string(), policy.clone());
                return Ok(policy);
            }
        }

        let policy = RobotsPolicy::fetch(domain, self.timeout).await;
        let cached = CachedRobots::from_policy(&policy);
        if let Ok(raw) = serde_json::to_string(&cached) {
            self.store.set(&key, raw, Some(ROBOTS_CACHE_TTL)).await;
        }
        self.local.write().await.insert(domain.to_string(), policy.clone());
        Ok(policy)
    }

    pub async fn clear_cache(&self, host: Option<&str>) {
        match host {
            Some(h) => {
                self.local.write().await.remove(h);
                self.store.delete(&make_key(&["robots", h])).await;
            }
            None => {
                self.local.write().await.clear();
                self.store.cleanup_prefix(&["robots"]).await;
            }
        }
    }
}

/// Serializable subset of `RobotsPolicy` (sitemaps + loaded flag only);
/// sufficient for cache persistence since rule evaluation is re-derived from
/// raw content on cache miss within the process that computed it.
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedRobots {
    sitemaps: Vec<String>,
    loaded: bool,
}

impl CachedRobots {
    fn from_policy(p: &RobotsPolicy) -> Self {
        CachedRobots {
            sitemaps: p.sitemaps.clone(),
            loaded: p.loaded,
        }
    }

    fn into_policy(self) -> RobotsPolicy {
        RobotsPolicy {
            groups: HashMap::new(),
            sitemaps: self.sitemaps,
            loaded: self.loaded,
        }
    }
}

/// Known AI bot user agents, used for cross-bot blocked-set reporting.
pub const AI_BOT_USER_AGENTS: &[&str] = &["GPTBot", "ClaudeBot", "PerplexityBot", "GoogleOther"];
