pub mod classifier;
pub mod external_links;
pub mod fetcher;
pub mod parser;
pub mod priority_queue;
pub mod rate_limiter;
pub mod robots;
pub mod sitemap;

pub use fetcher::{Fetcher, FetchResult, HttpFetcher, JsFetcher};
pub use parser::Parser;
pub use rate_limiter::RateLimiter;
pub use robots::RobotsCache;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::crawler::classifier::PageType;
use crate::crawler::priority_queue::{content_hash, PriorityQueue};
use crate::models::{Checkpoint, Company, CrawlSession, Page, SessionStatus};
use crate::storage::Repositories;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid seed url: {0}")]
    InvalidSeedUrl(String),
    #[error("rate limiter timed out for {0}")]
    RateLimitTimeout(String),
}

/// Everything a single crawl run needs that outlives the worker itself.
pub struct CrawlWorker {
    pub fetcher: Arc<dyn Fetcher>,
    pub rate_limiter: RateLimiter,
    pub robots: RobotsCache,
    pub repos: Repositories,
    pub rate_limit_timeout: Duration,
    pub checkpoint_page_interval: u32,
    pub checkpoint_interval: Duration,
}

/// Outcome of a completed (or cancelled) crawl run.
pub struct CrawlOutcome {
    pub session: CrawlSession,
    pub external_links: Vec<String>,
}

impl CrawlWorker {
    /// Run the crawl for `company` to completion, to its page budget, or until
    /// `cancel` fires. Persists discovered pages via `self.repos` as it goes
    /// and returns the terminal session record plus any external links
    /// encountered (for the caller to follow-up on per `follow_social_links`).
    pub async fn run(
        &self,
        company: &Company,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, CrawlError> {
        let seed = Url::parse(&company.seed_url)
            .map_err(|_| CrawlError::InvalidSeedUrl(company.seed_url.clone()))?;
        let host = seed
            .host_str()
            .ok_or_else(|| CrawlError::InvalidSeedUrl(company.seed_url.clone()))?
            .to_lowercase();

        let mut queue = PriorityQueue::new(&company.seed_url, company.config.max_depth, None);
        queue.enqueue(&company.seed_url, 0, PageType::About);

        let robots_policy = self.robots.get(&host).await.ok();
        if let Some(policy) = &robots_policy {
            if let Some(delay) = policy.get_crawl_delay(&company.config.user_agent) {
                self.rate_limiter.set_crawl_delay(&company.seed_url, delay).await;
            }
            for sitemap_url in policy.get_sitemaps() {
                let discovered = sitemap::discover(
                    std::slice::from_ref(&sitemap_url),
                    Duration::from_secs(30),
                )
                .await;
                for url in sitemap::filter_same_domain(discovered.urls(), &host) {
                    queue.enqueue(&url, 1, PageType::Other);
                }
            }
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = crate::time::now_rfc3339();
        let mut checkpoint = Checkpoint::default();
        checkpoint.crawl_start_time = Some(started_at.clone());

        let pages_crawled = AtomicU32::new(0);
        let mut max_depth_reached = 0u32;
        let mut external_links_all = Vec::new();
        let mut last_checkpoint_at = Instant::now();

        while let Some((url, depth)) = queue.pop() {
            if cancel.is_cancelled() {
                break;
            }
            if pages_crawled.load(Ordering::Relaxed) >= company.config.max_pages {
                break;
            }

            if let Some(policy) = &robots_policy {
                if company.config.respect_robots
                    && !policy.is_allowed(&url, &company.config.user_agent)
                {
                    tracing::debug!(url = %url, "blocked by robots.txt");
                    queue.mark_visited(&url);
                    continue;
                }
            }

            let guard = self
                .rate_limiter
                .acquire_guard(&url, self.rate_limit_timeout)
                .await;
            if guard.is_none() {
                continue;
            }

            let result = self.fetcher.fetch(&url).await;
            queue.mark_visited(&url);

            if !result.is_success() {
                tracing::warn!(url = %url, error = ?result.error, "fetch failed");
                continue;
            }

            let hash = content_hash(&result.text);
            if !queue.register_content_hash(&hash) {
                continue;
            }

            let classification = classifier::classify(&result.final_url, Some(&result.text));
            let page = Page {
                id: uuid::Uuid::new_v4().to_string(),
                company_id: company.id.clone(),
                url: result.final_url.clone(),
                page_type: classification.page_type.as_str().to_string(),
                status_code: result.status_code,
                is_external: false,
                title: parser::Parser::parse(&result.html, &result.final_url).title,
                text: result.text.clone(),
                content_hash: hash,
                depth,
                crawled_at: crate::time::now_rfc3339(),
                error: None,
            };
            self.repos.pages.insert_if_absent(page).await;
            pages_crawled.fetch_add(1, Ordering::Relaxed);
            max_depth_reached = max_depth_reached.max(depth);

            let parsed = parser::Parser::parse(&result.html, &result.final_url);
            for link in &parsed.internal_links {
                let page_type = classifier::classify(link, None).page_type;
                queue.enqueue(link, depth + 1, page_type);
            }

            for social in external_links::detect_links(&result.html, &result.final_url) {
                if external_links::should_follow(social.platform, &company.config.follow_social_links) {
                    external_links_all.push(social.url);
                }
            }

            let crawled = pages_crawled.load(Ordering::Relaxed);
            if crawled % self.checkpoint_page_interval.max(1) == 0
                || last_checkpoint_at.elapsed() >= self.checkpoint_interval
            {
                checkpoint.pages_visited = queue.visited_urls();
                checkpoint.pages_queued = queue.pending_urls();
                checkpoint.external_links_found = external_links_all.clone();
                checkpoint.current_depth = max_depth_reached;
                checkpoint.last_checkpoint_time = Some(crate::time::now_rfc3339());
                last_checkpoint_at = Instant::now();
            }
        }

        checkpoint.pages_visited = queue.visited_urls();
        checkpoint.pages_queued = queue.pending_urls();
        checkpoint.external_links_found = external_links_all.clone();
        checkpoint.last_checkpoint_time = Some(crate::time::now_rfc3339());
        checkpoint.current_depth = max_depth_reached;

        let session = CrawlSession {
            id: session_id,
            company_id: company.id.clone(),
            status: if cancel.is_cancelled() {
                SessionStatus::Paused
            } else {
                SessionStatus::Completed
            },
            pages_crawled: pages_crawled.load(Ordering::Relaxed),
            pages_queued: queue.pending_count() as u32,
            max_depth_reached,
            external_links_followed: external_links_all.len() as u32,
            checkpoint,
            started_at,
            completed_at: if cancel.is_cancelled() {
                None
            } else {
                Some(crate::time::now_rfc3339())
            },
        };

        Ok(CrawlOutcome {
            session,
            external_links: external_links_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> FetchResult {
            FetchResult {
                html: format!("<html><body><p>Hello from {url}</p></body></html>"),
                text: format!("Hello from {url}"),
                status_code: 200,
                final_url: url.to_string(),
                content_type: Some("text/html".to_string()),
                load_time_ms: 1,
                error: None,
            }
        }
    }

    #[tokio::test]
    async fn test_single_page_crawl_produces_session() {
        let worker = CrawlWorker {
            fetcher: Arc::new(StubFetcher),
            rate_limiter: RateLimiter::new(),
            robots: RobotsCache::new(Arc::new(crate::cache::InMemoryCacheStore::new()), Duration::from_secs(5)),
            repos: Repositories::in_memory(),
            rate_limit_timeout: Duration::from_secs(5),
            checkpoint_page_interval: 10,
            checkpoint_interval: Duration::from_secs(120),
        };

        let mut config = crate::models::CompanyConfig::default();
        config.max_pages = 1;
        config.respect_robots = false;
        let company = Company::new(
            "c1".to_string(),
            "Acme".to_string(),
            "https://example.com".to_string(),
            config,
        );

        let cancel = CancellationToken::new();
        let outcome = worker.run(&company, &cancel).await.unwrap();
        assert_eq!(outcome.session.pages_crawled, 1);
        assert_eq!(outcome.session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancellation_stops_crawl_as_paused() {
        let worker = CrawlWorker {
            fetcher: Arc::new(StubFetcher),
            rate_limiter: RateLimiter::new(),
            robots: RobotsCache::new(Arc::new(crate::cache::InMemoryCacheStore::new()), Duration::from_secs(5)),
            repos: Repositories::in_memory(),
            rate_limit_timeout: Duration::from_secs(5),
            checkpoint_page_interval: 10,
            checkpoint_interval: Duration::from_secs(120),
        };

        let config = crate::models::CompanyConfig::default();
        let company = Company::new(
            "c2".to_string(),
            "Acme".to_string(),
            "https://example.com".to_string(),
            config,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = worker.run(&company, &cancel).await.unwrap();
        assert_eq!(outcome.session.status, SessionStatus::Paused);
    }
}
