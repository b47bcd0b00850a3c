//! The fetcher contract CrawlWorker depends on: fetch a URL and return its
//! rendered text, independent of rate limiting (owned by `rate_limiter`) and
//! of robots policy (owned by `robots`).

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    RequestFailed(String),
}

/// Status 0 signals a network-level failure (no response at all); 408
/// signals a client-side timeout. Both are non-fatal to the crawl (§4.7).
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub html: String,
    pub text: String,
    pub status_code: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub load_time_ms: u64,
    pub error: Option<String>,
}

impl FetchResult {
    /// 200–399 with non-empty text is a crawl success (§4.7).
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code) && !self.text.trim().is_empty()
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult;
}

/// Plain HTTP fetcher. The only contract implementation CrawlWorker requires
/// by default.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .pool_max_idle_per_host(20)
            .build()
            .expect("failed to build HTTP client");

        HttpFetcher { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        let start = Instant::now();
        match self.client.get(url).send().await {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let final_url = response.url().to_string();
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                match response.text().await {
                    Ok(html) => {
                        let text = crate::crawler::parser::extract_text(&html);
                        FetchResult {
                            html,
                            text,
                            status_code,
                            final_url,
                            content_type,
                            load_time_ms: start.elapsed().as_millis() as u64,
                            error: None,
                        }
                    }
                    Err(e) => FetchResult {
                        html: String::new(),
                        text: String::new(),
                        status_code,
                        final_url,
                        content_type,
                        load_time_ms: start.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                }
            }
            Err(e) => {
                let status_code = if e.is_timeout() { 408 } else { 0 };
                FetchResult {
                    html: String::new(),
                    text: String::new(),
                    status_code,
                    final_url: url.to_string(),
                    content_type: None,
                    load_time_ms: start.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// JS-capable fetcher variant (§4.7, §9): renders via a headless-browser
/// subprocess (same Semaphore+timeout idiom as the original Lighthouse/
/// renderer runners) and falls back to plain HTTP on any failure, since
/// classification and structured extraction must succeed on plain output.
pub struct JsFetcher {
    fallback: HttpFetcher,
    semaphore: Arc<Semaphore>,
    script_path: String,
    timeout: Duration,
}

impl JsFetcher {
    pub fn new(fallback: HttpFetcher, max_concurrent: usize, script_path: String, timeout: Duration) -> Self {
        JsFetcher {
            fallback,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            script_path,
            timeout,
        }
    }

    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("node")
                .arg(&self.script_path)
                .arg(url)
                .output(),
        )
        .await
        .map_err(|_| FetchError::RequestFailed("render timeout".to_string()))?
        .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Fetcher for JsFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        let start = Instant::now();
        match self.render(url).await {
            Ok(html) if !html.trim().is_empty() => {
                let text = crate::crawler::parser::extract_text(&html);
                FetchResult {
                    html,
                    text,
                    status_code: 200,
                    final_url: url.to_string(),
                    content_type: Some("text/html".to_string()),
                    load_time_ms: start.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            _ => self.fallback.fetch(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success_classification() {
        let ok = FetchResult {
            html: "<html></html>".into(),
            text: "hello".into(),
            status_code: 200,
            final_url: "https://a.com".into(),
            content_type: None,
            load_time_ms: 1,
            error: None,
        };
        assert!(ok.is_success());

        let empty = FetchResult { text: String::new(), ..ok.clone() };
        assert!(!empty.is_success());

        let timeout = FetchResult { status_code: 408, ..ok.clone() };
        assert!(!timeout.is_success());

        let network_error = FetchResult { status_code: 0, ..ok };
        assert!(!network_error.is_success());
    }

    #[tokio::test]
    async fn test_http_fetcher_unreachable_host_yields_status_zero() {
        let fetcher = HttpFetcher::new(Duration::from_millis(500), "CIRA Bot");
        let result = fetcher.fetch("https://nonexistent.invalid/page").await;
        assert_eq!(result.status_code, 0);
        assert!(result.error.is_some());
    }
}
