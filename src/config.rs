use std::env;

/// Per-million-token pricing used by TokenTracker to compute running cost.
#[derive(Debug, Clone, Copy)]
pub struct TokenPricing {
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        TokenPricing {
            input_per_million_usd: 3.0,
            output_per_million_usd: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub shared_secret: String,
    pub port: u16,

    /// Companies processed concurrently (§5: worker concurrency, default 4).
    pub max_concurrent_jobs: usize,
    /// Concurrent page fetches within a single crawl.
    pub max_concurrent_fetches: usize,

    pub default_max_pages: u32,
    pub default_max_depth: u32,
    pub default_timeout_secs: u64,

    /// Pages between checkpoint saves (§4.7 step g).
    pub checkpoint_page_interval: u32,
    /// Seconds between checkpoint saves (§4.7 step g).
    pub checkpoint_interval_secs: u64,

    pub http_timeout_secs: u64,
    pub robots_timeout_secs: u64,
    pub sitemap_timeout_secs: u64,
    pub lock_ttl_secs: u64,
    pub rate_limit_acquire_timeout_secs: u64,

    /// Cold-start recovery threshold: an IN_PROGRESS company with no
    /// progress for this long is failed rather than resumed (§4.14).
    pub stale_job_threshold_secs: u64,

    pub token_pricing: TokenPricing,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let shared_secret =
            env::var("SHARED_SECRET").map_err(|_| ConfigError::Missing("SHARED_SECRET"))?;

        let port = parse_env_or("PORT", 8080)?;
        let max_concurrent_jobs = parse_env_or("MAX_CONCURRENT_JOBS", 4usize)?;
        let max_concurrent_fetches = parse_env_or("MAX_CONCURRENT_FETCHES", 10usize)?;

        let default_max_pages = parse_env_or("DEFAULT_MAX_PAGES", 500u32)?;
        let default_max_depth = parse_env_or("DEFAULT_MAX_DEPTH", 4u32)?;
        let default_timeout_secs = parse_env_or("DEFAULT_TIMEOUT_SECS", 3600u64)?;

        let checkpoint_page_interval = parse_env_or("CHECKPOINT_PAGE_INTERVAL", 10u32)?;
        let checkpoint_interval_secs = parse_env_or("CHECKPOINT_INTERVAL_SECS", 120u64)?;

        let http_timeout_secs = parse_env_or("HTTP_TIMEOUT_SECS", 30u64)?;
        let robots_timeout_secs = parse_env_or("ROBOTS_TIMEOUT_SECS", 10u64)?;
        let sitemap_timeout_secs = parse_env_or("SITEMAP_TIMEOUT_SECS", 30u64)?;
        let lock_ttl_secs = parse_env_or("LOCK_TTL_SECS", 60u64)?;
        let rate_limit_acquire_timeout_secs = parse_env_or("RATE_LIMIT_ACQUIRE_TIMEOUT_SECS", 30u64)?;

        let stale_job_threshold_secs = parse_env_or("STALE_JOB_THRESHOLD_SECS", 3600u64)?;

        let input_per_million = env::var("TOKEN_PRICE_INPUT_PER_MILLION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(3.0);
        let output_per_million = env::var("TOKEN_PRICE_OUTPUT_PER_MILLION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(15.0);

        Ok(Config {
            shared_secret,
            port,
            max_concurrent_jobs,
            max_concurrent_fetches,
            default_max_pages,
            default_max_depth,
            default_timeout_secs,
            checkpoint_page_interval,
            checkpoint_interval_secs,
            http_timeout_secs,
            robots_timeout_secs,
            sitemap_timeout_secs,
            lock_ttl_secs,
            rate_limit_acquire_timeout_secs,
            stale_job_threshold_secs,
            token_pricing: TokenPricing {
                input_per_million_usd: input_per_million,
                output_per_million_usd: output_per_million,
            },
        })
    }
}

/// Parse an env var with a typed default, surfacing a `ConfigError` on malformed input.
fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key, "failed to parse")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pricing() {
        let p = TokenPricing::default();
        assert_eq!(p.input_per_million_usd, 3.0);
        assert_eq!(p.output_per_million_usd, 15.0);
    }

    #[test]
    fn test_parse_env_or_default() {
        env::remove_var("__CIRA_TEST_KEY_NOT_SET__");
        let v: usize = parse_env_or("__CIRA_TEST_KEY_NOT_SET__", 7).unwrap();
        assert_eq!(v, 7);
    }
}
