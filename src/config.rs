//! Runtime configuration, assembled once at startup from the environment.
//!
//! Mirrors the teacher's pattern of building a single config/state struct
//! in `main` and threading it into constructors, rather than re-reading
//! `std::env` deep inside the call stack the way a quick script would.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Concurrency caps, all overridable via environment for tuning without a
/// rebuild; defaults mirror the ones grounded in the source feeds and
/// vendor clients this was adapted from.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimits {
    pub feed_page_fetch: usize,
    pub figi_batch: usize,
    pub enrichment_stream: usize,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            feed_page_fetch: 8,
            figi_batch: 10,
            enrichment_stream: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    /// 0 disables TTL-based eviction entirely.
    pub cache_ttl_minutes: i64,
    pub log_dir: Option<PathBuf>,

    pub openfigi_api_key: Option<String>,
    pub exchange_rate_api_key: String,
    pub enrichment_api_key: Option<String>,

    pub limits: ConcurrencyLimits,

    /// If true, a source feed that exhausts retries aborts the process;
    /// if false, the feed is skipped and the pipeline continues with the
    /// remaining feeds. See the design notes on feed-failure policy.
    pub fatal_on_feed_error: bool,

    /// Minimum combined fuzzy score accepted from the enrichment vendor's
    /// symbol selection.
    pub enrichment_min_score: i64,

    pub http_timeout: Duration,

    /// GitHub `owner/repo` and tag the `download` subcommand fetches
    /// the canonical-equities artifact from.
    pub release_owner: String,
    pub release_repo: String,
    pub release_tag: String,
}

impl Config {
    /// Loads configuration from the process environment, reading a
    /// `.env` file first if present (mirroring the teacher's startup
    /// sequence).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        let cache_dir = env::var("CACHE_DIR")
            .unwrap_or_else(|_| "./data/cache".to_string())
            .into();

        let cache_ttl_minutes = match env::var("CACHE_TTL_MINUTES") {
            Ok(raw) => raw
                .parse::<i64>()
                .map_err(|_| Error::Config(format!("CACHE_TTL_MINUTES is not an integer: {raw}")))?,
            Err(_) => 1440,
        };
        if cache_ttl_minutes < 0 {
            return Err(Error::Config(
                "CACHE_TTL_MINUTES must not be negative".to_string(),
            ));
        }
        let cache_ttl = Duration::from_secs((cache_ttl_minutes as u64) * 60);

        let log_dir = env::var("LOG_DIR").ok().map(PathBuf::from);

        let openfigi_api_key = env::var("OPENFIGI_API_KEY").ok();

        let exchange_rate_api_key = env::var("EXCHANGE_RATE_API_KEY")
            .map_err(|_| Error::Config("EXCHANGE_RATE_API_KEY is required".to_string()))?;

        let enrichment_api_key = env::var("ENRICHMENT_API_KEY").ok();

        let fatal_on_feed_error = env::var("FATAL_ON_FEED_ERROR")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let enrichment_min_score = env::var("ENRICHMENT_MIN_SCORE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(150);

        let release_owner =
            env::var("RELEASE_OWNER").unwrap_or_else(|_| "equity-aggregator".to_string());
        let release_repo =
            env::var("RELEASE_REPO").unwrap_or_else(|_| "equity-aggregator".to_string());
        let release_tag = env::var("RELEASE_TAG").unwrap_or_else(|_| "latest".to_string());

        Ok(Self {
            cache_dir,
            cache_ttl,
            cache_ttl_minutes,
            log_dir,
            openfigi_api_key,
            exchange_rate_api_key,
            enrichment_api_key,
            limits: ConcurrencyLimits::default(),
            fatal_on_feed_error,
            enrichment_min_score,
            http_timeout: Duration::from_secs(10),
            release_owner,
            release_repo,
            release_tag,
        })
    }

    /// Path to the SQLite database file, fixed at `data/data_store/data_store.db`
    /// regardless of `cache_dir` (which holds only opaque per-cache files).
    pub fn db_path(&self) -> PathBuf {
        self.cache_dir
            .parent()
            .unwrap_or(&self.cache_dir)
            .join("data_store")
            .join("data_store.db")
    }

    /// Path the `export` subcommand writes its gzip NDJSON artifact to.
    pub fn export_path(&self) -> PathBuf {
        self.cache_dir
            .parent()
            .unwrap_or(&self.cache_dir)
            .join("data_store")
            .join("canonical_equities.jsonl.gz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ttl_is_rejected() {
        std::env::set_var("EXCHANGE_RATE_API_KEY", "test-key");
        std::env::set_var("CACHE_TTL_MINUTES", "-5");
        let result = Config::from_env();
        std::env::remove_var("CACHE_TTL_MINUTES");
        std::env::remove_var("EXCHANGE_RATE_API_KEY");
        assert!(result.is_err());
    }

    #[test]
    fn zero_ttl_disables_eviction() {
        std::env::set_var("EXCHANGE_RATE_API_KEY", "test-key");
        std::env::set_var("CACHE_TTL_MINUTES", "0");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CACHE_TTL_MINUTES");
        std::env::remove_var("EXCHANGE_RATE_API_KEY");
        assert_eq!(config.cache_ttl_minutes, 0);
    }
}
