//! Crate-wide error taxonomy.
//!
//! Library code returns `Error` so callers can match on kind; `main.rs`
//! collapses any `Err` into an exit code via `anyhow`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source feed '{feed}' failed fatally: {source}")]
    SourceFeedFatal {
        feed: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("vendor call failed (transient): {0}")]
    VendorTransient(#[from] reqwest::Error),

    #[error("data error: {0}")]
    Data(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("enrichment error: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Typed failure modes of the enrichment vendor lookup, mirroring the
/// vendor client's own error hierarchy one level down from [`Error`].
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("no quotes returned for query {0:?}")]
    NoQuotes(String),

    #[error("no equity data found for ticker {0:?}")]
    NoEquityData(String),

    #[error("best fuzzy match for {query:?} scored {score} (minimum {minimum})")]
    LowFuzzyScore {
        query: String,
        score: i64,
        minimum: i64,
    },

    #[error("quote summary for ticker {0:?} was empty")]
    EmptySummary(String),

    #[error("failed to convert vendor figure to USD: {0}")]
    UsdConversion(String),
}
