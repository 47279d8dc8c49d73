//! Authoritative exchange feeds: one module per feed, each exposing an
//! async `fetch_records` that streams deduplicated, cache-backed
//! [`FeedRecord`]s for its exchange.

mod euronext;
mod lse;
mod xetra;

pub use euronext::fetch_records as fetch_euronext_records;
pub use lse::fetch_records as fetch_lse_records;
pub use xetra::fetch_records as fetch_xetra_records;
