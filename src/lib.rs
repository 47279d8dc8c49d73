//! Equity Aggregator
//!
//! Streaming pipeline that ingests authoritative exchange feeds, resolves
//! each listing to its canonical share-class FIGI, enriches from a
//! supplementary vendor, merges duplicate listings and persists canonical
//! equity records to a local SQLite-backed store.

pub mod cache;
pub mod config;
pub mod error;
pub mod enrichment;
pub mod feeds;
pub mod fuzzy;
pub mod fx;
pub mod http;
pub mod identify;
pub mod merge;
pub mod pipeline;
pub mod retrieval;
pub mod schemas;

pub use config::Config;
pub use error::{Error, Result};
