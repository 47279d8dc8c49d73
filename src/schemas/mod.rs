//! Data model: raw and canonical equity records, feed payload shapes, and
//! the shared validators that enforce the invariants on construction.

mod canonical;
mod feed_payloads;
mod raw;
mod types;
mod validators;

pub use canonical::{CanonicalEquity, EquityFinancials, EquityIdentity};
pub use feed_payloads::{EuronextFeedData, FeedKind, FeedRecord, LseFeedData, XetraFeedData};
pub use raw::{RawEquity, RawEquityInput};
pub use types::{CacheEntry, Currency, Cusip, Figi, Isin, Mic};
pub use validators::{normalise_name, normalise_numeric, NumericNormaliseError};
