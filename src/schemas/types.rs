//! Validated identifier newtypes and the cache entry envelope.
//!
//! Regex patterns are grounded in the original source's `schemas/types.py`.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn isin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$").unwrap())
}

fn cusip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Z]{9}$").unwrap())
}

fn figi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{12}$").unwrap())
}

fn mic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{4}$").unwrap())
}

fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{3}$").unwrap())
}

macro_rules! validated_string {
    ($name:ident, $pattern_fn:ident, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                let candidate = raw.trim().to_uppercase();
                if $pattern_fn().is_match(&candidate) {
                    Ok(Self(candidate))
                } else {
                    Err(format!("{:?} is not a valid {}", raw, $label))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

validated_string!(Isin, isin_re, "ISIN");
validated_string!(Cusip, cusip_re, "CUSIP");
validated_string!(Figi, figi_re, "share-class FIGI");
validated_string!(Mic, mic_re, "MIC");
validated_string!(Currency, currency_re, "currency code");

/// A row in the `object_cache` table: an arbitrary JSON payload keyed by
/// cache name and key, timestamped for TTL eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_name: String,
    pub key: String,
    pub created_at: i64,
    pub payload: serde_json::Value,
}
