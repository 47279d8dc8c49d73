//! The canonical equity record persisted to the store: the output of a
//! successful merge, keyed uniquely by share-class FIGI.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Currency, Cusip, Figi, Isin, Mic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityIdentity {
    pub name: String,
    pub symbol: String,
    pub share_class_figi: Figi,
    pub isin: Option<Isin>,
    pub cusip: Option<Cusip>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityFinancials {
    pub mics: Option<Vec<Mic>>,
    pub currency: Option<Currency>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub last_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub market_cap: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEquity {
    pub identity: EquityIdentity,
    pub financials: EquityFinancials,
}

impl CanonicalEquity {
    pub fn share_class_figi(&self) -> &Figi {
        &self.identity.share_class_figi
    }
}
