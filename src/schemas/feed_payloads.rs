//! Per-vendor feed payload shapes and their normalisation into
//! [`RawEquity`]. Each `*FeedData` struct is the typed boundary between a
//! feed's own wire format and the shared raw-equity field set, the Rust
//! analogue of the original's `model_validator(mode="before")` renaming
//! step.

use serde::{Deserialize, Serialize};

use super::raw::{RawEquity, RawEquityInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedKind {
    Euronext,
    Lse,
    Xetra,
}

/// One raw payload tagged with the feed it came from, preserved until
/// the parse stage turns it into a [`RawEquity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedRecord {
    pub feed: FeedKind,
    pub raw_data: serde_json::Value,
}

impl FeedRecord {
    pub fn parse(&self) -> Result<RawEquity, String> {
        match self.feed {
            FeedKind::Euronext => {
                let data: EuronextFeedData = serde_json::from_value(self.raw_data.clone())
                    .map_err(|e| format!("euronext payload: {e}"))?;
                RawEquity::try_from(data)
            }
            FeedKind::Lse => {
                let data: LseFeedData = serde_json::from_value(self.raw_data.clone())
                    .map_err(|e| format!("lse payload: {e}"))?;
                RawEquity::try_from(data)
            }
            FeedKind::Xetra => {
                let data: XetraFeedData = serde_json::from_value(self.raw_data.clone())
                    .map_err(|e| format!("xetra payload: {e}"))?;
                RawEquity::try_from(data)
            }
        }
    }
}

/// Euronext's DataTables row, already split into named fields by the
/// feed adapter's row parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EuronextFeedData {
    pub name: String,
    pub symbol: String,
    pub isin: String,
    #[serde(default)]
    pub mics: Vec<String>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub last_price: String,
}

impl TryFrom<EuronextFeedData> for RawEquity {
    type Error = String;

    fn try_from(data: EuronextFeedData) -> Result<Self, Self::Error> {
        RawEquity::build(RawEquityInput {
            name: &data.name,
            symbol: &data.symbol,
            isin: Some(&data.isin),
            cusip: None,
            share_class_figi: None,
            mics: data.mics,
            currency: Some(&data.currency),
            last_price: Some(&data.last_price),
            market_cap: None,
        })
    }
}

/// The London Stock Exchange reports prices in pence (GBX); the
/// conversion to pounds happens here rather than in the FX converter,
/// since GBX is not an ISO-4217 code the FX vendor recognises.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LseFeedData {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub last_price: String,
    #[serde(default)]
    pub market_cap: String,
}

impl TryFrom<LseFeedData> for RawEquity {
    type Error = String;

    fn try_from(data: LseFeedData) -> Result<Self, Self::Error> {
        let (currency, last_price) = if data.currency.eq_ignore_ascii_case("GBX") {
            ("GBP".to_string(), divide_by_100(&data.last_price)?)
        } else {
            (data.currency.clone(), data.last_price.clone())
        };

        RawEquity::build(RawEquityInput {
            name: &data.name,
            symbol: &data.symbol,
            isin: Some(&data.isin),
            cusip: None,
            share_class_figi: None,
            mics: vec!["XLON".to_string()],
            currency: Some(&currency),
            last_price: Some(&last_price),
            market_cap: Some(&data.market_cap),
        })
    }
}

fn divide_by_100(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        return Ok(String::new());
    }
    let value: rust_decimal::Decimal = raw
        .trim()
        .replace(',', "")
        .parse()
        .map_err(|_| format!("{raw:?} is not a valid GBX price"))?;
    Ok((value / rust_decimal::Decimal::from(100)).to_string())
}

/// Deutsche Börse's Xetra listing feed; unlisted currency/MIC default to
/// EUR/XETR the way the adapter this was grounded on always did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XetraFeedData {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub last_price: String,
    #[serde(default)]
    pub market_cap: String,
}

impl TryFrom<XetraFeedData> for RawEquity {
    type Error = String;

    fn try_from(data: XetraFeedData) -> Result<Self, Self::Error> {
        let currency = if data.currency.trim().is_empty() {
            "EUR".to_string()
        } else {
            data.currency.clone()
        };

        RawEquity::build(RawEquityInput {
            name: &data.name,
            symbol: &data.symbol,
            isin: Some(&data.isin),
            cusip: None,
            share_class_figi: None,
            mics: vec!["XETR".to_string()],
            currency: Some(&currency),
            last_price: Some(&data.last_price),
            market_cap: Some(&data.market_cap),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lse_converts_gbx_to_gbp() {
        let data = LseFeedData {
            name: "Example Plc".to_string(),
            symbol: "EXM".to_string(),
            isin: "GB0000000001".to_string(),
            currency: "GBX".to_string(),
            last_price: "12345".to_string(),
            market_cap: "".to_string(),
        };
        let equity = RawEquity::try_from(data).unwrap();
        assert_eq!(equity.currency.unwrap().as_str(), "GBP");
        assert_eq!(equity.last_price.unwrap().to_string(), "123.45");
    }

    #[test]
    fn xetra_defaults_currency_to_eur() {
        let data = XetraFeedData {
            name: "Beispiel AG".to_string(),
            symbol: "BSP".to_string(),
            isin: "DE0000000001".to_string(),
            currency: "".to_string(),
            last_price: "10,50".to_string(),
            market_cap: "".to_string(),
        };
        let equity = RawEquity::try_from(data).unwrap();
        assert_eq!(equity.currency.unwrap().as_str(), "EUR");
    }

    #[test]
    fn xetra_carries_market_cap_through() {
        let data = XetraFeedData {
            name: "Beispiel AG".to_string(),
            symbol: "BSP".to_string(),
            isin: "DE0000000001".to_string(),
            currency: "EUR".to_string(),
            last_price: "10.50".to_string(),
            market_cap: "123456.78".to_string(),
        };
        let equity = RawEquity::try_from(data).unwrap();
        assert_eq!(equity.market_cap.unwrap().to_string(), "123456.78");
        assert_eq!(equity.mics.unwrap()[0].as_str(), "XETR");
    }
}
