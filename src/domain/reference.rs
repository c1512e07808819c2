use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One rung of a venue's leverage ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeverageTier {
    pub tier: u32,
    pub max_leverage: Decimal,
    pub max_notional: Decimal,
    pub min_notional: Decimal,
    pub maintenance_margin_rate: Decimal,
}

/// Static fee and tier data for one trading pair on one exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReference {
    /// Percent of notional (0.02 = 0.02%)
    pub maker_fee: Decimal,
    /// Percent of notional
    pub taker_fee: Decimal,
    pub contract_size: Decimal,
    /// Tier notionals are in base currency rather than quote
    #[serde(default)]
    pub base_denominated: bool,
    /// Ordered from least risky (index 0) to riskiest notional band
    pub tiers: Vec<LeverageTier>,
}

/// coin -> exchange -> pair -> reference
pub type ReferenceData = HashMap<String, HashMap<String, HashMap<String, PairReference>>>;

/// Current funding quote for one pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingQuote {
    /// Funding rate per interval as a fraction
    pub rate: Decimal,
    #[serde(default)]
    pub mark_price: Option<Decimal>,
}

/// coin -> exchange -> pair -> quote
pub type FundingRates = HashMap<String, HashMap<String, HashMap<String, FundingQuote>>>;

/// Look up a pair's reference entry
pub fn pair_reference<'a>(
    reference: &'a ReferenceData,
    coin: &str,
    exchange: &str,
    pair: &str,
) -> Option<&'a PairReference> {
    reference.get(coin)?.get(exchange)?.get(pair)
}

/// Mark price for a pair, if the rate feed carried one
pub fn mark_price(rates: &FundingRates, coin: &str, exchange: &str, pair: &str) -> Option<Decimal> {
    rates.get(coin)?.get(exchange)?.get(pair)?.mark_price
}
