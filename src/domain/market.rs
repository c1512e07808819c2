use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Single price level in an order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot, best levels first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().find(|l| l.size > Decimal::ZERO).map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().find(|l| l.size > Decimal::ZERO).map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Order side that grows a position in this direction
    pub fn opening_side(&self) -> super::OrderSide {
        match self {
            PositionSide::Long => super::OrderSide::Buy,
            PositionSide::Short => super::OrderSide::Sell,
        }
    }

    /// Order side that shrinks a position in this direction
    pub fn closing_side(&self) -> super::OrderSide {
        self.opening_side().opposite()
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live position on a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub contracts: Decimal,
    pub contract_size: Decimal,
    pub side: Option<PositionSide>,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub initial_margin: Decimal,
    pub maintenance_margin: Decimal,
}

impl Position {
    pub fn flat(symbol: &str, contract_size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            contracts: Decimal::ZERO,
            contract_size,
            side: None,
            entry_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            liquidation_price: None,
            initial_margin: Decimal::ZERO,
            maintenance_margin: Decimal::ZERO,
        }
    }

    /// Size in base units
    pub fn size(&self) -> Decimal {
        self.contracts.abs() * self.contract_size
    }

    /// Size held in `side`, zero when the position points the other way
    pub fn size_on(&self, side: PositionSide) -> Decimal {
        match self.side {
            Some(s) if s == side => self.size(),
            _ => Decimal::ZERO,
        }
    }
}

/// Sub-account of a venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Trading,
    Funding,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Trading => write!(f, "trading"),
            AccountType::Funding => write!(f, "funding"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub total: Decimal,
}

pub type Balances = HashMap<String, Balance>;

/// Free balance of `currency`, zero when the venue reports nothing
pub fn free_balance(balances: &Balances, currency: &str) -> Decimal {
    balances.get(currency).map(|b| b.free).unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Ok,
    Failed,
    Canceled,
}

/// Withdrawal or deposit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub txid: Option<String>,
    pub currency: String,
    pub amount: Decimal,
    pub address: Option<String>,
    pub tag: Option<String>,
    pub network: Option<String>,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

/// Withdrawal instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub currency: String,
    pub amount: Decimal,
    pub address: String,
    pub tag: Option<String>,
    pub network: Option<String>,
}

/// Instrument metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub contract_size: Decimal,
    /// Minimum order amount in contracts
    pub min_amount: Decimal,
    /// Maximum order amount in contracts
    pub max_amount: Option<Decimal>,
    /// Price tick
    pub price_precision: Decimal,
}

impl Market {
    /// Smallest order in base units
    pub fn min_size(&self) -> Decimal {
        self.min_amount * self.contract_size
    }

    /// Largest order in base units
    pub fn max_size(&self) -> Option<Decimal> {
        self.max_amount.map(|m| m * self.contract_size)
    }

    /// Base units to contracts, rounded down
    pub fn to_contracts(&self, size: Decimal) -> Decimal {
        if self.contract_size.is_zero() {
            return Decimal::ZERO;
        }
        (size / self.contract_size).floor()
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.price_precision.is_zero() {
            return price;
        }
        (price / self.price_precision).round() * self.price_precision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_book_skips_empty_levels() {
        let book = OrderBook {
            bids: vec![PriceLevel::new(dec!(100), dec!(0)), PriceLevel::new(dec!(99), dec!(2))],
            asks: vec![PriceLevel::new(dec!(101), dec!(1))],
        };
        assert_eq!(book.best_bid(), Some(dec!(99)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.mid(), Some(dec!(100)));
    }

    #[test]
    fn test_position_size_on_side() {
        let mut pos = Position::flat("ETH/USDT:USDT", dec!(0.1));
        pos.contracts = dec!(25);
        pos.side = Some(PositionSide::Short);
        assert_eq!(pos.size(), dec!(2.5));
        assert_eq!(pos.size_on(PositionSide::Short), dec!(2.5));
        assert_eq!(pos.size_on(PositionSide::Long), Decimal::ZERO);
    }

    #[test]
    fn test_market_rounding() {
        let market = Market {
            symbol: "BTC/USDT:USDT".into(),
            contract_size: dec!(0.001),
            min_amount: dec!(1),
            max_amount: Some(dec!(1000)),
            price_precision: dec!(0.5),
        };
        assert_eq!(market.to_contracts(dec!(0.0129)), dec!(12));
        assert_eq!(market.min_size(), dec!(0.001));
        assert_eq!(market.max_size(), Some(dec!(1)));
        assert_eq!(market.round_price(dec!(100.3)), dec!(100.5));
    }
}
