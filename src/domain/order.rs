use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

/// Conditional order flavour for protective orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::StopLoss => write!(f, "stop_loss"),
            TriggerKind::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// Order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

/// Order request (what we want the venue to do)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Amount in contracts
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    pub trigger_price: Option<Decimal>,
    pub trigger: Option<TriggerKind>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, amount: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            reduce_only: false,
            trigger_price: None,
            trigger: None,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, amount: Decimal, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, amount)
        }
    }

    /// Reduce-only conditional limit order
    pub fn trigger(
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        kind: TriggerKind,
        trigger_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            reduce_only: true,
            trigger_price: Some(trigger_price),
            trigger: Some(kind),
            ..Self::limit(symbol, side, amount, limit_price)
        }
    }

    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }
}

/// Order as tracked by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    /// Amount in contracts
    pub amount: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub reduce_only: bool,
    pub trigger_price: Option<Decimal>,
    pub trigger: Option<TriggerKind>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn filled(&self) -> Decimal {
        self.amount - self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trigger_request_is_reduce_only() {
        let req = OrderRequest::trigger(
            "BTC/USDT:USDT",
            OrderSide::Sell,
            dec!(3),
            TriggerKind::StopLoss,
            dec!(41000),
            dec!(40800),
        );
        assert!(req.reduce_only);
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.price, Some(dec!(40800)));
        assert_eq!(req.trigger, Some(TriggerKind::StopLoss));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }
}
