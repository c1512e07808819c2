use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    AccountType, Balances, FundingRates, Market, Order, OrderBook, OrderRequest, Position,
    ReferenceData, Transaction, WithdrawRequest,
};
use crate::error::Result;

/// Capability interface of a derivatives venue.
///
/// Venue quirks (margin-mode flags, stop-order query parameters, account
/// type semantics) live inside implementations. Benign responses such as
/// "order not found" or "risk limit not modified" are reported as
/// `ArbError::OrderNotFound` / `ArbError::NotModified`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<()>;

    /// Cancel every resting order, or every trigger order when `stop` is set
    async fn cancel_all_orders(&self, symbol: &str, stop: bool) -> Result<()>;

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<Order>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    /// Open trigger / conditional orders
    async fn fetch_open_stop_orders(&self, symbol: &str) -> Result<Vec<Order>>;

    async fn fetch_position(&self, symbol: &str) -> Result<Position>;

    async fn fetch_balance(&self, account: AccountType) -> Result<Balances>;

    async fn transfer(
        &self,
        currency: &str,
        amount: Decimal,
        from: AccountType,
        to: AccountType,
    ) -> Result<()>;

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<Transaction>;

    async fn fetch_withdrawals(
        &self,
        currency: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Transaction>>;

    async fn fetch_deposits(
        &self,
        currency: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Transaction>>;

    async fn market(&self, symbol: &str) -> Result<Market>;

    async fn set_leverage(&self, leverage: Decimal, symbol: &str) -> Result<()>;

    async fn set_risk_limit(&self, tier: u32, symbol: &str) -> Result<()>;
}

/// Static fee and leverage-tier tables
#[async_trait]
pub trait ReferenceDataProvider: Send + Sync {
    async fn load(&self) -> Result<ReferenceData>;
}

/// Current funding rates, refreshed on every call
#[async_trait]
pub trait FundingRateProvider: Send + Sync {
    async fn fetch(&self) -> Result<FundingRates>;
}
