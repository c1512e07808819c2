//! In-memory paper venue
//!
//! Simulates a perpetual-futures exchange closely enough to drive the whole
//! trading cycle in dry-run mode and in tests:
//! - market orders fill against the top of the book
//! - limit orders rest until [`PaperExchange::fill_resting_orders`] (or fill
//!   instantly when enabled)
//! - trigger orders rest forever
//! - withdrawals travel over a shared [`PaperNetwork`] and arrive as
//!   confirmed deposits on the venue owning the destination address

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    AccountType, Balance, Balances, Market, Order, OrderBook, OrderRequest, OrderSide,
    OrderStatus, OrderType, Position, PositionSide, Transaction, TransactionStatus,
    WithdrawRequest,
};
use crate::error::{ArbError, Result};
use crate::exchange::ExchangeAdapter;

const MAINTENANCE_MARGIN_RATE: Decimal = dec!(0.005);

#[derive(Debug, Clone)]
struct OnChainTransfer {
    txid: String,
    currency: String,
    amount: Decimal,
    address: String,
    network: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Shared "blockchain" between paper venues
#[derive(Debug, Default)]
pub struct PaperNetwork {
    transfers: Mutex<Vec<OnChainTransfer>>,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl PaperNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pin the simulated clock used for transaction timestamps
    pub async fn set_time(&self, now: DateTime<Utc>) {
        *self.clock.lock().await = Some(now);
    }

    pub async fn now(&self) -> DateTime<Utc> {
        self.clock.lock().await.unwrap_or_else(Utc::now)
    }

    async fn broadcast(&self, transfer: OnChainTransfer) {
        self.transfers.lock().await.push(transfer);
    }

    async fn transfers_to(&self, address: &str) -> Vec<OnChainTransfer> {
        self.transfers
            .lock()
            .await
            .iter()
            .filter(|t| t.address == address)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
struct PaperPosition {
    /// Signed contracts, positive = long
    contracts: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Default)]
struct VenueState {
    books: HashMap<String, OrderBook>,
    markets: HashMap<String, Market>,
    positions: HashMap<String, PaperPosition>,
    orders: Vec<Order>,
    created: Vec<OrderRequest>,
    balances: HashMap<AccountType, Balances>,
    withdrawals: Vec<Transaction>,
    deposits: Vec<Transaction>,
    credited: HashSet<String>,
    leverage: HashMap<String, Decimal>,
    risk_tiers: HashMap<String, u32>,
    withdraw_calls: usize,
    order_faults: usize,
    order_faults_transient: bool,
    seq: u64,
}

impl VenueState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn balance_mut(&mut self, account: AccountType, currency: &str) -> &mut Balance {
        self.balances
            .entry(account)
            .or_default()
            .entry(currency.to_string())
            .or_default()
    }

    fn apply_fill(&mut self, symbol: &str, side: OrderSide, contracts: Decimal, price: Decimal) {
        let pos = self.positions.entry(symbol.to_string()).or_default();
        let delta = match side {
            OrderSide::Buy => contracts,
            OrderSide::Sell => -contracts,
        };
        let next = pos.contracts + delta;
        let growing = pos.contracts.is_zero()
            || (pos.contracts.is_sign_positive() == delta.is_sign_positive());
        if growing {
            let notional = pos.contracts.abs() * pos.entry_price + contracts * price;
            pos.entry_price = notional / next.abs();
        } else if next.is_sign_positive() != pos.contracts.is_sign_positive() && !next.is_zero() {
            // flipped through zero
            pos.entry_price = price;
        }
        pos.contracts = next;
        if pos.contracts.is_zero() {
            pos.entry_price = Decimal::ZERO;
        }
    }
}

/// Simulated venue implementing [`ExchangeAdapter`]
pub struct PaperExchange {
    name: String,
    deposit_address: String,
    network: Arc<PaperNetwork>,
    state: Mutex<VenueState>,
    instant_limit_fills: bool,
    report_liquidation: bool,
}

impl PaperExchange {
    pub fn new(name: &str, deposit_address: &str, network: Arc<PaperNetwork>) -> Self {
        Self {
            name: name.to_string(),
            deposit_address: deposit_address.to_string(),
            network,
            state: Mutex::new(VenueState::default()),
            instant_limit_fills: false,
            report_liquidation: true,
        }
    }

    /// Fill limit orders at their price as soon as they are placed
    pub fn with_instant_limit_fills(mut self, enabled: bool) -> Self {
        self.instant_limit_fills = enabled;
        self
    }

    /// Whether positions carry a venue-computed liquidation price
    pub fn with_liquidation_reporting(mut self, enabled: bool) -> Self {
        self.report_liquidation = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn set_market(&self, market: Market) {
        self.state.lock().await.markets.insert(market.symbol.clone(), market);
    }

    pub async fn set_order_book(&self, symbol: &str, book: OrderBook) {
        self.state.lock().await.books.insert(symbol.to_string(), book);
    }

    pub async fn set_balance(&self, account: AccountType, currency: &str, amount: Decimal) {
        let mut state = self.state.lock().await;
        *state.balance_mut(account, currency) = Balance {
            free: amount,
            total: amount,
        };
    }

    /// Seed a position directly (signed contracts, positive = long)
    pub async fn set_position(&self, symbol: &str, contracts: Decimal, entry_price: Decimal) {
        self.state.lock().await.positions.insert(
            symbol.to_string(),
            PaperPosition {
                contracts,
                entry_price,
            },
        );
    }

    /// Fill every resting non-trigger limit order at its own price
    pub async fn fill_resting_orders(&self) -> usize {
        let mut state = self.state.lock().await;
        let fills: Vec<(usize, String, OrderSide, Decimal, Decimal)> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.status.is_active() && o.trigger.is_none())
            .map(|(i, o)| (i, o.symbol.clone(), o.side, o.remaining, o.price.unwrap_or_default()))
            .collect();
        for (idx, symbol, side, amount, price) in &fills {
            state.apply_fill(symbol, *side, *amount, *price);
            let order = &mut state.orders[*idx];
            order.remaining = Decimal::ZERO;
            order.status = OrderStatus::Closed;
        }
        fills.len()
    }

    /// Fail the next `count` order submissions, as a dropped connection when `transient`
    pub async fn fail_next_orders(&self, count: usize, transient: bool) {
        let mut state = self.state.lock().await;
        state.order_faults = count;
        state.order_faults_transient = transient;
    }

    /// Every order request accepted so far
    pub async fn created_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().await.created.clone()
    }

    pub async fn withdraw_calls(&self) -> usize {
        self.state.lock().await.withdraw_calls
    }

    pub async fn leverage(&self, symbol: &str) -> Option<Decimal> {
        self.state.lock().await.leverage.get(symbol).copied()
    }

    pub async fn risk_tier(&self, symbol: &str) -> Option<u32> {
        self.state.lock().await.risk_tiers.get(symbol).copied()
    }

    async fn sync_deposits(&self) {
        let incoming = self.network.transfers_to(&self.deposit_address).await;
        let mut state = self.state.lock().await;
        for transfer in incoming {
            if !state.credited.insert(transfer.txid.clone()) {
                continue;
            }
            let balance = state.balance_mut(AccountType::Funding, &transfer.currency);
            balance.free += transfer.amount;
            balance.total += transfer.amount;
            let id = state.next_id("dep");
            state.deposits.push(Transaction {
                id,
                txid: Some(transfer.txid.clone()),
                currency: transfer.currency.clone(),
                amount: transfer.amount,
                address: Some(transfer.address.clone()),
                tag: None,
                network: transfer.network.clone(),
                status: TransactionStatus::Ok,
                timestamp: transfer.timestamp,
            });
            debug!(exchange = %self.name, txid = %transfer.txid, amount = %transfer.amount, "paper deposit credited");
        }
    }

    fn unavailable(&self, what: &str) -> ArbError {
        ArbError::exchange(&self.name, what)
    }
}

fn filter_history(
    records: &[Transaction],
    currency: &str,
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> Vec<Transaction> {
    let matching: Vec<Transaction> = records
        .iter()
        .filter(|t| t.currency == currency)
        .filter(|t| since.map_or(true, |s| t.timestamp >= s))
        .cloned()
        .collect();
    let skip = matching.len().saturating_sub(limit);
    matching.into_iter().skip(skip).collect()
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let state = self.state.lock().await;
        let book = state
            .books
            .get(symbol)
            .ok_or_else(|| self.unavailable(&format!("no order book for {symbol}")))?;
        Ok(OrderBook {
            bids: book.bids.iter().take(depth).copied().collect(),
            asks: book.asks.iter().take(depth).copied().collect(),
        })
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let now = self.network.now().await;
        let mut state = self.state.lock().await;

        if state.order_faults > 0 {
            state.order_faults -= 1;
            return Err(if state.order_faults_transient {
                ArbError::exchange(&self.name, "connection reset")
            } else {
                ArbError::Validation(format!("{}: order rejected", self.name))
            });
        }

        let mut amount = request.amount;
        if request.reduce_only && request.trigger.is_none() {
            let held = state
                .positions
                .get(&request.symbol)
                .map(|p| p.contracts)
                .unwrap_or_default();
            let reducible = match request.side {
                OrderSide::Sell if held > Decimal::ZERO => held,
                OrderSide::Buy if held < Decimal::ZERO => -held,
                _ => Decimal::ZERO,
            };
            amount = amount.min(reducible);
        }
        if amount <= Decimal::ZERO {
            return Err(ArbError::Validation(format!(
                "{}: order amount {} rejected (reduce_only={})",
                self.name, request.amount, request.reduce_only
            )));
        }

        let id = state.next_id("ord");
        let mut order = Order {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            amount,
            remaining: amount,
            status: OrderStatus::Open,
            reduce_only: request.reduce_only,
            trigger_price: request.trigger_price,
            trigger: request.trigger,
            created_at: now,
        };

        let fill_price = match (request.order_type, request.trigger) {
            (_, Some(_)) => None,
            (OrderType::Market, None) => {
                let book = state.books.get(&request.symbol).cloned().unwrap_or_default();
                let price = match request.side {
                    OrderSide::Buy => book.best_ask(),
                    OrderSide::Sell => book.best_bid(),
                };
                Some(price.ok_or_else(|| {
                    self.unavailable(&format!("no liquidity for {} {}", request.side, request.symbol))
                })?)
            }
            (OrderType::Limit, None) if self.instant_limit_fills => request.price,
            (OrderType::Limit, None) => None,
        };

        if let Some(price) = fill_price {
            state.apply_fill(&request.symbol, request.side, amount, price);
            order.remaining = Decimal::ZERO;
            order.status = OrderStatus::Closed;
            order.price = Some(price);
        }

        state.created.push(request.clone());
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.orders.iter_mut().find(|o| o.id == id && o.status.is_active()) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                Ok(())
            }
            None => Err(ArbError::OrderNotFound(id.to_string())),
        }
    }

    async fn cancel_all_orders(&self, symbol: &str, stop: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        for order in state
            .orders
            .iter_mut()
            .filter(|o| o.symbol == symbol && o.status.is_active() && o.trigger.is_some() == stop)
        {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn fetch_order(&self, id: &str, _symbol: &str) -> Result<Order> {
        let state = self.state.lock().await;
        state
            .orders
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or_else(|| ArbError::OrderNotFound(id.to_string()))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.status.is_active() && o.trigger.is_none())
            .cloned()
            .collect())
    }

    async fn fetch_open_stop_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.status.is_active() && o.trigger.is_some())
            .cloned()
            .collect())
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Position> {
        let state = self.state.lock().await;
        let contract_size = state
            .markets
            .get(symbol)
            .map(|m| m.contract_size)
            .unwrap_or(Decimal::ONE);
        let paper = state.positions.get(symbol).cloned().unwrap_or_default();
        if paper.contracts.is_zero() {
            return Ok(Position::flat(symbol, contract_size));
        }

        let side = if paper.contracts > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        let mark_price = state
            .books
            .get(symbol)
            .and_then(|b| b.mid())
            .unwrap_or(paper.entry_price);
        let leverage = state.leverage.get(symbol).copied().unwrap_or(Decimal::ONE);
        let notional = paper.contracts.abs() * contract_size * paper.entry_price;
        let liquidation_price = self.report_liquidation.then(|| {
            let move_frac = Decimal::ONE / leverage - MAINTENANCE_MARGIN_RATE;
            match side {
                PositionSide::Long => paper.entry_price * (Decimal::ONE - move_frac),
                PositionSide::Short => paper.entry_price * (Decimal::ONE + move_frac),
            }
        });

        Ok(Position {
            symbol: symbol.to_string(),
            contracts: paper.contracts.abs(),
            contract_size,
            side: Some(side),
            entry_price: paper.entry_price,
            mark_price,
            liquidation_price,
            initial_margin: notional / leverage,
            maintenance_margin: notional * MAINTENANCE_MARGIN_RATE,
        })
    }

    async fn fetch_balance(&self, account: AccountType) -> Result<Balances> {
        self.sync_deposits().await;
        let state = self.state.lock().await;
        Ok(state.balances.get(&account).cloned().unwrap_or_default())
    }

    async fn transfer(
        &self,
        currency: &str,
        amount: Decimal,
        from: AccountType,
        to: AccountType,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let source = state.balance_mut(from, currency);
        if source.free < amount {
            return Err(ArbError::InsufficientFunds {
                exchange: self.name.clone(),
                required: amount,
                available: source.free,
            });
        }
        source.free -= amount;
        source.total -= amount;
        let target = state.balance_mut(to, currency);
        target.free += amount;
        target.total += amount;
        Ok(())
    }

    async fn withdraw(&self, request: &WithdrawRequest) -> Result<Transaction> {
        let now = self.network.now().await;
        let mut state = self.state.lock().await;
        state.withdraw_calls += 1;

        let funding = state.balance_mut(AccountType::Funding, &request.currency);
        if funding.free < request.amount {
            return Err(ArbError::InsufficientFunds {
                exchange: self.name.clone(),
                required: request.amount,
                available: funding.free,
            });
        }
        funding.free -= request.amount;
        funding.total -= request.amount;

        let id = state.next_id("wd");
        let txid = format!("0x{}", Uuid::new_v4().simple());
        let tx = Transaction {
            id,
            txid: Some(txid.clone()),
            currency: request.currency.clone(),
            amount: request.amount,
            address: Some(request.address.clone()),
            tag: request.tag.clone(),
            network: request.network.clone(),
            status: TransactionStatus::Ok,
            timestamp: now,
        };
        state.withdrawals.push(tx.clone());
        drop(state);

        self.network
            .broadcast(OnChainTransfer {
                txid,
                currency: request.currency.clone(),
                amount: request.amount,
                address: request.address.clone(),
                network: request.network.clone(),
                timestamp: now,
            })
            .await;
        Ok(tx)
    }

    async fn fetch_withdrawals(
        &self,
        currency: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(filter_history(&state.withdrawals, currency, since, limit))
    }

    async fn fetch_deposits(
        &self,
        currency: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Transaction>> {
        self.sync_deposits().await;
        let state = self.state.lock().await;
        Ok(filter_history(&state.deposits, currency, since, limit))
    }

    async fn market(&self, symbol: &str) -> Result<Market> {
        let state = self.state.lock().await;
        state
            .markets
            .get(symbol)
            .cloned()
            .ok_or_else(|| ArbError::MissingData(format!("{}: unknown market {symbol}", self.name)))
    }

    async fn set_leverage(&self, leverage: Decimal, symbol: &str) -> Result<()> {
        self.state.lock().await.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn set_risk_limit(&self, tier: u32, symbol: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.risk_tiers.get(symbol) == Some(&tier) {
            return Err(ArbError::NotModified(format!("risk limit already {tier}")));
        }
        state.risk_tiers.insert(symbol.to_string(), tier);
        Ok(())
    }
}
