//! Sub-account balance management
//!
//! Venues keep trading margin and withdrawable funds in separate accounts.
//! These helpers move the settlement currency between them and size how much
//! capital a cycle may use.

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::{free_balance, AccountType};
use crate::error::{ArbError, Result};
use crate::exchange::ExchangeAdapter;

/// Balance operations in one settlement currency
#[derive(Debug, Clone)]
pub struct FundManager {
    currency: String,
    dust_reserve: Decimal,
}

impl FundManager {
    pub fn new(currency: &str, dust_reserve: Decimal) -> Self {
        Self {
            currency: currency.to_string(),
            dust_reserve,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Free balance in `account`
    pub async fn free(&self, adapter: &dyn ExchangeAdapter, account: AccountType) -> Result<Decimal> {
        let balances = adapter.fetch_balance(account).await?;
        Ok(free_balance(&balances, &self.currency))
    }

    /// Capital available on the custody venue across both accounts, optionally capped
    pub async fn custody_capital(
        &self,
        adapter: &dyn ExchangeAdapter,
        cap: Option<Decimal>,
    ) -> Result<Decimal> {
        let funding = self.free(adapter, AccountType::Funding).await?;
        let trading = self.free(adapter, AccountType::Trading).await?;
        let total = funding + trading;
        let capital = cap.map_or(total, |c| total.min(c));
        debug!(%funding, %trading, %capital, "custody capital");
        Ok(capital)
    }

    /// Sweep trading free balance into funding and return the withdrawable amount.
    ///
    /// With `requested`, that amount must be available; otherwise everything
    /// above the dust reserve is withdrawable.
    pub async fn prepare_withdrawal(
        &self,
        exchange: &str,
        adapter: &dyn ExchangeAdapter,
        requested: Option<Decimal>,
    ) -> Result<Decimal> {
        let trading = self.free(adapter, AccountType::Trading).await?;
        let funding = self.free(adapter, AccountType::Funding).await?;

        // move only what funding lacks when an explicit amount is asked for
        let sweep = match requested {
            Some(amount) => (amount - funding).max(Decimal::ZERO).min(trading),
            None => trading,
        };
        if sweep > Decimal::ZERO {
            adapter
                .transfer(&self.currency, sweep, AccountType::Trading, AccountType::Funding)
                .await?;
            info!(exchange, amount = %sweep, "moved trading balance to funding");
        }

        let available = funding + sweep;
        let amount = requested.unwrap_or(available - self.dust_reserve);
        if amount <= Decimal::ZERO || amount > available {
            return Err(ArbError::InsufficientFunds {
                exchange: exchange.to_string(),
                required: amount.max(self.dust_reserve),
                available,
            });
        }
        Ok(amount)
    }

    /// Top the trading account up to `amount` from funding, for a leg trading on the custody venue.
    ///
    /// Trading is measured by total balance, so margin already in use counts
    /// and repeated calls move nothing once the account holds `amount`.
    pub async fn fund_trading(
        &self,
        exchange: &str,
        adapter: &dyn ExchangeAdapter,
        amount: Decimal,
    ) -> Result<Decimal> {
        let trading = adapter
            .fetch_balance(AccountType::Trading)
            .await?
            .get(&self.currency)
            .map_or(Decimal::ZERO, |b| b.total);
        let funding = self.free(adapter, AccountType::Funding).await?;
        let moved = (amount - trading).max(Decimal::ZERO).min(funding);
        if moved > Decimal::ZERO {
            adapter
                .transfer(&self.currency, moved, AccountType::Funding, AccountType::Trading)
                .await?;
            info!(exchange, amount = %moved, "moved leg capital to trading");
        }
        Ok(moved)
    }

    /// Move everything in funding into trading so it backs margin
    pub async fn sweep_to_trading(&self, exchange: &str, adapter: &dyn ExchangeAdapter) -> Result<Decimal> {
        let funding = self.free(adapter, AccountType::Funding).await?;
        if funding > Decimal::ZERO {
            adapter
                .transfer(&self.currency, funding, AccountType::Funding, AccountType::Trading)
                .await?;
            info!(exchange, amount = %funding, "moved funding balance to trading");
        }
        Ok(funding)
    }
}
