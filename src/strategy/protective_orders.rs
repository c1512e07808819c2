//! Stop-loss and take-profit coverage for hedge legs
//!
//! Each leg gets reduce-only trigger orders covering its whole position:
//! a stop-loss just inside its own liquidation price and a take-profit where
//! the opposite leg would approach liquidation.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::{ExecutionConfig, ProtectionConfig};
use crate::coordination::retry::adjust_until_target_met;
use crate::domain::{free_balance, AccountType, OrderRequest, Position, PositionSide, TriggerKind};
use crate::error::{ArbError, Result};

use super::hedge_executor::HedgeLeg;
use super::order_sizer::{plan_leg, LegSizing};

/// Trigger and limit price of one conditional order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriggerPrices {
    pub trigger: Decimal,
    pub limit: Decimal,
}

/// What was placed for one leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectionReport {
    pub exchange: String,
    pub side: PositionSide,
    pub liquidation_price: Decimal,
    pub stop_loss: TriggerPrices,
    pub take_profit: TriggerPrices,
    /// Position size covered by each order kind, base units
    pub covered: Decimal,
}

/// Liquidation price implied by margin when the venue doesn't report one
pub fn derive_liquidation_price(position: &Position, available: Decimal) -> Option<Decimal> {
    let size = position.size();
    if size.is_zero() {
        return None;
    }
    let cushion = (available + position.initial_margin - position.maintenance_margin) / size;
    let liq = match position.side? {
        PositionSide::Long => position.mark_price - cushion,
        PositionSide::Short => position.mark_price + cushion,
    };
    (liq > Decimal::ZERO).then_some(liq)
}

/// Stop-loss sitting `limit` inside liquidation, triggered a further `trigger` earlier
pub fn stop_loss_prices(
    side: PositionSide,
    liquidation: Decimal,
    limit: Decimal,
    trigger: Decimal,
) -> TriggerPrices {
    match side {
        PositionSide::Long => {
            let limit_price = liquidation * (Decimal::ONE + limit);
            TriggerPrices {
                trigger: limit_price * (Decimal::ONE + trigger),
                limit: limit_price,
            }
        }
        PositionSide::Short => {
            let limit_price = liquidation * (Decimal::ONE - limit);
            TriggerPrices {
                trigger: limit_price * (Decimal::ONE - trigger),
                limit: limit_price,
            }
        }
    }
}

/// Take-profit anchored at the opposite leg's liquidation, shifted by the entry differential
pub fn take_profit_prices(
    side: PositionSide,
    own_entry: Decimal,
    opposite_entry: Decimal,
    opposite_liquidation: Decimal,
    limit: Decimal,
    trigger: Decimal,
) -> TriggerPrices {
    let anchor = opposite_liquidation + (own_entry - opposite_entry);
    match side {
        PositionSide::Long => {
            let trigger_price = anchor * (Decimal::ONE - limit);
            TriggerPrices {
                trigger: trigger_price,
                limit: trigger_price * (Decimal::ONE - trigger),
            }
        }
        PositionSide::Short => {
            let trigger_price = anchor * (Decimal::ONE + limit);
            TriggerPrices {
                trigger: trigger_price,
                limit: trigger_price * (Decimal::ONE + trigger),
            }
        }
    }
}

/// Places protective orders until each leg is fully covered
pub struct ProtectivePlanner {
    protection: ProtectionConfig,
    execution: ExecutionConfig,
    currency: String,
}

impl ProtectivePlanner {
    pub fn new(protection: ProtectionConfig, execution: ExecutionConfig, currency: &str) -> Self {
        Self {
            protection,
            execution,
            currency: currency.to_string(),
        }
    }

    /// Cover `leg` with a stop-loss and a take-profit; `opposite` anchors the take-profit
    #[instrument(skip_all, fields(exchange = %leg.exchange, side = %leg.side))]
    pub async fn protect(&self, leg: &HedgeLeg, opposite: &HedgeLeg) -> Result<ProtectionReport> {
        let position = leg.adapter.fetch_position(leg.symbol()).await?;
        let size = position.size_on(leg.side);
        if size < leg.market.min_size() {
            return Err(self.failed(leg, format!("no {} position to protect", leg.side)));
        }

        let liquidation = self.liquidation_price(leg, &position).await?;
        let opposite_position = opposite.adapter.fetch_position(opposite.symbol()).await?;
        let opposite_liquidation = self.liquidation_price(opposite, &opposite_position).await?;

        let limit = self.protection.limit;
        let trigger = self.protection.trigger;
        let stop_loss = rounded(leg, stop_loss_prices(leg.side, liquidation, limit, trigger));
        let take_profit = rounded(
            leg,
            take_profit_prices(
                leg.side,
                position.entry_price,
                opposite_position.entry_price,
                opposite_liquidation,
                limit,
                trigger,
            ),
        );

        let beyond_entry = match leg.side {
            PositionSide::Long => stop_loss.trigger < position.entry_price,
            PositionSide::Short => stop_loss.trigger > position.entry_price,
        };
        if !beyond_entry {
            return Err(self.failed(
                leg,
                format!(
                    "stop-loss trigger {} is not beyond entry {}",
                    stop_loss.trigger, position.entry_price
                ),
            ));
        }

        info!(
            %size, %liquidation,
            sl_trigger = %stop_loss.trigger, tp_trigger = %take_profit.trigger,
            "Placing protective orders"
        );
        let covered = self.cover(leg, size, TriggerKind::StopLoss, stop_loss).await?;
        self.cover(leg, size, TriggerKind::TakeProfit, take_profit).await?;

        Ok(ProtectionReport {
            exchange: leg.exchange.clone(),
            side: leg.side,
            liquidation_price: liquidation,
            stop_loss,
            take_profit,
            covered,
        })
    }

    async fn liquidation_price(&self, leg: &HedgeLeg, position: &Position) -> Result<Decimal> {
        if let Some(price) = position.liquidation_price.filter(|p| *p > Decimal::ZERO) {
            return Ok(price);
        }
        let balances = leg.adapter.fetch_balance(AccountType::Trading).await?;
        let available = free_balance(&balances, &self.currency);
        match derive_liquidation_price(position, available) {
            Some(price) => {
                warn!(exchange = %leg.exchange, %price, "venue reported no liquidation price, derived from margin");
                Ok(price)
            }
            None => Err(self.failed(leg, "cannot derive liquidation price".to_string())),
        }
    }

    async fn cover(
        &self,
        leg: &HedgeLeg,
        size: Decimal,
        kind: TriggerKind,
        prices: TriggerPrices,
    ) -> Result<Decimal> {
        let side = leg.side.closing_side();
        let contract_size = leg.market.contract_size;
        let batch = self.execution.ideal_batch_size as usize;
        let operation = format!("{kind:?} coverage on {}", leg.exchange);

        let result = adjust_until_target_met(
            &operation,
            size,
            leg.market.min_size(),
            self.protection.retry_limit,
            self.protection.poll_interval(),
            || async move {
                let orders = leg.adapter.fetch_open_stop_orders(leg.symbol()).await?;
                Ok(orders
                    .iter()
                    .filter(|o| o.trigger == Some(kind) && o.side == side)
                    .map(|o| o.remaining)
                    .sum::<Decimal>()
                    * contract_size)
            },
            |remaining| async move {
                let ideal = self.execution.ideal_order_value / prices.limit;
                let plan = plan_leg(&LegSizing::new(remaining, &leg.market), ideal);
                for amount in plan.amounts().into_iter().take(batch) {
                    let request = OrderRequest::trigger(
                        leg.symbol(),
                        side,
                        amount,
                        kind,
                        prices.trigger,
                        prices.limit,
                    );
                    leg.adapter.create_order(&request).await?;
                }
                Ok(())
            },
        )
        .await;

        result.map_err(|e| match e {
            ArbError::RetryExhausted { attempts, .. } => {
                self.failed(leg, format!("{kind:?} coverage stalled after {attempts} checks"))
            }
            other => other,
        })
    }

    fn failed(&self, leg: &HedgeLeg, reason: String) -> ArbError {
        ArbError::ProtectionFailed {
            leg: leg.side.to_string(),
            exchange: leg.exchange.clone(),
            reason,
        }
    }
}

fn rounded(leg: &HedgeLeg, prices: TriggerPrices) -> TriggerPrices {
    TriggerPrices {
        trigger: leg.market.round_price(prices.trigger),
        limit: leg.market.round_price(prices.limit),
    }
}
