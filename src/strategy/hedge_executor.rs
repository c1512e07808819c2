//! Hedge execution loop
//!
//! Moves both legs of a hedge to a target size while keeping them equal. The
//! maker leg works resting limit orders at the touch; the taker leg mirrors
//! the maker's fills with market orders. The two loops run concurrently and
//! a correction pass removes any residue once both have converged.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutionConfig;
use crate::coordination::retry::{retry_until, RetryPolicy};
use crate::domain::{ExchangeLeg, Market, Order, OrderRequest, OrderSide, PositionSide};
use crate::error::{ignore_benign, Result};
use crate::exchange::{ExchangeAdapter, ExchangeRegistry};

use super::order_sizer::{ideal_size_for, plan_batches, plan_leg, LegSizing};

/// Where a hedge loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgePhase {
    /// Taker still mirroring the maker
    Balancing,
    /// Maker still working orders
    Placing,
    Converged,
}

/// One leg bound to its venue connection
#[derive(Clone)]
pub struct HedgeLeg {
    pub exchange: String,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub side: PositionSide,
    pub market: Market,
}

impl std::fmt::Debug for HedgeLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgeLeg")
            .field("exchange", &self.exchange)
            .field("side", &self.side)
            .field("symbol", &self.market.symbol)
            .finish()
    }
}

impl HedgeLeg {
    /// Look up the venue and instrument for a persisted leg
    pub async fn resolve(
        registry: &ExchangeRegistry,
        leg: &ExchangeLeg,
        side: PositionSide,
    ) -> Result<Self> {
        let adapter = registry.get(&leg.exchange)?;
        let market = adapter.market(&leg.symbol).await?;
        Ok(Self {
            exchange: leg.exchange.clone(),
            adapter,
            side,
            market,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.market.symbol
    }

    /// Live size on this leg's side, base units
    pub async fn size(&self) -> Result<Decimal> {
        let position = self.adapter.fetch_position(self.symbol()).await?;
        Ok(position.size_on(self.side))
    }

    fn order_side(&self, increase: bool) -> OrderSide {
        if increase {
            self.side.opening_side()
        } else {
            self.side.closing_side()
        }
    }
}

/// Final sizes after a hedge run, base units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgeReport {
    pub maker_size: Decimal,
    pub taker_size: Decimal,
}

/// Drives maker and taker legs to a common target
pub struct HedgeExecutor {
    config: ExecutionConfig,
}

impl HedgeExecutor {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Bring both legs to `target` base units (0 closes the hedge)
    #[instrument(skip_all, fields(maker = %maker.exchange, taker = %taker.exchange, %target))]
    pub async fn execute(
        &self,
        maker: &HedgeLeg,
        taker: &HedgeLeg,
        target: Decimal,
    ) -> Result<HedgeReport> {
        info!("Hedge run started");
        let maker_done = AtomicBool::new(false);

        tokio::try_join!(
            self.maker_loop(maker, target, &maker_done),
            self.taker_loop(maker, taker, target, &maker_done),
        )?;

        ignore_benign(maker.adapter.cancel_all_orders(maker.symbol(), false).await)?;

        let (maker_size, taker_size) =
            tokio::try_join!(self.correct(maker, target), self.correct(taker, target))?;

        info!(%maker_size, %taker_size, "Hedge converged");
        Ok(HedgeReport {
            maker_size,
            taker_size,
        })
    }

    async fn maker_loop(&self, maker: &HedgeLeg, target: Decimal, done: &AtomicBool) -> Result<()> {
        loop {
            match self.maker_step(maker, target).await {
                Ok(HedgePhase::Converged) => {
                    done.store(true, Ordering::SeqCst);
                    debug!(exchange = %maker.exchange, "maker leg converged");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(exchange = %maker.exchange, error = %e, "maker step failed, retrying")
                }
                Err(e) => return Err(e),
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn taker_loop(
        &self,
        maker: &HedgeLeg,
        taker: &HedgeLeg,
        target: Decimal,
        maker_done: &AtomicBool,
    ) -> Result<()> {
        loop {
            let done = maker_done.load(Ordering::SeqCst);
            match self.taker_step(maker, taker, target, done).await {
                Ok(HedgePhase::Converged) => {
                    debug!(exchange = %taker.exchange, "taker leg converged");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(exchange = %taker.exchange, error = %e, "taker step failed, retrying")
                }
                Err(e) => return Err(e),
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    /// One pass of the maker loop: trail the touch and keep the batch full
    pub async fn maker_step(&self, maker: &HedgeLeg, target: Decimal) -> Result<HedgePhase> {
        let size = maker.size().await?;
        let gap = target - size;
        let min_size = maker.market.min_size();
        if gap.abs() < min_size {
            return Ok(HedgePhase::Converged);
        }

        let side = maker.order_side(gap > Decimal::ZERO);
        let book = maker
            .adapter
            .fetch_order_book(maker.symbol(), self.config.order_book_depth)
            .await?;
        // passive: join our own side of the book
        let best = match side {
            OrderSide::Buy => book.best_bid(),
            OrderSide::Sell => book.best_ask(),
        };
        let Some(best) = best else {
            debug!(exchange = %maker.exchange, "no liquidity on maker side, waiting");
            return Ok(HedgePhase::Placing);
        };

        let mut resting = Vec::new();
        for order in maker.adapter.fetch_open_orders(maker.symbol()).await? {
            if order.side != side || has_drifted(&order, best) {
                debug!(exchange = %maker.exchange, order_id = %order.id, price = ?order.price, %best, "cancelling drifted maker order");
                ignore_benign(maker.adapter.cancel_order(&order.id, maker.symbol()).await)?;
            } else {
                resting.push(order);
            }
        }

        let in_flight: Decimal =
            resting.iter().map(|o| o.remaining).sum::<Decimal>() * maker.market.contract_size;
        let remaining = gap.abs() - in_flight;
        if resting.len() >= self.config.ideal_batch_size as usize || remaining < min_size {
            return Ok(HedgePhase::Placing);
        }

        let ideal = ideal_size_for(self.config.ideal_order_value, best);
        let plan = plan_leg(&LegSizing::new(remaining, &maker.market), ideal);
        if let Some(amount) = plan.amounts().first() {
            let request = OrderRequest::limit(maker.symbol(), side, *amount, best)
                .reduce_only(gap < Decimal::ZERO);
            let order = self.place(maker, &request).await?;
            debug!(exchange = %maker.exchange, order_id = %order.id, %amount, price = %best, "maker order placed");
        }
        Ok(HedgePhase::Placing)
    }

    /// One pass of the taker loop: mirror whatever the maker has filled
    pub async fn taker_step(
        &self,
        maker: &HedgeLeg,
        taker: &HedgeLeg,
        target: Decimal,
        maker_done: bool,
    ) -> Result<HedgePhase> {
        let (maker_size, taker_size) = tokio::try_join!(maker.size(), taker.size())?;
        let min_size = taker.market.min_size();
        let mut diff = maker_size - taker_size;
        if (target - taker_size).abs() < min_size && (maker_done || diff.abs() < min_size) {
            return Ok(HedgePhase::Converged);
        }

        if diff > Decimal::ZERO {
            if taker_size >= target {
                // reduce-only leg cannot grow; wait for the maker to come down
                return Ok(if maker_done {
                    HedgePhase::Converged
                } else {
                    HedgePhase::Balancing
                });
            }
            // never overshoot the target while opening
            diff = diff.min(target - taker_size);
        }
        if diff.abs() < min_size {
            return Ok(if maker_done {
                HedgePhase::Converged
            } else {
                HedgePhase::Balancing
            });
        }

        let increase = diff > Decimal::ZERO;
        let side = taker.order_side(increase);
        let book = taker
            .adapter
            .fetch_order_book(taker.symbol(), self.config.order_book_depth)
            .await?;
        let best = match side {
            OrderSide::Buy => book.best_ask(),
            OrderSide::Sell => book.best_bid(),
        };
        let Some(best) = best else {
            debug!(exchange = %taker.exchange, "no liquidity on taker side, waiting");
            return Ok(HedgePhase::Balancing);
        };

        let ideal = ideal_size_for(self.config.ideal_order_value, best);
        let plans = plan_batches(&[LegSizing::new(diff, &taker.market)], ideal);
        let amounts: Vec<Decimal> = plans.iter().flat_map(|p| p.amounts()).collect();
        debug!(exchange = %taker.exchange, %diff, orders = amounts.len(), "mirroring maker fills");

        let placements = amounts.iter().map(|amount| {
            let request = OrderRequest::market(taker.symbol(), side, *amount).reduce_only(!increase);
            async move { self.place(taker, &request).await }
        });
        for result in join_all(placements).await {
            result?;
        }
        Ok(HedgePhase::Balancing)
    }

    /// Close any residue with one market order
    async fn correct(&self, leg: &HedgeLeg, target: Decimal) -> Result<Decimal> {
        let size = leg.size().await?;
        let gap = target - size;
        if gap.abs() < leg.market.min_size() {
            return Ok(size);
        }

        let contracts = leg.market.to_contracts(gap.abs());
        if contracts.is_zero() {
            return Ok(size);
        }
        let increase = gap > Decimal::ZERO;
        let request = OrderRequest::market(leg.symbol(), leg.order_side(increase), contracts)
            .reduce_only(!increase);
        info!(exchange = %leg.exchange, %gap, %contracts, "correction order");
        self.place(leg, &request).await?;
        leg.size().await
    }

    /// Submit an order, retrying transient venue failures until it is accepted
    async fn place(&self, leg: &HedgeLeg, request: &OrderRequest) -> Result<Order> {
        let adapter = &leg.adapter;
        retry_until(
            "create_order",
            RetryPolicy::unbounded(self.config.order_retry_interval()),
            || async move { adapter.create_order(request).await.map(Some) },
        )
        .await
    }
}

/// Resting order no longer at the touch
fn has_drifted(order: &Order, best: Decimal) -> bool {
    match (order.side, order.price) {
        (OrderSide::Buy, Some(price)) => price < best,
        (OrderSide::Sell, Some(price)) => price > best,
        (_, None) => true,
    }
}
