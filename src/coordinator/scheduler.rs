//! Trading cycle scheduler
//!
//! Persistent state machine `closed -> open -> filled -> closed`, ticked on a
//! short interval. Each tick reads TradeState once, performs at most one
//! transition and persists right after the action it follows. A failed tick
//! leaves the last checkpoint in place; the next tick resumes from it.

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::coordination::ShutdownToken;
use crate::domain::{ExchangeLeg, PositionSide, TradeState, TradeStatus, TransferDirection};
use crate::error::{ignore_benign, ArbError, Result};
use crate::exchange::{ExchangeRegistry, FundingRateProvider, ReferenceDataProvider};
use crate::persistence::{StateCheckpoint, StateStore};
use crate::strategy::hedge_executor::{HedgeExecutor, HedgeLeg};
use crate::strategy::protective_orders::ProtectivePlanner;
use crate::strategy::rate_calculator::{rank_candidates, RoiTradePair};
use crate::strategy::reconciliation::{FundReconciler, TransferEndpoint, TransferRequest};

use super::context::{next_funding, CycleContext};

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing due this tick
    Idle,
    /// Inside the onboarding window but no candidate cleared the threshold
    NoCandidate,
    /// A pair was selected and written as `open`
    Planned(RoiTradePair),
    /// Both legs funded, opened and protected
    Filled,
    /// Both legs unwound and capital back on custody
    Closed,
}

pub struct Scheduler {
    config: AppConfig,
    registry: ExchangeRegistry,
    store: Arc<dyn StateStore>,
    reference: Arc<dyn ReferenceDataProvider>,
    rates: Arc<dyn FundingRateProvider>,
    hedger: HedgeExecutor,
    protector: ProtectivePlanner,
    reconciler: FundReconciler,
}

impl Scheduler {
    pub fn new(
        config: AppConfig,
        registry: ExchangeRegistry,
        store: Arc<dyn StateStore>,
        reference: Arc<dyn ReferenceDataProvider>,
        rates: Arc<dyn FundingRateProvider>,
    ) -> Self {
        let hedger = HedgeExecutor::new(config.execution.clone());
        let protector = ProtectivePlanner::new(
            config.protection.clone(),
            config.execution.clone(),
            &config.transfer.currency,
        );
        let reconciler = FundReconciler::new(config.transfer.clone());
        Self {
            config,
            registry,
            store,
            reference,
            rates,
            hedger,
            protector,
            reconciler,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Persisted state, created as `closed` on first run
    pub async fn load_state(&self) -> Result<TradeState> {
        if let Some(state) = self.store.load().await? {
            return Ok(state);
        }
        let state = TradeState::new();
        self.store.save(&state).await?;
        info!("initialized trade state");
        Ok(state)
    }

    /// Tick until shutdown is requested. A running tick is never interrupted.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.schedule.tick_interval_secs,
            central = %self.config.central_exchange,
            "scheduler starting main loop"
        );

        let mut ticker = interval(self.config.schedule.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(outcome) => debug!(?outcome, "tick finished"),
                        Err(e) => error!(error = %e, "tick failed, resuming from last checkpoint"),
                    }
                }
                signal = shutdown.wait_for_shutdown() => {
                    info!(%signal, "scheduler: shutdown signal received");
                    break;
                }
            }
        }

        info!("scheduler: main loop exited");
    }

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(state = tracing::field::Empty))]
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let state = self.load_state().await?;
        tracing::Span::current().record("state", state.state.as_str());
        let schedule = &self.config.schedule;
        let lead = schedule.onboarding_lead();

        match state.state {
            TradeStatus::Filled => {
                let ctx = CycleContext::for_state(&state, lead, now)?;
                if now < ctx.funding_at + schedule.close_delay() {
                    return Ok(TickOutcome::Idle);
                }
                self.close(state, ctx).await
            }
            TradeStatus::Open => {
                let ctx = CycleContext::for_state(&state, lead, now)?;
                if now >= ctx.funding_at {
                    warn!(funding_at = %ctx.funding_at, "funding time passed before legs filled, unwinding");
                    return self.close(state, ctx).await;
                }
                self.open(state, ctx).await
            }
            TradeStatus::Closed => {
                let funding_at = next_funding(now, schedule.funding_interval_hours)?;
                if funding_at - now > lead {
                    return Ok(TickOutcome::Idle);
                }
                self.plan(state, CycleContext::new(funding_at, lead, now)).await
            }
        }
    }

    /// Candidates tradable with the registered venues, best first
    pub async fn candidates(&self, capital: Decimal) -> Result<Vec<RoiTradePair>> {
        let (rates, reference) = tokio::try_join!(self.rates.fetch(), self.reference.load())?;
        let ranked = rank_candidates(&rates, &reference, capital, self.config.strategy.min_roi);
        Ok(ranked
            .into_iter()
            .filter(|pair| self.is_tradable(&pair.long.exchange) && self.is_tradable(&pair.short.exchange))
            .collect())
    }

    /// Capital currently held on the custody venue, capped by config
    pub async fn custody_capital(&self) -> Result<Decimal> {
        let central = self.registry.get(&self.config.central_exchange)?;
        self.reconciler
            .funds()
            .custody_capital(central.as_ref(), self.config.strategy.capital_cap)
            .await
    }

    fn is_tradable(&self, exchange: &str) -> bool {
        self.registry.contains(exchange) && self.config.route(exchange).is_some()
    }

    #[instrument(skip_all, fields(funding_at = %ctx.funding_at))]
    async fn plan(&self, mut state: TradeState, ctx: CycleContext) -> Result<TickOutcome> {
        let capital = self.custody_capital().await?;
        if capital <= Decimal::ZERO {
            debug!("no custody capital to deploy");
            return Ok(TickOutcome::NoCandidate);
        }

        let Some(best) = self.candidates(capital).await?.into_iter().next() else {
            debug!(%capital, "no candidate clears the ROI threshold");
            return Ok(TickOutcome::NoCandidate);
        };

        let capital_per_leg = capital / Decimal::TWO;
        let long = ExchangeLeg::new(&best.long.exchange, &best.long.symbol, best.long.risk_tier, best.long.max_leverage);
        let short = ExchangeLeg::new(&best.short.exchange, &best.short.symbol, best.short.risk_tier, best.short.max_leverage);

        let Some(target_size) = self.target_size(&long, &short, capital_per_leg, best.leverage).await? else {
            return Ok(TickOutcome::NoCandidate);
        };

        state.funding_hour = ctx.funding_at.hour();
        state.funding_at = Some(ctx.funding_at);
        state.maker_side = best.maker_side;
        state.leverage = best.leverage;
        state.target_size = target_size;
        state.capital_per_leg = capital_per_leg;
        state.long = long;
        state.short = short;
        state.transition(TradeStatus::Open)?;
        self.store.save(&state).await?;

        info!(
            coin = %best.coin,
            roi = %best.roi,
            long = %best.long.exchange,
            short = %best.short.exchange,
            maker_side = %best.maker_side,
            leverage = %best.leverage,
            %target_size,
            "cycle planned"
        );
        Ok(TickOutcome::Planned(best))
    }

    /// Base units per leg: leveraged capital at the dearer mid, floored to the coarser contract
    async fn target_size(
        &self,
        long: &ExchangeLeg,
        short: &ExchangeLeg,
        capital_per_leg: Decimal,
        leverage: Decimal,
    ) -> Result<Option<Decimal>> {
        let (long, short) = tokio::try_join!(
            HedgeLeg::resolve(&self.registry, long, PositionSide::Long),
            HedgeLeg::resolve(&self.registry, short, PositionSide::Short),
        )?;
        let depth = self.config.execution.order_book_depth;
        let (long_book, short_book) = tokio::try_join!(
            long.adapter.fetch_order_book(long.symbol(), depth),
            short.adapter.fetch_order_book(short.symbol(), depth),
        )?;
        let (Some(long_mid), Some(short_mid)) = (long_book.mid(), short_book.mid()) else {
            debug!("order book empty on a candidate leg, deferring");
            return Ok(None);
        };

        let price = long_mid.max(short_mid);
        let contract = long.market.contract_size.max(short.market.contract_size);
        let raw = capital_per_leg * leverage / price;
        let size = (raw / contract).floor() * contract;

        let minimum = long.market.min_size().max(short.market.min_size());
        if size < minimum {
            warn!(%size, %minimum, "capital too small for a tradable position, deferring");
            return Ok(None);
        }
        Ok(Some(size))
    }

    #[instrument(skip_all, fields(funding_at = %ctx.funding_at))]
    async fn open(&self, state: TradeState, ctx: CycleContext) -> Result<TickOutcome> {
        let checkpoint = StateCheckpoint::new(state.clone(), self.store.clone());

        tokio::try_join!(
            self.fund_leg(&state, PositionSide::Long, ctx, &checkpoint),
            self.fund_leg(&state, PositionSide::Short, ctx, &checkpoint),
        )?;
        // legs hosted on custody draw after any withdrawal has left
        for side in [PositionSide::Long, PositionSide::Short] {
            let leg = state.leg(side);
            if leg.exchange == self.config.central_exchange {
                let adapter = self.registry.get(&leg.exchange)?;
                self.reconciler
                    .funds()
                    .fund_trading(&leg.exchange, adapter.as_ref(), state.capital_per_leg)
                    .await?;
            }
        }

        let maker = HedgeLeg::resolve(&self.registry, state.leg(state.maker_side), state.maker_side).await?;
        let taker_side = state.maker_side.opposite();
        let taker = HedgeLeg::resolve(&self.registry, state.leg(taker_side), taker_side).await?;

        for (leg, record) in [(&maker, state.leg(maker.side)), (&taker, state.leg(taker.side))] {
            ignore_benign(leg.adapter.set_risk_limit(record.risk_tier, leg.symbol()).await)?;
            ignore_benign(leg.adapter.set_leverage(state.leverage, leg.symbol()).await)?;
            debug!(exchange = %leg.exchange, tier = record.risk_tier, leverage = %state.leverage, "leg margin configured");
        }

        let report = self.hedger.execute(&maker, &taker, state.target_size).await?;

        let (long, short) = match maker.side {
            PositionSide::Long => (&maker, &taker),
            PositionSide::Short => (&taker, &maker),
        };
        self.protector.protect(long, short).await?;
        self.protector.protect(short, long).await?;

        checkpoint.update(|s| s.transition(TradeStatus::Filled)).await?;
        info!(
            maker_size = %report.maker_size,
            taker_size = %report.taker_size,
            "cycle filled"
        );
        Ok(TickOutcome::Filled)
    }

    async fn fund_leg(
        &self,
        state: &TradeState,
        side: PositionSide,
        ctx: CycleContext,
        checkpoint: &StateCheckpoint,
    ) -> Result<()> {
        let leg = state.leg(side);
        if leg.exchange == self.config.central_exchange {
            return Ok(());
        }
        let request = TransferRequest {
            leg: side,
            direction: TransferDirection::Deposit,
            source: self.endpoint(&self.config.central_exchange)?,
            destination: self.endpoint(&leg.exchange)?,
            route: self.route(&leg.exchange)?,
            amount: Some(state.capital_per_leg),
            since: ctx.transfer_since,
            progress: leg.transfer_progress(TransferDirection::Deposit),
        };
        self.reconciler.reconcile(&request, checkpoint).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(funding_at = %ctx.funding_at))]
    async fn close(&self, state: TradeState, ctx: CycleContext) -> Result<TickOutcome> {
        let checkpoint = StateCheckpoint::new(state.clone(), self.store.clone());

        let maker = HedgeLeg::resolve(&self.registry, state.leg(state.maker_side), state.maker_side).await?;
        let taker_side = state.maker_side.opposite();
        let taker = HedgeLeg::resolve(&self.registry, state.leg(taker_side), taker_side).await?;

        self.hedger.execute(&maker, &taker, Decimal::ZERO).await?;

        for leg in [&maker, &taker] {
            ignore_benign(leg.adapter.cancel_all_orders(leg.symbol(), false).await)?;
            ignore_benign(leg.adapter.cancel_all_orders(leg.symbol(), true).await)?;
        }

        let was_open = state.state == TradeStatus::Open;
        tokio::try_join!(
            self.repatriate_leg(&state, PositionSide::Long, was_open, ctx, &checkpoint),
            self.repatriate_leg(&state, PositionSide::Short, was_open, ctx, &checkpoint),
        )?;

        checkpoint.update(|s| s.transition(TradeStatus::Closed)).await?;
        info!("cycle closed");
        Ok(TickOutcome::Closed)
    }

    async fn repatriate_leg(
        &self,
        state: &TradeState,
        side: PositionSide,
        was_open: bool,
        ctx: CycleContext,
        checkpoint: &StateCheckpoint,
    ) -> Result<()> {
        let leg = state.leg(side);
        if leg.exchange == self.config.central_exchange {
            return Ok(());
        }
        if was_open && leg.deposit_id.is_none() {
            debug!(exchange = %leg.exchange, leg = %side, "leg was never funded, nothing to repatriate");
            return Ok(());
        }
        let request = TransferRequest {
            leg: side,
            direction: TransferDirection::Repatriate,
            source: self.endpoint(&leg.exchange)?,
            destination: self.endpoint(&self.config.central_exchange)?,
            route: self.route(&self.config.central_exchange)?,
            amount: None,
            since: ctx.funding_at,
            progress: leg.transfer_progress(TransferDirection::Repatriate),
        };
        self.reconciler.reconcile(&request, checkpoint).await?;
        Ok(())
    }

    fn endpoint(&self, exchange: &str) -> Result<TransferEndpoint> {
        Ok(TransferEndpoint {
            exchange: exchange.to_string(),
            adapter: self.registry.get(exchange)?,
        })
    }

    fn route(&self, exchange: &str) -> Result<crate::config::ExchangeRoute> {
        self.config
            .route(exchange)
            .cloned()
            .ok_or_else(|| ArbError::Validation(format!("no deposit route configured for '{exchange}'")))
    }
}
