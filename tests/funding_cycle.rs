use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use fundarb::adapters::{PaperExchange, PaperNetwork};
use fundarb::config::AppConfig;
use fundarb::domain::{
    free_balance, AccountType, ExchangeLeg, FundingQuote, FundingRates, LeverageTier, Market,
    OrderBook, PairReference, PositionSide, PriceLevel, ReferenceData, TradeState, TradeStatus,
    WithdrawRequest,
};
use fundarb::error::Result;
use fundarb::exchange::{ExchangeAdapter, ExchangeRegistry, FundingRateProvider, ReferenceDataProvider};
use fundarb::persistence::{MemoryStateStore, StateStore};
use fundarb::{Scheduler, TickOutcome};

const SYMBOL: &str = "BTC/USDT:USDT";

const CONFIG: &str = r#"
central_exchange = "binance"

[schedule]
funding_interval_hours = 8
onboarding_lead_minutes = 30
tick_interval_secs = 1
close_delay_secs = 60

[strategy]
min_roi = "1"

[execution]
ideal_order_value = "1000"
ideal_batch_size = 3
order_book_depth = 5
poll_interval_ms = 1
order_retry_interval_ms = 1

[protection]
limit = "0.01"
trigger = "0.005"
retry_limit = 5
poll_interval_ms = 1

[transfer]
currency = "USDT"
dust_reserve = "1"
poll_interval_secs = 1
max_polls = 3
history_limit = 50

[exchanges.binance]
address = "0xcustody"

[exchanges.okx]
address = "0xokx"

[exchanges.bybit]
address = "0xbybit"

[state]
backend = "memory"

[data]
reference_path = "reference.json"
funding_rates_path = "funding_rates.json"
"#;

struct StaticReference(ReferenceData);

#[async_trait]
impl ReferenceDataProvider for StaticReference {
    async fn load(&self) -> Result<ReferenceData> {
        Ok(self.0.clone())
    }
}

struct StaticRates(FundingRates);

#[async_trait]
impl FundingRateProvider for StaticRates {
    async fn fetch(&self) -> Result<FundingRates> {
        Ok(self.0.clone())
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, h, m, s).unwrap()
}

fn pair_reference(contract_size: Decimal) -> PairReference {
    PairReference {
        maker_fee: dec!(0.02),
        taker_fee: dec!(0.05),
        contract_size,
        base_denominated: false,
        tiers: vec![LeverageTier {
            tier: 1,
            max_leverage: dec!(10),
            max_notional: dec!(5000),
            min_notional: dec!(0),
            maintenance_margin_rate: dec!(0.005),
        }],
    }
}

fn reference() -> ReferenceData {
    let mut exchanges = HashMap::new();
    for (exchange, contract_size) in [("okx", dec!(0.01)), ("bybit", dec!(0.001))] {
        exchanges.insert(
            exchange.to_string(),
            HashMap::from([(SYMBOL.to_string(), pair_reference(contract_size))]),
        );
    }
    HashMap::from([("BTC".to_string(), exchanges)])
}

fn rates(okx: Decimal, bybit: Decimal) -> FundingRates {
    let quote = |rate| {
        HashMap::from([(
            SYMBOL.to_string(),
            FundingQuote {
                rate,
                mark_price: Some(dec!(50000)),
            },
        )])
    };
    HashMap::from([(
        "BTC".to_string(),
        HashMap::from([("okx".to_string(), quote(okx)), ("bybit".to_string(), quote(bybit))]),
    )])
}

async fn venue(name: &str, address: &str, network: Arc<PaperNetwork>, contract_size: Decimal) -> Arc<PaperExchange> {
    let venue = PaperExchange::new(name, address, network).with_instant_limit_fills(true);
    venue
        .set_market(Market {
            symbol: SYMBOL.into(),
            contract_size,
            min_amount: dec!(1),
            max_amount: None,
            price_precision: dec!(0.1),
        })
        .await;
    venue
        .set_order_book(
            SYMBOL,
            OrderBook {
                bids: vec![PriceLevel::new(dec!(49995), dec!(1000000))],
                asks: vec![PriceLevel::new(dec!(50005), dec!(1000000))],
            },
        )
        .await;
    Arc::new(venue)
}

struct Fixture {
    network: Arc<PaperNetwork>,
    central: Arc<PaperExchange>,
    okx: Arc<PaperExchange>,
    bybit: Arc<PaperExchange>,
    store: Arc<MemoryStateStore>,
    scheduler: Scheduler,
}

impl Fixture {
    async fn new(funding: FundingRates, store: MemoryStateStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.toml"), CONFIG).unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.validate(), Ok(()));

        let network = PaperNetwork::new();
        let central = venue("binance", "0xcustody", network.clone(), dec!(0.001)).await;
        central.set_balance(AccountType::Funding, "USDT", dec!(1000)).await;
        let okx = venue("okx", "0xokx", network.clone(), dec!(0.01)).await;
        let bybit = venue("bybit", "0xbybit", network.clone(), dec!(0.001)).await;

        let registry = ExchangeRegistry::new()
            .with("binance", central.clone())
            .with("okx", okx.clone())
            .with("bybit", bybit.clone());

        let store = Arc::new(store);
        let scheduler = Scheduler::new(
            config,
            registry,
            store.clone(),
            Arc::new(StaticReference(reference())),
            Arc::new(StaticRates(funding)),
        );

        Self {
            network,
            central,
            okx,
            bybit,
            store,
            scheduler,
        }
    }

    async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        self.network.set_time(now).await;
        self.scheduler.tick_at(now).await.unwrap()
    }

    async fn state(&self) -> TradeState {
        self.store.load().await.unwrap().unwrap()
    }
}

async fn free(venue: &PaperExchange, account: AccountType) -> Decimal {
    free_balance(&venue.fetch_balance(account).await.unwrap(), "USDT")
}

#[tokio::test]
async fn test_full_cycle_opens_protects_and_repatriates() {
    let fx = Fixture::new(rates(dec!(0.0030), dec!(0.0005)), MemoryStateStore::new()).await;

    // an hour before funding is outside the 30 minute window
    assert_eq!(fx.tick(at(7, 0, 0)).await, TickOutcome::Idle);
    assert_eq!(fx.state().await.state, TradeStatus::Closed);

    let TickOutcome::Planned(pair) = fx.tick(at(7, 45, 0)).await else {
        panic!("expected a planned cycle");
    };
    assert_eq!(pair.long.exchange, "bybit");
    assert_eq!(pair.short.exchange, "okx");
    assert_eq!(pair.leverage, dec!(10));
    assert_eq!(pair.roi, dec!(5.5));

    let planned = fx.state().await;
    assert_eq!(planned.state, TradeStatus::Open);
    assert_eq!(planned.funding_at, Some(at(8, 0, 0)));
    assert_eq!(planned.funding_hour, 8);
    assert_eq!(planned.target_size, dec!(0.1));
    assert_eq!(planned.capital_per_leg, dec!(500));
    assert_eq!(planned.maker_side, PositionSide::Long);

    assert_eq!(fx.tick(at(7, 46, 0)).await, TickOutcome::Filled);
    let filled = fx.state().await;
    assert_eq!(filled.state, TradeStatus::Filled);
    assert!(filled.long.deposit_id.is_some() && filled.long.deposit_tx_id.is_some());
    assert!(filled.short.deposit_id.is_some() && filled.short.deposit_tx_id.is_some());

    let long = fx.bybit.fetch_position(SYMBOL).await.unwrap();
    let short = fx.okx.fetch_position(SYMBOL).await.unwrap();
    assert_eq!(long.size_on(PositionSide::Long), dec!(0.1));
    assert_eq!(short.size_on(PositionSide::Short), dec!(0.1));
    assert_eq!(fx.bybit.leverage(SYMBOL).await, Some(dec!(10)));
    assert_eq!(fx.okx.risk_tier(SYMBOL).await, Some(1));
    assert!(!fx.bybit.fetch_open_stop_orders(SYMBOL).await.unwrap().is_empty());
    assert!(!fx.okx.fetch_open_stop_orders(SYMBOL).await.unwrap().is_empty());
    assert_eq!(free(&fx.bybit, AccountType::Trading).await, dec!(500));
    assert_eq!(free(&fx.central, AccountType::Funding).await, dec!(0));

    // funding settles, close waits for the configured delay
    assert_eq!(fx.tick(at(7, 59, 0)).await, TickOutcome::Idle);
    assert_eq!(fx.tick(at(8, 0, 30)).await, TickOutcome::Idle);

    assert_eq!(fx.tick(at(8, 5, 0)).await, TickOutcome::Closed);
    let closed = fx.state().await;
    assert_eq!(closed.state, TradeStatus::Closed);
    assert!(closed.long.withdraw_tx_id.is_some());
    assert!(closed.short.withdraw_tx_id.is_some());

    for venue in [&fx.okx, &fx.bybit] {
        assert_eq!(venue.fetch_position(SYMBOL).await.unwrap().size(), dec!(0));
        assert!(venue.fetch_open_stop_orders(SYMBOL).await.unwrap().is_empty());
        assert!(venue.fetch_open_orders(SYMBOL).await.unwrap().is_empty());
    }
    // everything above the dust reserve comes home
    assert_eq!(free(&fx.central, AccountType::Funding).await, dec!(998));
    assert_eq!(free(&fx.bybit, AccountType::Funding).await, dec!(1));
}

#[tokio::test]
async fn test_no_candidate_leaves_state_closed() {
    let fx = Fixture::new(rates(dec!(0.0005), dec!(0.0005)), MemoryStateStore::new()).await;

    assert_eq!(fx.tick(at(15, 40, 0)).await, TickOutcome::NoCandidate);
    assert_eq!(fx.state().await.state, TradeStatus::Closed);
    assert_eq!(fx.central.withdraw_calls().await, 0);
}

#[tokio::test]
async fn test_missed_funding_unwinds_unfunded_cycle() {
    let mut state = TradeState::new();
    state.state = TradeStatus::Open;
    state.funding_at = Some(at(8, 0, 0));
    state.funding_hour = 8;
    state.leverage = dec!(10);
    state.target_size = dec!(0.1);
    state.capital_per_leg = dec!(500);
    state.long = ExchangeLeg::new("bybit", SYMBOL, 1, dec!(10));
    state.short = ExchangeLeg::new("okx", SYMBOL, 1, dec!(10));

    let fx = Fixture::new(rates(dec!(0.0030), dec!(0.0005)), MemoryStateStore::with_state(state)).await;

    assert_eq!(fx.tick(at(8, 10, 0)).await, TickOutcome::Closed);
    assert_eq!(fx.state().await.state, TradeStatus::Closed);
    assert_eq!(fx.central.withdraw_calls().await, 0);
    assert_eq!(fx.okx.withdraw_calls().await, 0);
    assert_eq!(fx.bybit.withdraw_calls().await, 0);
    assert_eq!(free(&fx.central, AccountType::Funding).await, dec!(1000));
}

#[tokio::test]
async fn test_resumed_open_adopts_unrecorded_withdrawal() {
    let fx = Fixture::new(rates(dec!(0.0030), dec!(0.0005)), MemoryStateStore::new()).await;
    assert!(matches!(fx.tick(at(7, 45, 0)).await, TickOutcome::Planned(_)));

    // a withdrawal to the long leg went out but the process died before recording it
    fx.network.set_time(at(7, 45, 30)).await;
    let lost = fx
        .central
        .withdraw(&WithdrawRequest {
            currency: "USDT".into(),
            amount: dec!(500),
            address: "0xbybit".into(),
            tag: None,
            network: None,
        })
        .await
        .unwrap();

    assert_eq!(fx.tick(at(7, 46, 0)).await, TickOutcome::Filled);

    let state = fx.state().await;
    assert_eq!(state.long.deposit_id.as_deref(), Some(lost.id.as_str()));
    // one lost withdrawal plus the short leg's, never a second one for the long leg
    assert_eq!(fx.central.withdraw_calls().await, 2);
    assert_eq!(free(&fx.bybit, AccountType::Trading).await, dec!(500));
}
