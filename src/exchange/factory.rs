use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::info;

use crate::adapters::paper_exchange::{PaperExchange, PaperNetwork};
use crate::config::AppConfig;
use crate::domain::{AccountType, FundingRates, Market, OrderBook, PriceLevel, ReferenceData};
use crate::error::{ArbError, Result};

use super::ExchangeRegistry;

/// Half-spread of seeded paper books around the mark price
const PAPER_HALF_SPREAD: Decimal = dec!(0.0001);
const PAPER_BOOK_DEPTH: Decimal = dec!(1000000);

/// Create the runtime exchange registry from `AppConfig`.
///
/// Dry-run builds one paper venue per configured exchange route. Live venue
/// adapters are not bundled and must be registered by the embedding
/// application.
pub async fn build_registry(
    app_config: &AppConfig,
    reference: &ReferenceData,
    rates: &FundingRates,
) -> Result<ExchangeRegistry> {
    if !app_config.dry_run.enabled {
        return Err(ArbError::Validation(
            "live trading requires exchange adapters registered by the embedding application; enable dry_run to use paper venues".to_string(),
        ));
    }

    let network = PaperNetwork::new();
    let mut registry = ExchangeRegistry::new();
    let mut names: Vec<&String> = app_config.exchanges.keys().collect();
    names.sort();

    for name in names {
        let route = &app_config.exchanges[name];
        let venue = PaperExchange::new(name, &route.address, network.clone())
            .with_instant_limit_fills(true);
        let markets = seed_paper_venue(&venue, reference, rates).await;

        if *name == app_config.central_exchange {
            venue
                .set_balance(
                    AccountType::Funding,
                    &app_config.transfer.currency,
                    app_config.dry_run.starting_balance,
                )
                .await;
        }

        info!(exchange = %name, markets, "paper venue ready");
        registry.insert(name.clone(), Arc::new(venue));
    }

    Ok(registry)
}

/// Register every pair the reference data lists for this venue
async fn seed_paper_venue(venue: &PaperExchange, reference: &ReferenceData, rates: &FundingRates) -> usize {
    let mut count = 0;
    for (coin, exchanges) in reference {
        let Some(pairs) = exchanges.get(venue.name()) else {
            continue;
        };
        for (symbol, pair) in pairs {
            venue
                .set_market(Market {
                    symbol: symbol.clone(),
                    contract_size: pair.contract_size,
                    min_amount: Decimal::ONE,
                    max_amount: None,
                    price_precision: dec!(0.01),
                })
                .await;
            if let Some(mark) = crate::domain::mark_price(rates, coin, venue.name(), symbol) {
                venue
                    .set_order_book(
                        symbol,
                        OrderBook {
                            bids: vec![PriceLevel::new(mark * (Decimal::ONE - PAPER_HALF_SPREAD), PAPER_BOOK_DEPTH)],
                            asks: vec![PriceLevel::new(mark * (Decimal::ONE + PAPER_HALF_SPREAD), PAPER_BOOK_DEPTH)],
                        },
                    )
                    .await;
            }
            count += 1;
        }
    }
    count
}
