//! Funding-rate candidate ranking
//!
//! Turns funding rates, fee schedules and leverage ladders into a ranked list
//! of hedge pairs. Pure functions only; the scheduler picks index 0.
//!
//! Reference fees are quoted in percent. They are charged on entry and exit,
//! so each leg pays its fee twice per cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, trace};

use crate::domain::{FundingRates, LeverageTier, PairReference, PositionSide, ReferenceData};

/// Fee is paid when opening and again when closing
const FEE_CHARGES_PER_CYCLE: Decimal = Decimal::TWO;
const PERCENT: Decimal = Decimal::ONE_HUNDRED;

/// Per (exchange, pair) inputs for ROI calculation, fees as fractions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCalculation {
    pub exchange: String,
    pub symbol: String,
    pub rate: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub calculated_leverage: Decimal,
    pub max_leverage: Decimal,
    pub risk_tier: u32,
}

/// One side of a candidate hedge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLeg {
    pub exchange: String,
    pub symbol: String,
    pub risk_tier: u32,
    pub max_leverage: Decimal,
}

impl From<&RateCalculation> for CandidateLeg {
    fn from(calc: &RateCalculation) -> Self {
        Self {
            exchange: calc.exchange.clone(),
            symbol: calc.symbol.clone(),
            risk_tier: calc.risk_tier,
            max_leverage: calc.max_leverage,
        }
    }
}

/// Ranked hedge candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiTradePair {
    pub coin: String,
    pub roi: Decimal,
    pub maker_side: PositionSide,
    pub long: CandidateLeg,
    pub short: CandidateLeg,
    pub leverage: Decimal,
}

/// Leverage achievable for `investment` (one leg's capital) on a tier ladder.
///
/// Walks from the riskiest tier down; the first tier whose notional cap can
/// be reached within its max leverage sets `leverage = cap / investment`.
/// Falls back to the least-leveraged tier at its max leverage.
pub fn leverage_for_investment(
    tiers: &[LeverageTier],
    investment: Decimal,
    notional_scale: Decimal,
) -> Option<(Decimal, &LeverageTier)> {
    if investment <= Decimal::ZERO {
        return None;
    }

    for tier in tiers.iter().rev() {
        let cap = tier.max_notional * notional_scale;
        if tier.max_leverage * investment >= cap {
            return Some((cap / investment, tier));
        }
    }

    tiers
        .iter()
        .min_by(|a, b| a.max_leverage.cmp(&b.max_leverage))
        .map(|tier| (tier.max_leverage, tier))
}

/// Build the per-pair calculation tuple, or `None` on a data gap
pub fn rate_calculation(
    exchange: &str,
    symbol: &str,
    rate: Decimal,
    mark_price: Option<Decimal>,
    reference: &PairReference,
    investment: Decimal,
) -> Option<RateCalculation> {
    let scale = if reference.base_denominated {
        mark_price? * reference.contract_size
    } else {
        Decimal::ONE
    };
    let (calculated_leverage, tier) =
        leverage_for_investment(&reference.tiers, investment / Decimal::TWO, scale)?;

    Some(RateCalculation {
        exchange: exchange.to_string(),
        symbol: symbol.to_string(),
        rate,
        maker_fee: reference.maker_fee / PERCENT,
        taker_fee: reference.taker_fee / PERCENT,
        calculated_leverage,
        max_leverage: tier.max_leverage,
        risk_tier: tier.tier,
    })
}

/// ROI of hedging `a` against `b`; symmetric in its arguments
pub fn calculate_roi(
    coin: &str,
    a: &RateCalculation,
    b: &RateCalculation,
    investment: Decimal,
) -> RoiTradePair {
    // lower rate goes long; ties broken by exchange name so argument order never matters
    let a_is_long = match a.rate.cmp(&b.rate) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => (&a.exchange, &a.symbol) <= (&b.exchange, &b.symbol),
    };
    let (long, short) = if a_is_long { (a, b) } else { (b, a) };

    let leverage = long.calculated_leverage.min(short.calculated_leverage);
    let notional = investment * leverage / Decimal::TWO;

    let long_income = notional * long.rate;
    let short_income = notional * short.rate;

    let maker_long_fees = notional * (long.maker_fee + short.taker_fee) * FEE_CHARGES_PER_CYCLE;
    let maker_short_fees = notional * (long.taker_fee + short.maker_fee) * FEE_CHARGES_PER_CYCLE;
    let (maker_side, fees) = if maker_long_fees <= maker_short_fees {
        (PositionSide::Long, maker_long_fees)
    } else {
        (PositionSide::Short, maker_short_fees)
    };

    RoiTradePair {
        coin: coin.to_string(),
        roi: (long_income - short_income).abs() - fees,
        maker_side,
        long: long.into(),
        short: short.into(),
        leverage,
    }
}

/// Keep the best non-overlapping pairs: an exchange used by a higher-ROI pair is not reused
pub fn select_non_overlapping(mut pairs: Vec<RoiTradePair>) -> Vec<RoiTradePair> {
    sort_by_roi(&mut pairs);
    let mut used: HashSet<String> = HashSet::new();
    pairs
        .into_iter()
        .filter(|p| {
            if used.contains(&p.long.exchange) || used.contains(&p.short.exchange) {
                return false;
            }
            used.insert(p.long.exchange.clone());
            used.insert(p.short.exchange.clone());
            true
        })
        .collect()
}

fn sort_by_roi(pairs: &mut [RoiTradePair]) {
    pairs.sort_by(|a, b| b.roi.cmp(&a.roi));
}

/// Rank hedge candidates across all coins, best first.
///
/// Coins or pairs without reference data are skipped. An empty result
/// means "no trade this cycle".
pub fn rank_candidates(
    rates: &FundingRates,
    reference: &ReferenceData,
    investment: Decimal,
    min_roi: Decimal,
) -> Vec<RoiTradePair> {
    let mut coins: Vec<&String> = rates.keys().collect();
    coins.sort();

    let mut ranked = Vec::new();
    for coin in coins {
        let Some(coin_reference) = reference.get(coin) else {
            trace!(coin = %coin, "no reference data for coin");
            continue;
        };

        let mut calculations = Vec::new();
        for (exchange, pairs) in &rates[coin] {
            for (symbol, quote) in pairs {
                let Some(pair_ref) = coin_reference.get(exchange).and_then(|p| p.get(symbol)) else {
                    trace!(coin = %coin, exchange = %exchange, symbol = %symbol, "no reference data for pair");
                    continue;
                };
                match rate_calculation(exchange, symbol, quote.rate, quote.mark_price, pair_ref, investment) {
                    Some(calc) => calculations.push(calc),
                    None => trace!(coin = %coin, exchange = %exchange, symbol = %symbol, "pair skipped"),
                }
            }
        }

        let mut pairs = Vec::new();
        for (i, a) in calculations.iter().enumerate() {
            for b in &calculations[i + 1..] {
                if a.exchange == b.exchange {
                    continue;
                }
                let candidate = calculate_roi(coin, a, b, investment);
                if candidate.roi > min_roi {
                    pairs.push(candidate);
                }
            }
        }

        let winners = select_non_overlapping(pairs);
        debug!(coin = %coin, candidates = winners.len(), "coin ranked");
        ranked.extend(winners);
    }

    sort_by_roi(&mut ranked);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FundingQuote;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn tier(tier: u32, max_leverage: Decimal, max_notional: Decimal) -> LeverageTier {
        LeverageTier {
            tier,
            max_leverage,
            max_notional,
            min_notional: Decimal::ZERO,
            maintenance_margin_rate: dec!(0.005),
        }
    }

    fn reference(tiers: Vec<LeverageTier>) -> PairReference {
        PairReference {
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0005),
            contract_size: dec!(1),
            base_denominated: false,
            tiers,
        }
    }

    fn calc(exchange: &str, rate: Decimal, maker: Decimal, taker: Decimal, lev: Decimal) -> RateCalculation {
        RateCalculation {
            exchange: exchange.into(),
            symbol: "BTC/USDT:USDT".into(),
            rate,
            maker_fee: maker,
            taker_fee: taker,
            calculated_leverage: lev,
            max_leverage: lev,
            risk_tier: 1,
        }
    }

    fn rates(entries: &[(&str, &str, Decimal)]) -> FundingRates {
        let mut rates: FundingRates = HashMap::new();
        for (coin, exchange, rate) in entries {
            rates
                .entry(coin.to_string())
                .or_default()
                .entry(exchange.to_string())
                .or_default()
                .insert(
                    "BTC/USDT:USDT".to_string(),
                    FundingQuote {
                        rate: *rate,
                        mark_price: None,
                    },
                );
        }
        rates
    }

    fn reference_data(entries: &[(&str, &str)], tiers: Vec<LeverageTier>) -> ReferenceData {
        let mut data: ReferenceData = HashMap::new();
        for (coin, exchange) in entries {
            data.entry(coin.to_string())
                .or_default()
                .entry(exchange.to_string())
                .or_default()
                .insert("BTC/USDT:USDT".to_string(), reference(tiers.clone()));
        }
        data
    }

    #[test]
    fn test_leverage_walks_from_riskiest_tier() {
        let tiers = vec![
            tier(1, dec!(100), dec!(50000)),
            tier(2, dec!(50), dec!(500000)),
            tier(3, dec!(20), dec!(5000000)),
        ];
        // 1000 * 50 = 50k < 500k, 1000 * 100 = 100k >= 50k
        let (lev, t) = leverage_for_investment(&tiers, dec!(1000), Decimal::ONE).unwrap();
        assert_eq!(t.tier, 1);
        assert_eq!(lev, dec!(50));

        // 50k * 50 = 2.5M >= 500k
        let (lev, t) = leverage_for_investment(&tiers, dec!(50000), Decimal::ONE).unwrap();
        assert_eq!(t.tier, 2);
        assert_eq!(lev, dec!(10));
    }

    #[test]
    fn test_leverage_falls_back_to_least_leveraged_tier() {
        let tiers = vec![tier(1, dec!(10), dec!(50000)), tier(2, dec!(5), dec!(500000))];
        let (lev, t) = leverage_for_investment(&tiers, dec!(100), Decimal::ONE).unwrap();
        assert_eq!(t.tier, 2);
        assert_eq!(lev, dec!(5));
    }

    #[test]
    fn test_base_denominated_ladder_needs_price() {
        let mut pair = reference(vec![tier(1, dec!(20), dec!(10))]);
        pair.base_denominated = true;
        assert!(rate_calculation("okx", "BTC", dec!(0.001), None, &pair, dec!(1000)).is_none());

        // cap = 10 BTC * 100 = 1000 quote; per-leg investment 500 * 20 >= 1000
        let calc = rate_calculation("okx", "BTC", dec!(0.001), Some(dec!(100)), &pair, dec!(1000)).unwrap();
        assert_eq!(calc.calculated_leverage, dec!(2));
    }

    #[test]
    fn test_roi_is_symmetric() {
        let a = calc("exA", dec!(0.0010), dec!(0.0002), dec!(0.0006), dec!(10));
        let b = calc("exB", dec!(-0.0003), dec!(0.0001), dec!(0.0004), dec!(8));
        let ab = calculate_roi("BTC", &a, &b, dec!(1000));
        let ba = calculate_roi("BTC", &b, &a, dec!(1000));
        assert_eq!(ab.roi, ba.roi);
        assert_eq!(ab.maker_side, ba.maker_side);
        assert_eq!(ab.long.exchange, "exB");
        assert_eq!(ab.short.exchange, "exA");
        assert_eq!(ab.leverage, dec!(8));
    }

    #[test]
    fn test_maker_side_minimizes_fees() {
        let investment = dec!(1000);
        let cases = [
            (dec!(0.0002), dec!(0.0005), dec!(0.0001), dec!(0.0007)),
            (dec!(0.0001), dec!(0.0009), dec!(0.0003), dec!(0.0004)),
            (dec!(0.0000), dec!(0.0002), dec!(-0.0001), dec!(0.0006)),
        ];
        for (long_maker, long_taker, short_maker, short_taker) in cases {
            let long = calc("L", dec!(0.0001), long_maker, long_taker, dec!(5));
            let short = calc("S", dec!(0.0009), short_maker, short_taker, dec!(5));
            let pair = calculate_roi("BTC", &long, &short, investment);

            let notional = investment * dec!(5) / dec!(2);
            let gross = notional * (dec!(0.0009) - dec!(0.0001));
            let maker_long = notional * (long_maker + short_taker) * dec!(2);
            let maker_short = notional * (long_taker + short_maker) * dec!(2);
            assert_eq!(pair.roi, gross - maker_long.min(maker_short));
            let expected = if maker_long <= maker_short {
                PositionSide::Long
            } else {
                PositionSide::Short
            };
            assert_eq!(pair.maker_side, expected);
        }
    }

    #[test]
    fn test_end_to_end_two_exchanges() {
        let rates = rates(&[("BTC", "exA", dec!(0.0010)), ("BTC", "exB", dec!(0.0005))]);
        let reference = reference_data(&[("BTC", "exA"), ("BTC", "exB")], vec![tier(1, dec!(10), dec!(5000))]);

        let ranked = rank_candidates(&rates, &reference, dec!(1000), Decimal::ZERO);
        assert_eq!(ranked.len(), 1);
        let best = &ranked[0];
        assert_eq!(best.long.exchange, "exB");
        assert_eq!(best.short.exchange, "exA");
        assert_eq!(best.leverage, dec!(10));
        // notional 5000: spread 5000 * 0.0005 = 2.5, fees 5000 * 0.000007 * 2 = 0.07
        assert_eq!(best.roi, dec!(2.43));
        assert!(best.roi > Decimal::ZERO);
        assert_eq!(best.maker_side, PositionSide::Long);
    }

    #[test]
    fn test_reference_fees_are_percent() {
        let pair = reference(vec![tier(1, dec!(10), dec!(5000))]);
        let calc = rate_calculation("exA", "BTC", dec!(0.001), None, &pair, dec!(1000)).unwrap();
        assert_eq!(calc.maker_fee, dec!(0.000002));
        assert_eq!(calc.taker_fee, dec!(0.000005));
    }

    #[test]
    fn test_missing_reference_data_is_skipped() {
        let rates = rates(&[
            ("BTC", "exA", dec!(0.0030)),
            ("BTC", "exB", dec!(0.0005)),
            ("BTC", "exC", dec!(-0.0040)),
            ("DOGE", "exA", dec!(0.0100)),
        ]);
        let reference = reference_data(&[("BTC", "exA"), ("BTC", "exB")], vec![tier(1, dec!(10), dec!(5000))]);

        let ranked = rank_candidates(&rates, &reference, dec!(1000), Decimal::ZERO);
        assert!(!ranked.is_empty());
        assert!(ranked
            .iter()
            .all(|p| p.long.exchange != "exC" && p.short.exchange != "exC"));
    }

    #[test]
    fn test_no_candidate_above_threshold() {
        let rates = rates(&[("BTC", "exA", dec!(0.0001)), ("BTC", "exB", dec!(0.0001))]);
        let reference = reference_data(&[("BTC", "exA"), ("BTC", "exB")], vec![tier(1, dec!(10), dec!(5000))]);
        assert!(rank_candidates(&rates, &reference, dec!(1000), Decimal::ZERO).is_empty());
    }

    #[test]
    fn test_exchanges_not_reused_within_coin() {
        let rates = rates(&[
            ("BTC", "exA", dec!(0.0050)),
            ("BTC", "exB", dec!(-0.0050)),
            ("BTC", "exC", dec!(0.0040)),
            ("BTC", "exD", dec!(-0.0010)),
        ]);
        let reference = reference_data(
            &[("BTC", "exA"), ("BTC", "exB"), ("BTC", "exC"), ("BTC", "exD")],
            vec![tier(1, dec!(10), dec!(5000))],
        );

        let ranked = rank_candidates(&rates, &reference, dec!(1000), Decimal::ZERO);
        let mut seen = HashSet::new();
        for pair in &ranked {
            assert!(seen.insert(pair.long.exchange.clone()));
            assert!(seen.insert(pair.short.exchange.clone()));
        }
        assert_eq!(ranked[0].long.exchange, "exB");
        assert_eq!(ranked[0].short.exchange, "exA");
        assert_eq!(ranked.len(), 2);
        assert!(ranked.windows(2).all(|w| w[0].roi >= w[1].roi));
    }
}
