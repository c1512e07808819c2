use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::strategy::RoiTradePair;

#[derive(Parser, Debug)]
#[command(name = "fundarb")]
#[command(version)]
#[command(about = "Delta-neutral perpetual funding-rate arbitrage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overlays
    #[arg(short, long, global = true, default_value = "config", env = "FUNDARB_CONFIG_DIR")]
    pub config: String,

    /// Trade against in-memory paper venues
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Tick forever at the configured interval
    Run,
    /// Run exactly one scheduler tick
    Tick,
    /// Print ranked hedge candidates
    Candidates {
        /// Capital to rank against (defaults to custody capital)
        #[arg(long)]
        capital: Option<Decimal>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the persisted trade state as JSON
    State,
}

#[derive(Debug, Serialize, Tabled)]
pub struct CandidateRow {
    pub rank: usize,
    pub coin: String,
    pub long: String,
    pub short: String,
    pub maker: String,
    pub leverage: String,
    pub roi: String,
}

impl CandidateRow {
    pub fn from_pair(rank: usize, pair: &RoiTradePair) -> Self {
        Self {
            rank,
            coin: pair.coin.clone(),
            long: format!("{} {}", pair.long.exchange, pair.long.symbol),
            short: format!("{} {}", pair.short.exchange, pair.short.symbol),
            maker: pair.maker_side.to_string(),
            leverage: pair.leverage.round_dp(2).to_string(),
            roi: pair.roi.round_dp(4).to_string(),
        }
    }
}

/// Render candidates best first
pub fn candidate_table(pairs: &[RoiTradePair]) -> String {
    if pairs.is_empty() {
        return "(no candidates)".to_string();
    }
    let rows: Vec<CandidateRow> = pairs
        .iter()
        .enumerate()
        .map(|(i, pair)| CandidateRow::from_pair(i + 1, pair))
        .collect();
    Table::new(rows).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionSide;
    use crate::strategy::CandidateLeg;
    use rust_decimal_macros::dec;

    fn leg(exchange: &str) -> CandidateLeg {
        CandidateLeg {
            exchange: exchange.into(),
            symbol: "BTC/USDT:USDT".into(),
            risk_tier: 1,
            max_leverage: dec!(20),
        }
    }

    #[test]
    fn test_candidate_table_lists_legs() {
        let pair = RoiTradePair {
            coin: "BTC".into(),
            roi: dec!(2.43),
            maker_side: PositionSide::Long,
            long: leg("bybit"),
            short: leg("okx"),
            leverage: dec!(10),
        };
        let table = candidate_table(&[pair]);
        assert!(table.contains("bybit BTC/USDT:USDT"));
        assert!(table.contains("2.43"));
        assert_eq!(candidate_table(&[]), "(no candidates)");
    }

    #[test]
    fn test_parses_candidates_command() {
        let cli = Cli::parse_from(["fundarb", "--dry-run", "candidates", "--capital", "1000"]);
        assert!(cli.dry_run);
        match cli.command {
            Commands::Candidates { capital, json } => {
                assert_eq!(capital, Some(dec!(1000)));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
