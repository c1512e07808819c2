//! Funding-rate arbitrage strategy
//!
//! - `rate_calculator` ranks hedge candidates by funding spread net of fees
//! - `order_sizer` splits a requirement into contract-aligned batches
//! - `hedge_executor` moves both legs to a target size delta-neutrally
//! - `protective_orders` covers each leg with stop-loss and take-profit
//! - `fund_manager` / `reconciliation` move capital between venues

pub mod fund_manager;
pub mod hedge_executor;
pub mod order_sizer;
pub mod protective_orders;
pub mod rate_calculator;
pub mod reconciliation;

pub use fund_manager::FundManager;
pub use hedge_executor::{HedgeExecutor, HedgeLeg, HedgePhase, HedgeReport};
pub use order_sizer::{plan_batches, plan_leg, BatchPlan, LegSizing};
pub use protective_orders::{ProtectionReport, ProtectivePlanner, TriggerPrices};
pub use rate_calculator::{rank_candidates, CandidateLeg, RateCalculation, RoiTradePair};
pub use reconciliation::{FundReconciler, TransferEndpoint, TransferOutcome, TransferRequest};
