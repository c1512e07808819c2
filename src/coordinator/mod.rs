//! Trading cycle coordination
//!
//! The scheduler owns TradeState and sequences rate selection, funding,
//! hedging, protection and repatriation once per funding interval.

pub mod context;
pub mod scheduler;

pub use context::{next_funding, CycleContext};
pub use scheduler::{Scheduler, TickOutcome};
