pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod strategy;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownSignal};
pub use coordinator::{Scheduler, TickOutcome};
pub use error::{ArbError, Result};
