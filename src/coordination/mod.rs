//! Coordination primitives
//!
//! - Bounded-retry combinators used by every polling loop
//! - Graceful shutdown between scheduler ticks

pub mod retry;
pub mod shutdown;

pub use retry::{adjust_until_target_met, retry_until, RetryPolicy};
pub use shutdown::{install_signal_handlers, GracefulShutdown, ShutdownSignal, ShutdownToken};
