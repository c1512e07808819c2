//! Bounded-retry combinators
//!
//! Every polling loop in the engine goes through one of these two helpers,
//! so the retry budget is the only timeout mechanism a step has.

use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ArbError, Result};

/// How often and how long to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            interval,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            interval,
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Call `f` until it yields `Some`.
///
/// `Ok(None)` means "not yet" and transient errors are retried. Any other
/// error is returned immediately. Once the attempt budget is spent the result
/// is `ArbError::RetryExhausted` naming `operation`.
pub async fn retry_until<T, F, Fut>(operation: &str, policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match f().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => debug!(operation, attempts, "condition not met yet"),
            Err(e) if e.is_transient() => {
                warn!(operation, attempts, error = %e, "transient failure, retrying")
            }
            Err(e) => return Err(e),
        }

        if policy.exhausted(attempts) {
            return Err(ArbError::RetryExhausted {
                operation: operation.to_string(),
                attempts,
            });
        }
        sleep(policy.interval).await;
    }
}

/// Keep placing until the measured size covers `target`.
///
/// Each round measures the current size with `get_size`; when the shortfall
/// is below `tolerance` the final size is returned. Otherwise `place` is
/// asked to cover the shortfall. The loop gives up with
/// `ArbError::RetryExhausted` after `retry_limit` consecutive observations
/// without any change in size.
pub async fn adjust_until_target_met<G, GF, P, PF>(
    operation: &str,
    target: Decimal,
    tolerance: Decimal,
    retry_limit: u32,
    interval: Duration,
    mut get_size: G,
    mut place: P,
) -> Result<Decimal>
where
    G: FnMut() -> GF,
    GF: Future<Output = Result<Decimal>>,
    P: FnMut(Decimal) -> PF,
    PF: Future<Output = Result<()>>,
{
    let mut last: Option<Decimal> = None;
    let mut unchanged = 0u32;
    let mut observations = 0u32;

    loop {
        let measured = match get_size().await {
            Ok(size) => Some(size),
            Err(e) if e.is_transient() => {
                warn!(operation, error = %e, "size lookup failed, retrying");
                None
            }
            Err(e) => return Err(e),
        };
        observations += 1;

        match measured {
            Some(current) => {
                if target - current < tolerance {
                    debug!(operation, %current, %target, "target met");
                    return Ok(current);
                }
                if last == Some(current) {
                    unchanged += 1;
                } else {
                    unchanged = 0;
                }
                last = Some(current);
            }
            None => unchanged += 1,
        }

        if unchanged >= retry_limit {
            return Err(ArbError::RetryExhausted {
                operation: operation.to_string(),
                attempts: observations,
            });
        }

        if let Some(current) = measured {
            if let Err(e) = place(target - current).await {
                if !e.is_transient() {
                    return Err(e);
                }
                warn!(operation, error = %e, "placement failed, will re-measure");
            }
        }
        sleep(interval).await;
    }
}
