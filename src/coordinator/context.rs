use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::domain::TradeState;
use crate::error::{ArbError, Result};

/// First funding boundary strictly after `now`.
///
/// Boundaries are multiples of `interval_hours` counted from 00:00 UTC.
pub fn next_funding(now: DateTime<Utc>, interval_hours: u32) -> Result<DateTime<Utc>> {
    let interval = Duration::hours(i64::from(interval_hours.max(1)));
    let floor = now
        .duration_trunc(interval)
        .map_err(|e| ArbError::Internal(format!("funding boundary for {now}: {e}")))?;
    Ok(floor + interval)
}

/// Ids and instants resolved once per tick and handed to each step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleContext {
    /// Funding event this cycle trades
    pub funding_at: DateTime<Utc>,
    /// Earliest timestamp of a withdrawal funding this cycle's legs
    pub transfer_since: DateTime<Utc>,
    pub tick_started: DateTime<Utc>,
}

impl CycleContext {
    pub fn new(funding_at: DateTime<Utc>, onboarding_lead: Duration, now: DateTime<Utc>) -> Self {
        Self {
            funding_at,
            transfer_since: funding_at - onboarding_lead,
            tick_started: now,
        }
    }

    /// Context of a persisted cycle
    pub fn for_state(state: &TradeState, onboarding_lead: Duration, now: DateTime<Utc>) -> Result<Self> {
        let funding_at = state
            .funding_at
            .ok_or_else(|| ArbError::MissingData(format!("{} trade state has no funding time", state.state)))?;
        Ok(Self::new(funding_at, onboarding_lead, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_funding_boundaries() {
        let at = |h, m| Utc.with_ymd_and_hms(2026, 1, 1, h, m, 0).unwrap();

        assert_eq!(next_funding(at(7, 45), 8).unwrap(), at(8, 0));
        assert_eq!(next_funding(at(8, 0), 8).unwrap(), at(16, 0));
        assert_eq!(next_funding(at(0, 1), 4).unwrap(), at(4, 0));
        assert_eq!(
            next_funding(at(23, 10), 8).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_context_transfer_window() {
        let funding_at = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let ctx = CycleContext::new(funding_at, Duration::minutes(30), funding_at);
        assert_eq!(ctx.transfer_since, Utc.with_ymd_and_hms(2026, 1, 1, 7, 30, 0).unwrap());

        let state = TradeState::new();
        assert!(CycleContext::for_state(&state, Duration::minutes(30), funding_at).is_err());
    }
}
