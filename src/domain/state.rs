use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PositionSide;

/// Trading cycle state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    /// Pair selected, capital not yet (fully) deployed
    Open,
    /// Both legs at target with protective orders in place
    Filled,
    /// No exposure, capital back on the central exchange
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Filled => "filled",
            TradeStatus::Closed => "closed",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: TradeStatus) -> bool {
        use TradeStatus::*;

        match (self, target) {
            (Closed, Open) => true,  // Pair selected
            (Open, Filled) => true,  // Legs opened and protected
            (Open, Closed) => true,  // Funding hour missed
            (Filled, Closed) => true, // Funding collected
            _ => false,
        }
    }

    pub fn has_exposure(&self) -> bool {
        matches!(self, TradeStatus::Open | TradeStatus::Filled)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TradeStatus::Open),
            "filled" => Ok(TradeStatus::Filled),
            "closed" => Ok(TradeStatus::Closed),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// One side of the hedge on one exchange.
///
/// `deposit_*` track the transfer custody -> leg, `withdraw_*` the transfer
/// leg -> custody. Once set they are only ever advanced, never cleared, so a
/// replayed reconciliation can pick up where the last one stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeLeg {
    pub exchange: String,
    pub symbol: String,
    pub risk_tier: u32,
    pub max_leverage: Decimal,
    #[serde(default)]
    pub deposit_id: Option<String>,
    #[serde(default)]
    pub deposit_tx_id: Option<String>,
    #[serde(default)]
    pub withdraw_id: Option<String>,
    #[serde(default)]
    pub withdraw_tx_id: Option<String>,
}

impl ExchangeLeg {
    pub fn new(exchange: &str, symbol: &str, risk_tier: u32, max_leverage: Decimal) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            risk_tier,
            max_leverage,
            ..Default::default()
        }
    }

    /// Progress of a transfer in the given direction
    pub fn transfer_progress(&self, direction: TransferDirection) -> TransferProgress {
        match direction {
            TransferDirection::Deposit => TransferProgress {
                withdrawal_id: self.deposit_id.clone(),
                tx_id: self.deposit_tx_id.clone(),
            },
            TransferDirection::Repatriate => TransferProgress {
                withdrawal_id: self.withdraw_id.clone(),
                tx_id: self.withdraw_tx_id.clone(),
            },
        }
    }

    /// Record transfer progress. Existing ids are never overwritten with `None`.
    pub fn record_progress(&mut self, direction: TransferDirection, progress: &TransferProgress) {
        let (id, tx) = match direction {
            TransferDirection::Deposit => (&mut self.deposit_id, &mut self.deposit_tx_id),
            TransferDirection::Repatriate => (&mut self.withdraw_id, &mut self.withdraw_tx_id),
        };
        if progress.withdrawal_id.is_some() {
            *id = progress.withdrawal_id.clone();
        }
        if progress.tx_id.is_some() {
            *tx = progress.tx_id.clone();
        }
    }
}

/// Direction of a capital transfer relative to a trading leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Central exchange -> leg
    Deposit,
    /// Leg -> central exchange
    Repatriate,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Deposit => write!(f, "deposit"),
            TransferDirection::Repatriate => write!(f, "repatriate"),
        }
    }
}

/// Checkpointed ids of one transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub withdrawal_id: Option<String>,
    pub tx_id: Option<String>,
}

/// Persisted trading cycle state, the single source of truth between ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeState {
    pub funding_hour: u32,
    pub state: TradeStatus,
    pub maker_side: PositionSide,
    pub leverage: Decimal,
    /// Target size per leg in base units
    pub target_size: Decimal,
    pub long: ExchangeLeg,
    pub short: ExchangeLeg,
    #[serde(default)]
    pub funding_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capital_per_leg: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl TradeState {
    /// Initial state on first run
    pub fn new() -> Self {
        Self {
            funding_hour: 0,
            state: TradeStatus::Closed,
            maker_side: PositionSide::Long,
            leverage: Decimal::ONE,
            target_size: Decimal::ZERO,
            long: ExchangeLeg::default(),
            short: ExchangeLeg::default(),
            funding_at: None,
            capital_per_leg: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn leg(&self, side: PositionSide) -> &ExchangeLeg {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    pub fn leg_mut(&mut self, side: PositionSide) -> &mut ExchangeLeg {
        match side {
            PositionSide::Long => &mut self.long,
            PositionSide::Short => &mut self.short,
        }
    }

    /// Move to `next`, rejecting transitions the cycle does not allow
    pub fn transition(&mut self, next: TradeStatus) -> crate::error::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::ArbError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for TradeState {
    fn default() -> Self {
        Self::new()
    }
}
