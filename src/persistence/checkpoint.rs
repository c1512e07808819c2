//! Checkpointing of in-flight transfers
//!
//! Reconciliation reports every id it learns through [`TransferCheckpoint`]
//! before taking its next step. [`StateCheckpoint`] applies the id to the
//! shared TradeState and persists it immediately.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::{PositionSide, TradeState, TransferDirection, TransferProgress};
use crate::error::Result;

use super::StateStore;

/// Sink for transfer ids, called before the transfer proceeds
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferCheckpoint: Send + Sync {
    async fn record(
        &self,
        leg: PositionSide,
        direction: TransferDirection,
        progress: &TransferProgress,
    ) -> Result<()>;
}

/// TradeState shared by the concurrent steps of one tick
pub struct StateCheckpoint {
    state: Arc<Mutex<TradeState>>,
    store: Arc<dyn StateStore>,
}

impl StateCheckpoint {
    pub fn new(state: TradeState, store: Arc<dyn StateStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            store,
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> TradeState {
        self.state.lock().await.clone()
    }

    /// Mutate and persist in one step
    pub async fn update<F>(&self, f: F) -> Result<TradeState>
    where
        F: FnOnce(&mut TradeState) -> Result<()> + Send,
    {
        let mut state = self.state.lock().await;
        f(&mut state)?;
        state.updated_at = Utc::now();
        self.store.save(&state).await?;
        Ok(state.clone())
    }
}

#[async_trait]
impl TransferCheckpoint for StateCheckpoint {
    async fn record(
        &self,
        leg: PositionSide,
        direction: TransferDirection,
        progress: &TransferProgress,
    ) -> Result<()> {
        self.update(|state| {
            state.leg_mut(leg).record_progress(direction, progress);
            Ok(())
        })
        .await?;
        info!(%leg, %direction, withdrawal_id = ?progress.withdrawal_id, tx_id = ?progress.tx_id, "transfer checkpoint saved");
        Ok(())
    }
}
