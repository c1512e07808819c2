//! Crash-resumable capital transfers between venues
//!
//! One transfer moves the settlement currency from a source venue to the
//! deposit address of a destination venue:
//! 1. adopt a withdrawal already made for this cycle, or make one
//! 2. wait for the source to report its on-chain transaction id
//! 3. wait for the destination to confirm the matching deposit
//!
//! Every id is checkpointed before the next step starts, so replaying a
//! transfer with recorded ids never withdraws twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{ExchangeRoute, TransferConfig};
use crate::coordination::retry::{retry_until, RetryPolicy};
use crate::domain::{
    PositionSide, Transaction, TransactionStatus, TransferDirection, TransferProgress,
    WithdrawRequest,
};
use crate::error::{ArbError, Result};
use crate::exchange::ExchangeAdapter;
use crate::persistence::TransferCheckpoint;

use super::fund_manager::FundManager;

/// A venue taking part in a transfer
#[derive(Clone)]
pub struct TransferEndpoint {
    pub exchange: String,
    pub adapter: Arc<dyn ExchangeAdapter>,
}

impl std::fmt::Debug for TransferEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEndpoint")
            .field("exchange", &self.exchange)
            .finish()
    }
}

/// One leg's transfer, resumed from `progress`
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub leg: PositionSide,
    pub direction: TransferDirection,
    pub source: TransferEndpoint,
    pub destination: TransferEndpoint,
    /// Deposit route of the destination
    pub route: ExchangeRoute,
    /// `None` moves everything above the dust reserve
    pub amount: Option<Decimal>,
    /// Earliest timestamp a withdrawal of this cycle can carry
    pub since: DateTime<Utc>,
    pub progress: TransferProgress,
}

/// Confirmed transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub progress: TransferProgress,
    pub amount: Decimal,
}

/// Moves capital for one leg at a time
pub struct FundReconciler {
    config: TransferConfig,
    funds: FundManager,
}

impl FundReconciler {
    pub fn new(config: TransferConfig) -> Self {
        let funds = FundManager::new(&config.currency, config.dust_reserve);
        Self { config, funds }
    }

    pub fn funds(&self) -> &FundManager {
        &self.funds
    }

    #[instrument(skip_all, fields(leg = %request.leg, direction = %request.direction, from = %request.source.exchange, to = %request.destination.exchange))]
    pub async fn reconcile(
        &self,
        request: &TransferRequest,
        checkpoint: &dyn TransferCheckpoint,
    ) -> Result<TransferOutcome> {
        let mut progress = request.progress.clone();

        if progress.tx_id.is_none() {
            if progress.withdrawal_id.is_none() {
                if let Some(existing) = self.find_existing_withdrawal(request).await? {
                    warn!(withdrawal_id = %existing.id, "adopting withdrawal found on source");
                    progress.withdrawal_id = Some(existing.id);
                    progress.tx_id = existing.txid;
                } else {
                    let tx = self.initiate_withdrawal(request).await?;
                    progress.withdrawal_id = Some(tx.id);
                    progress.tx_id = tx.txid;
                }
                checkpoint.record(request.leg, request.direction, &progress).await?;
            }

            if progress.tx_id.is_none() {
                let withdrawal_id = progress.withdrawal_id.clone().unwrap_or_default();
                let tx_id = self.await_tx_id(request, &withdrawal_id).await?;
                progress.tx_id = Some(tx_id);
                checkpoint.record(request.leg, request.direction, &progress).await?;
            }
        }

        let tx_id = progress.tx_id.clone().unwrap_or_default();
        let deposit = self.await_deposit(request, &tx_id).await?;
        info!(%tx_id, amount = %deposit.amount, "Transfer confirmed");

        if request.direction == TransferDirection::Deposit {
            self.funds
                .sweep_to_trading(&request.destination.exchange, request.destination.adapter.as_ref())
                .await?;
        }

        Ok(TransferOutcome {
            progress,
            amount: deposit.amount,
        })
    }

    async fn find_existing_withdrawal(&self, request: &TransferRequest) -> Result<Option<Transaction>> {
        let history = request
            .source
            .adapter
            .fetch_withdrawals(&self.config.currency, Some(request.since), self.config.history_limit)
            .await?;
        Ok(history.into_iter().find(|tx| {
            tx.address.as_deref() == Some(request.route.address.as_str())
                && tx.timestamp >= request.since
                && !matches!(tx.status, TransactionStatus::Failed | TransactionStatus::Canceled)
        }))
    }

    async fn initiate_withdrawal(&self, request: &TransferRequest) -> Result<Transaction> {
        let source = &request.source;
        let amount = self
            .funds
            .prepare_withdrawal(&source.exchange, source.adapter.as_ref(), request.amount)
            .await?;

        let tx = source
            .adapter
            .withdraw(&WithdrawRequest {
                currency: self.config.currency.clone(),
                amount,
                address: request.route.address.clone(),
                tag: request.route.tag.clone(),
                network: request.route.network.clone(),
            })
            .await?;
        info!(withdrawal_id = %tx.id, %amount, "Withdrawal initiated");
        Ok(tx)
    }

    async fn await_tx_id(&self, request: &TransferRequest, withdrawal_id: &str) -> Result<String> {
        let adapter = &request.source.adapter;
        let currency = self.config.currency.as_str();
        let limit = self.config.history_limit;
        let since = request.since;

        let result = retry_until("withdrawal tx id", self.policy(), || async move {
            let history = adapter.fetch_withdrawals(currency, Some(since), limit).await?;
            match history.into_iter().find(|tx| tx.id == withdrawal_id) {
                Some(tx) if matches!(tx.status, TransactionStatus::Failed | TransactionStatus::Canceled) => {
                    Err(ArbError::ReconciliationFailed {
                        leg: request.leg.to_string(),
                        exchange: request.source.exchange.clone(),
                        id: withdrawal_id.to_string(),
                        stage: format!("withdrawal {:?}", tx.status).to_lowercase(),
                    })
                }
                Some(tx) => Ok(tx.txid),
                None => Ok(None),
            }
        })
        .await;

        result.map_err(|e| self.exhausted(e, request, &request.source.exchange, withdrawal_id, "awaiting withdrawal tx id"))
    }

    async fn await_deposit(&self, request: &TransferRequest, tx_id: &str) -> Result<Transaction> {
        let adapter = &request.destination.adapter;
        let currency = self.config.currency.as_str();
        let limit = self.config.history_limit;
        let since = request.since;

        let result = retry_until("deposit confirmation", self.policy(), || async move {
            let history = adapter.fetch_deposits(currency, Some(since), limit).await?;
            Ok(history.into_iter().find(|tx| {
                tx.txid.as_deref() == Some(tx_id) && tx.status == TransactionStatus::Ok
            }))
        })
        .await;

        result.map_err(|e| self.exhausted(e, request, &request.destination.exchange, tx_id, "awaiting deposit confirmation"))
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.config.max_polls, self.config.poll_interval())
    }

    fn exhausted(
        &self,
        error: ArbError,
        request: &TransferRequest,
        exchange: &str,
        id: &str,
        stage: &str,
    ) -> ArbError {
        match error {
            ArbError::RetryExhausted { .. } => ArbError::ReconciliationFailed {
                leg: request.leg.to_string(),
                exchange: exchange.to_string(),
                id: id.to_string(),
                stage: stage.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::paper_exchange::{PaperExchange, PaperNetwork};
    use crate::domain::{AccountType, TradeState, TradeStatus};
    use crate::exchange::MockExchangeAdapter;
    use crate::persistence::{MemoryStateStore, MockTransferCheckpoint, StateCheckpoint, StateStore};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn config() -> TransferConfig {
        TransferConfig {
            currency: "USDT".into(),
            dust_reserve: dec!(1),
            poll_interval_secs: 0,
            max_polls: 3,
            history_limit: 50,
        }
    }

    fn route(address: &str) -> ExchangeRoute {
        ExchangeRoute {
            address: address.into(),
            network: Some("TRC20".into()),
            tag: None,
        }
    }

    fn request(
        source: Arc<dyn ExchangeAdapter>,
        destination: Arc<dyn ExchangeAdapter>,
        progress: TransferProgress,
    ) -> TransferRequest {
        TransferRequest {
            leg: PositionSide::Long,
            direction: TransferDirection::Deposit,
            source: TransferEndpoint {
                exchange: "binance".into(),
                adapter: source,
            },
            destination: TransferEndpoint {
                exchange: "okx".into(),
                adapter: destination,
            },
            route: route("0xokx"),
            amount: Some(dec!(500)),
            since: Utc::now() - Duration::hours(1),
            progress,
        }
    }

    fn confirmed_deposit(txid: &str) -> Transaction {
        Transaction {
            id: "dep-1".into(),
            txid: Some(txid.into()),
            currency: "USDT".into(),
            amount: dec!(500),
            address: Some("0xokx".into()),
            tag: None,
            network: Some("TRC20".into()),
            status: TransactionStatus::Ok,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_recorded_tx_id_only_confirms() {
        let mut source = MockExchangeAdapter::new();
        source.expect_withdraw().times(0);
        source.expect_fetch_withdrawals().times(0);
        source.expect_transfer().times(0);

        let mut destination = MockExchangeAdapter::new();
        destination
            .expect_fetch_deposits()
            .times(2)
            .returning(|_, _, _| Ok(vec![confirmed_deposit("0xabc")]));
        destination
            .expect_fetch_balance()
            .returning(|_| Ok(Default::default()));

        let mut checkpoint = MockTransferCheckpoint::new();
        checkpoint.expect_record().times(0);

        let reconciler = FundReconciler::new(config());
        let req = request(
            Arc::new(source),
            Arc::new(destination),
            TransferProgress {
                withdrawal_id: Some("wd-1".into()),
                tx_id: Some("0xabc".into()),
            },
        );

        // replaying twice never withdraws
        for _ in 0..2 {
            let outcome = reconciler.reconcile(&req, &checkpoint).await.unwrap();
            assert_eq!(outcome.amount, dec!(500));
            assert_eq!(outcome.progress.tx_id.as_deref(), Some("0xabc"));
        }
    }

    #[tokio::test]
    async fn test_missing_deposit_names_leg_and_exchange() {
        let source = MockExchangeAdapter::new();
        let mut destination = MockExchangeAdapter::new();
        destination
            .expect_fetch_deposits()
            .times(3)
            .returning(|_, _, _| Ok(vec![]));

        let checkpoint = MockTransferCheckpoint::new();
        let reconciler = FundReconciler::new(config());
        let req = request(
            Arc::new(source),
            Arc::new(destination),
            TransferProgress {
                withdrawal_id: Some("wd-1".into()),
                tx_id: Some("0xabc".into()),
            },
        );

        let err = reconciler.reconcile(&req, &checkpoint).await.unwrap_err();
        match err {
            ArbError::ReconciliationFailed { leg, exchange, id, .. } => {
                assert_eq!(leg, "long");
                assert_eq!(exchange, "okx");
                assert_eq!(id, "0xabc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_full_transfer_between_paper_venues() {
        let network = PaperNetwork::new();
        let source = Arc::new(PaperExchange::new("binance", "0xbinance", network.clone()));
        let destination = Arc::new(PaperExchange::new("okx", "0xokx", network));
        source.set_balance(AccountType::Funding, "USDT", dec!(800)).await;

        let store = Arc::new(MemoryStateStore::new());
        let mut state = TradeState::new();
        state.transition(TradeStatus::Open).unwrap();
        let checkpoint = StateCheckpoint::new(state, store.clone());

        let reconciler = FundReconciler::new(config());
        let req = request(source.clone(), destination.clone(), TransferProgress::default());
        let outcome = reconciler.reconcile(&req, &checkpoint).await.unwrap();

        assert_eq!(outcome.amount, dec!(500));
        assert_eq!(source.withdraw_calls().await, 1);
        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.long.deposit_id, outcome.progress.withdrawal_id);
        assert_eq!(saved.long.deposit_tx_id, outcome.progress.tx_id);

        let funds = reconciler.funds();
        assert_eq!(funds.free(destination.as_ref(), AccountType::Trading).await.unwrap(), dec!(500));
        assert_eq!(funds.free(source.as_ref(), AccountType::Funding).await.unwrap(), dec!(300));
    }

    #[tokio::test]
    async fn test_unpersisted_withdrawal_is_adopted() {
        let network = PaperNetwork::new();
        let source = Arc::new(PaperExchange::new("binance", "0xbinance", network.clone()));
        let destination = Arc::new(PaperExchange::new("okx", "0xokx", network));
        source.set_balance(AccountType::Funding, "USDT", dec!(800)).await;

        // crashed after withdrawing, before the id reached the state
        let earlier = source
            .withdraw(&WithdrawRequest {
                currency: "USDT".into(),
                amount: dec!(500),
                address: "0xokx".into(),
                tag: None,
                network: Some("TRC20".into()),
            })
            .await
            .unwrap();

        let mut checkpoint = MockTransferCheckpoint::new();
        checkpoint.expect_record().times(1).returning(|_, _, _| Ok(()));

        let reconciler = FundReconciler::new(config());
        let req = request(source.clone(), destination, TransferProgress::default());
        let outcome = reconciler.reconcile(&req, &checkpoint).await.unwrap();

        assert_eq!(source.withdraw_calls().await, 1);
        assert_eq!(outcome.progress.withdrawal_id, Some(earlier.id));
        assert_eq!(outcome.progress.tx_id, earlier.txid);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_fatal() {
        let network = PaperNetwork::new();
        let source = Arc::new(PaperExchange::new("binance", "0xbinance", network.clone()));
        let destination = Arc::new(PaperExchange::new("okx", "0xokx", network));
        source.set_balance(AccountType::Funding, "USDT", dec!(100)).await;

        let checkpoint = MockTransferCheckpoint::new();
        let reconciler = FundReconciler::new(config());
        let req = request(source.clone(), destination, TransferProgress::default());

        let err = reconciler.reconcile(&req, &checkpoint).await.unwrap_err();
        assert!(matches!(err, ArbError::InsufficientFunds { .. }));
        assert_eq!(source.withdraw_calls().await, 0);
    }
}
