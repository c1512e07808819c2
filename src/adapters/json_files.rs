//! JSON snapshot providers
//!
//! Reference data and funding rates are produced by an external ingestion
//! job and dropped on disk as nested `coin -> exchange -> pair` maps.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{FundingRates, ReferenceData};
use crate::error::{ArbError, Result};
use crate::exchange::{FundingRateProvider, ReferenceDataProvider};

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ArbError::MissingData(format!("{} not found", path.display()))
        } else {
            e.into()
        }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Reference data read from a JSON file on every load
#[derive(Debug, Clone)]
pub struct JsonReferenceData {
    path: PathBuf,
}

impl JsonReferenceData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReferenceDataProvider for JsonReferenceData {
    async fn load(&self) -> Result<ReferenceData> {
        let data: ReferenceData = read_json(&self.path).await?;
        debug!(path = %self.path.display(), coins = data.len(), "reference data loaded");
        Ok(data)
    }
}

/// Funding rate snapshot read from a JSON file on every fetch
#[derive(Debug, Clone)]
pub struct JsonFundingRates {
    path: PathBuf,
}

impl JsonFundingRates {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FundingRateProvider for JsonFundingRates {
    async fn fetch(&self) -> Result<FundingRates> {
        let rates: FundingRates = read_json(&self.path).await?;
        debug!(path = %self.path.display(), coins = rates.len(), "funding rates loaded");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_reads_nested_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let reference_path = dir.path().join("reference.json");
        let rates_path = dir.path().join("rates.json");
        std::fs::write(
            &reference_path,
            r#"{"BTC": {"okx": {"BTC/USDT:USDT": {
                "maker_fee": "0.02", "taker_fee": "0.05", "contract_size": "0.01",
                "tiers": [{"tier": 1, "max_leverage": "100", "max_notional": "50000",
                           "min_notional": "0", "maintenance_margin_rate": "0.004"}]
            }}}}"#,
        )
        .unwrap();
        std::fs::write(
            &rates_path,
            r#"{"BTC": {"okx": {"BTC/USDT:USDT": {"rate": "0.0001", "mark_price": "50000"}}}}"#,
        )
        .unwrap();

        let reference = JsonReferenceData::new(&reference_path).load().await.unwrap();
        let pair = &reference["BTC"]["okx"]["BTC/USDT:USDT"];
        assert_eq!(pair.contract_size, dec!(0.01));
        assert!(!pair.base_denominated);
        assert_eq!(pair.tiers[0].max_leverage, dec!(100));

        let rates = JsonFundingRates::new(&rates_path).fetch().await.unwrap();
        assert_eq!(rates["BTC"]["okx"]["BTC/USDT:USDT"].mark_price, Some(dec!(50000)));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_missing_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFundingRates::new(dir.path().join("absent.json"))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, ArbError::MissingData(_)));
    }
}
