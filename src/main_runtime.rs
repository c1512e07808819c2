use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fundarb::adapters::{JsonFundingRates, JsonReferenceData, PostgresStateStore};
use fundarb::config::{AppConfig, LoggingConfig, StateBackend};
use fundarb::error::{ArbError, Result};
use fundarb::exchange::{build_registry, FundingRateProvider, ReferenceDataProvider};
use fundarb::persistence::{FileStateStore, MemoryStateStore, StateStore};
use fundarb::Scheduler;

/// Console plus optional daily file logging. Keep the guard alive for the process lifetime.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},fundarb=debug,sqlx=warn", config.level)));

    // `rolling::daily` panics if it cannot create the first file, so preflight the directory
    let mut guard = None;
    let file_layer = match &config.directory {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(dir, "fundarb.log");
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not create log directory {} ({}), file logging disabled",
                    dir.display(),
                    e
                );
                None
            }
        },
        None => None,
    };

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(filter)
        .init();

    if let Some(dir) = &config.directory {
        if guard.is_some() {
            eprintln!("Logging to: {}/fundarb.log", dir.display());
        }
    }
    guard
}

pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::File => Arc::new(FileStateStore::new(&config.state.path)),
        StateBackend::Postgres => {
            let database = config.database.as_ref().ok_or_else(|| {
                ArbError::Validation("postgres state backend requires a [database] section".to_string())
            })?;
            let store =
                PostgresStateStore::new(&database.url, database.max_connections, &config.state.key).await?;
            store.ensure_table().await?;
            Arc::new(store)
        }
    };
    info!(backend = ?config.state.backend, "state store ready");
    Ok(store)
}

pub async fn build_scheduler(config: AppConfig) -> Result<Scheduler> {
    let reference: Arc<dyn ReferenceDataProvider> =
        Arc::new(JsonReferenceData::new(&config.data.reference_path));
    let rates: Arc<dyn FundingRateProvider> =
        Arc::new(JsonFundingRates::new(&config.data.funding_rates_path));

    let (reference_snapshot, rate_snapshot) = tokio::try_join!(reference.load(), rates.fetch())?;
    let registry = build_registry(&config, &reference_snapshot, &rate_snapshot).await?;
    let store = build_store(&config).await?;

    Ok(Scheduler::new(config, registry, store, reference, rates))
}
