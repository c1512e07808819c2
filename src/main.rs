use clap::Parser;
use fundarb::cli::{candidate_table, Cli, Commands};
use fundarb::config::AppConfig;
use fundarb::coordination::{install_signal_handlers, GracefulShutdown};
use fundarb::error::{ArbError, Result};
use tracing::{error, info};

mod main_runtime;

use main_runtime::{build_scheduler, build_store, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    if cli.dry_run {
        config.dry_run.enabled = true;
    }
    if let Err(problems) = config.validate() {
        for problem in &problems {
            eprintln!("config: {problem}");
        }
        return Err(ArbError::Validation(problems.join("; ")));
    }

    let _log_guard = init_logging(&config.logging);
    info!(
        central = %config.central_exchange,
        dry_run = config.dry_run.enabled,
        "fundarb starting"
    );

    match cli.command {
        Commands::Run => {
            let scheduler = build_scheduler(config).await?;
            let shutdown = GracefulShutdown::new();
            install_signal_handlers(shutdown.clone());
            scheduler.run(shutdown.token()).await;
        }
        Commands::Tick => {
            let scheduler = build_scheduler(config).await?;
            match scheduler.tick().await {
                Ok(outcome) => info!(?outcome, "tick finished"),
                Err(e) => {
                    error!(error = %e, "tick failed");
                    return Err(e);
                }
            }
        }
        Commands::Candidates { capital, json } => {
            let scheduler = build_scheduler(config).await?;
            let capital = match capital {
                Some(capital) => capital,
                None => scheduler.custody_capital().await?,
            };
            let pairs = scheduler.candidates(capital).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pairs)?);
            } else {
                println!("capital: {capital}");
                println!("{}", candidate_table(&pairs));
            }
        }
        Commands::State => {
            let store = build_store(&config).await?;
            match store.load().await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("(no trade state persisted yet)"),
            }
        }
    }

    Ok(())
}
