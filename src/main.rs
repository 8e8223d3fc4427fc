use clap::{Parser, Subcommand};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsp_core::{
    ClientConfig, FlowOrchestrator, NegotiationDriver, ProtocolEventLog, StepEntry, StepObserver,
    TransferDriver, connect,
};

#[derive(Parser)]
#[command(name = "ehr-dsp")]
#[command(about = "Dataspace protocol demo client for EHR records")]
struct Cli {
    /// Print the protocol event log when the command finishes
    #[arg(long, global = true)]
    events: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved operating mode and backend URL
    Mode,
    /// Check that the backend is reachable
    Health,
    /// Negotiate a contract for an asset
    Negotiate {
        /// Asset identifier, e.g. ehr:EHR001
        asset_id: String,
        /// Offer identifier from the catalog
        offer_id: String,
        /// Policy identifier (optional)
        #[arg(long)]
        policy: Option<String>,
    },
    /// Transfer an asset under an existing contract agreement
    Transfer {
        /// Contract agreement identifier from a finalized negotiation
        agreement_id: String,
        /// Asset identifier
        asset_id: String,
    },
    /// Negotiate, transfer and fetch an asset in one go
    Flow {
        /// Asset identifier
        asset_id: String,
        /// Offer identifier (defaults to the asset id)
        #[arg(long)]
        offer: Option<String>,
        /// Policy identifier (optional)
        #[arg(long)]
        policy: Option<String>,
    },
}

/// Prints each observed state transition as it happens.
struct StepPrinter;

impl StepObserver for StepPrinter {
    fn record(&self, entry: StepEntry) {
        print_step(&entry);
    }
}

fn print_step(entry: &StepEntry) {
    let marker = match (entry.is_terminal, entry.is_error) {
        (_, true) => "x",
        (true, false) => "+",
        (false, false) => "-",
    };
    match &entry.detail {
        Some(detail) => println!(
            "  {marker} {} [{}] {}",
            entry.label, entry.raw_state, detail
        ),
        None => println!("  {marker} {} [{}]", entry.label, entry.raw_state),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Await `operation`; on Ctrl-C call `cancel` and wait for the operation to wind down.
async fn until_interrupted<F, C>(operation: F, cancel: C) -> F::Output
where
    F: Future,
    C: FnOnce(),
{
    tokio::pin!(operation);
    tokio::select! {
        output = &mut operation => return output,
        _ = tokio::signal::ctrl_c() => {}
    }

    tracing::warn!("interrupted, cancelling");
    cancel();
    operation.await
}

/// Main entry point for the dataspace demo client
///
/// # Environment Variables
/// - `API_MODE`: `mock`, `hybrid` or `full` (default: mock)
/// - `MOCK_API_URL`: backend URL in mock mode (default: "http://localhost:3001")
/// - `EDC_API_URL`: backend URL in hybrid and full modes (default: "http://localhost:3002")
/// - `POLL_INTERVAL_MS`, `MAX_POLL_ATTEMPTS`, `RETRY_ATTEMPTS`, `RETRY_DELAY_MS`,
///   `REQUEST_TIMEOUT_MS`: polling and request policy
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ehr_dsp_run=info".parse()?)
                .add_directive("dsp_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env();
    let events = ProtocolEventLog::new();

    tracing::info!(mode = %config.mode(), base_url = config.base_url(), "client configured");

    let outcome = match cli.command {
        Commands::Mode => show_mode(&config).await,
        Commands::Health => {
            let api = connect(&config)?;
            let health = api.health().await?;
            print_json(&health)
        }
        Commands::Negotiate {
            asset_id,
            offer_id,
            policy,
        } => {
            let driver = NegotiationDriver::new(connect(&config)?, config.poll_settings())
                .with_observer(Arc::new(StepPrinter))
                .with_event_log(events.clone());
            println!("Negotiating {asset_id} (offer {offer_id})");
            until_interrupted(
                driver.initiate(&asset_id, &offer_id, policy.as_deref()),
                || driver.cancel(),
            )
            .await
            .map_err(anyhow::Error::from)
            .and_then(|handle| print_json(&handle))
        }
        Commands::Transfer {
            agreement_id,
            asset_id,
        } => {
            let driver = TransferDriver::new(connect(&config)?, config.poll_settings())
                .with_observer(Arc::new(StepPrinter))
                .with_event_log(events.clone());
            println!("Transferring {asset_id} under agreement {agreement_id}");
            until_interrupted(driver.initiate(&agreement_id, &asset_id), || {
                driver.cancel()
            })
            .await
            .map_err(anyhow::Error::from)
            .and_then(|outcome| print_json(&outcome))
        }
        Commands::Flow {
            asset_id,
            offer,
            policy,
        } => {
            let flow = FlowOrchestrator::with_event_log(
                connect(&config)?,
                config.poll_settings(),
                events.clone(),
            );
            let result = until_interrupted(
                flow.run_full_flow(&asset_id, offer.as_deref(), policy.as_deref()),
                || flow.cancel(),
            )
            .await;

            println!("Negotiation:");
            flow.negotiation_steps().iter().for_each(print_step);
            println!("Transfer:");
            flow.transfer_steps().iter().for_each(print_step);
            print_json(&result).and_then(|()| match &result.error {
                Some(error) => Err(anyhow::anyhow!("flow failed: {}", error.message)),
                None => Ok(()),
            })
        }
    };

    if cli.events {
        print_json(&events.snapshot())?;
    }
    outcome
}

async fn show_mode(config: &ClientConfig) -> anyhow::Result<()> {
    println!("Mode: {} ({})", config.mode(), config.mode().description());
    println!("Base URL: {}", config.base_url());

    let api = connect(config)?;
    match api.mode_info().await {
        Ok(info) => print_json(&info),
        Err(e) => {
            tracing::warn!("backend did not report its mode: {e}");
            Ok(())
        }
    }
}
