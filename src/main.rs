//! vault-orchestrator
//!
//! Runs the aggregator scenario against a cluster: funds the wallets, builds
//! the lookup table, then walks init → deposit → update-strategy → rebalance
//! → view → withdraw and prints the captured program events.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault_orchestrator::{
    config::Config,
    events::EventLog,
    ledger::{LedgerClient, RpcLedger},
    metrics::metrics,
    scenario::{Components, ScenarioDriver, Step},
    wallet::WalletManager,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Do not request test credit
    #[arg(long)]
    skip_airdrop: bool,

    /// Comma-separated subset of steps to run (default: all)
    #[arg(long, value_enum, value_delimiter = ',')]
    steps: Vec<Step>,

    /// Print the Prometheus metrics dump at the end of the run
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", args.config);
    let config = Config::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    config.validate().context("Invalid configuration")?;

    let owner = WalletManager::from_file(&config.wallet.keypair_path).context("Failed to load wallet")?;
    let user = WalletManager::from_optional_file(config.wallet.user_keypair_path.as_deref())
        .context("Failed to load scenario user")?;
    info!(owner = %owner.pubkey(), user = %user.pubkey(), "Wallets loaded");

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(
        config.rpc.url.clone(),
        config.rpc.ws_url.clone(),
        config.commitment(),
        config.rpc.allow_airdrop,
    ));
    let log = Arc::new(EventLog::new());
    let components = Components::new(&config, ledger, &user, log)?;
    let mut driver = ScenarioDriver::new(components, owner, user, &config)?;

    let steps = select_steps(&args);
    let outcome = match driver.run(&steps).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(run_id = %driver.run_context().run_id(), "Scenario failed: {:#}", e);
            if args.dump_metrics {
                print_metrics();
            }
            return Err(e);
        }
    };

    println!("{}", outcome.report);
    if args.json_logs {
        println!("{}", serde_json::to_string(&outcome.summary)?);
    }
    if args.dump_metrics {
        print_metrics();
    }
    Ok(())
}

fn select_steps(args: &Args) -> Vec<Step> {
    let mut steps = if args.steps.is_empty() {
        Step::ALL.to_vec()
    } else {
        args.steps.clone()
    };
    if args.skip_airdrop {
        steps.retain(|s| *s != Step::Airdrop);
    }
    steps
}

fn print_metrics() {
    match metrics().export_text() {
        Ok(text) => println!("{}", text),
        Err(e) => error!("Failed to export metrics: {}", e),
    }
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "vault_orchestrator=debug,info"
    } else {
        "vault_orchestrator=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };
    installed.context("Failed to install tracing subscriber")?;

    Ok(())
}
