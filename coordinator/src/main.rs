use anyhow::Context;
use clap::{Arg, Command};
use holdout_coordinator::api::Api;
use holdout_coordinator::coordinator::Coordinator;
use holdout_coordinator::store::Store;
use holdout_coordinator::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse arguments
    let matches = Command::new("coordinator")
        .about("Round-lifecycle coordinator for the holdout prize pool.")
        .arg(Arg::new("config").long("config").required(true))
        .get_matches();

    // Load config
    let config_file = matches
        .get_one::<String>("config")
        .context("--config is required")?;
    let raw = std::fs::read_to_string(config_file)
        .with_context(|| format!("could not read config file {config_file}"))?;
    let config: Config = serde_yaml::from_str(&raw).context("could not parse config file")?;
    let config = config.validate().context("invalid config")?;

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    // Open durable state and the settlement client
    let store = Store::open(&config.db_path)
        .with_context(|| format!("could not open store at {}", config.db_path.display()))?;
    let settlement = holdout_chain::Client::new(config.chain.clone())
        .context("could not create settlement client")?;
    match settlement.signer_address() {
        Some(address) => info!(%address, "payout signer ready"),
        None => warn!("no payout signer configured, automatic finalization disabled"),
    }

    let coordinator = Arc::new(Coordinator::new(
        store,
        settlement,
        config.threshold_wei,
        config.tolerance_buffer_ms,
        config.leaderboard_limit,
    ));
    info!(threshold_wei = config.threshold_wei, "coordinator ready");

    // Start server
    let api = Api::new(coordinator);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);
    axum::serve(
        listener,
        api.router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
