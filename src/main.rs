mod config;
mod crypto;
mod database;
mod emergency;
mod engine;
mod exchange;
mod market_data;
mod notifications;
mod reconciler;
mod scheduler;
mod signal;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use crypto::CredentialCipher;
use database::Database;
use emergency::EmergencyStop;
use engine::{PairCycle, PairLockRegistry};
use exchange::{Exchange, PerpExchangeClient};
use market_data::MarketDataGateway;
use notifications::NotificationManager;
use reconciler::Reconciler;
use scheduler::Scheduler;

/// Lighter mainnet host: candle/orderbook reads and order placement all go
/// through this single REST surface.
const EXCHANGE_HOST: &str = "https://mainnet.zklighter.elliot.ai";
const NOTIFICATION_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "tradingservice-core")]
#[command(version, about = "Statistical-arbitrage pair trading service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use a synthetic exchange client that never touches the network.
    #[arg(long, global = true)]
    mock_exchange: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile positions against the exchange, then run the scheduler until interrupted.
    Run,
    /// Close open positions and/or disable every pair, then exit.
    EmergencyStop {
        #[arg(long, default_value_t = true)]
        close_positions: bool,
        #[arg(long, default_value_t = true)]
        disable_pairs: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let db = Arc::new(Database::new(&settings.database_url).await.context("opening database")?);
    let market_data = Arc::new(MarketDataGateway::new(EXCHANGE_HOST, EXCHANGE_HOST));
    let notifications = NotificationManager::spawn(NOTIFICATION_BUFFER);
    let cipher = Arc::new(cipher_from_settings(&settings)?);

    match cli.command {
        Command::Run => run(db, market_data, notifications, cipher, cli.mock_exchange).await,
        Command::EmergencyStop { close_positions, disable_pairs } => {
            let stop = EmergencyStop::new(db, market_data, notifications, cipher, cli.mock_exchange);
            let result = stop.run(close_positions, disable_pairs, None).await?;
            info!(?result, "emergency stop finished");
            for err in &result.errors {
                warn!("{err}");
            }
            Ok(())
        }
    }
}

fn cipher_from_settings(settings: &Settings) -> Result<CredentialCipher> {
    if settings.encryption_key.is_empty() {
        warn!("TS_ENCRYPTION_KEY not set, generating an ephemeral key — stored credentials will not decrypt after a restart");
        return Ok(CredentialCipher::new(&CredentialCipher::generate_key())?);
    }
    Ok(CredentialCipher::new(&settings.encryption_key)?)
}

async fn run(
    db: Arc<Database>,
    market_data: Arc<MarketDataGateway>,
    notifications: NotificationManager,
    cipher: Arc<CredentialCipher>,
    mock_exchange: bool,
) -> Result<()> {
    match startup_exchange(&db, &cipher, mock_exchange).await? {
        Some(exchange) => {
            if let Err(e) = Reconciler::new(&db).run(&*exchange).await {
                warn!(error = %e, "position reconciliation failed, continuing to scheduler anyway");
            }
        }
        None => warn!("no active credential, skipping startup position reconciliation"),
    }

    let cycle = Arc::new(PairCycle::new(db.clone(), market_data, notifications, cipher, mock_exchange));
    let registry = Arc::new(PairLockRegistry::new());
    let scheduler = Scheduler::new(cycle, registry);

    let pairs = db.get_enabled_pairs().await?;
    scheduler.start(&pairs).await;
    info!(pairs = pairs.len(), "scheduler running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    Ok(())
}

/// Builds the exchange client used once at startup for reconciliation,
/// independent of (and shorter-lived than) the per-cycle clients each pair
/// cycle constructs for itself.
async fn startup_exchange(db: &Database, cipher: &CredentialCipher, mock_exchange: bool) -> Result<Option<Arc<dyn Exchange>>> {
    if mock_exchange {
        return Ok(Some(Arc::new(PerpExchangeClient::mock())));
    }
    let cred = match db.get_active_credential().await? {
        Some(c) => c,
        None => return Ok(None),
    };
    let private_key = cipher.decrypt(&cred.private_key_encrypted)?;
    Ok(Some(Arc::new(PerpExchangeClient::new(cred.exchange_host, private_key, cred.api_key_index, cred.account_index))))
}
