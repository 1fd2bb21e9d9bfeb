//! Ginie — autonomous futures trading core, CLI entry point.

use std::env;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;

use ginie::blocklist::{BlockedSymbolRegistry, BlocklistConfig};
use ginie::circuit_breaker::CircuitBreaker;
use ginie::config;
use ginie::exchange::bybit::BybitExchange;
use ginie::exchange::Exchange;
use ginie::instance::InstanceControl;
use ginie::mode::ModePolicyTable;
use ginie::position::PositionManager;
use ginie::precision::PrecisionCache;
use ginie::scheduler::{Scheduler, SchedulerConfig};
use ginie::store::{InMemoryStore, Store};

#[derive(Parser)]
#[clap(author, version, about = "Autonomous futures trading core", long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading core against a live exchange.
    Run {
        /// Comma-separated symbol watchlist.
        #[clap(long, default_value = "BTCUSDT,ETHUSDT,SOLUSDT")]
        symbols: String,

        /// Use the Bybit testnet endpoints.
        #[clap(long)]
        testnet: bool,

        /// Capital allocated per new position, in quote currency.
        #[clap(long, default_value = "25.0")]
        capital: f64,

        /// Leverage applied to new positions.
        #[clap(long, default_value = "5.0")]
        leverage: f64,

        /// Path to the settings file.
        #[clap(long, default_value = "ginie.toml")]
        settings: String,
    },
    /// Print the current settings file, creating it with defaults if absent.
    ShowConfig {
        #[clap(long, default_value = "ginie.toml")]
        settings: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { symbols, testnet, capital, leverage, settings } => {
            run(symbols, testnet, capital, leverage, settings).await?;
        }
        Commands::ShowConfig { settings } => {
            let path = std::path::Path::new(&settings);
            let loaded = config::load(path).await?;
            println!("{}", toml::to_string_pretty(&loaded)?);
        }
    }

    Ok(())
}

async fn run(symbols: String, testnet: bool, capital: f64, leverage: f64, settings_path: String) -> anyhow::Result<()> {
    let api_key = env::var("BYBIT_API_KEY").unwrap_or_default();
    let api_secret = env::var("BYBIT_API_SECRET").unwrap_or_default();
    if api_key.is_empty() || api_secret.is_empty() {
        error!("BYBIT_API_KEY / BYBIT_API_SECRET not set; exchange calls will be rejected");
    }

    let settings = config::load(std::path::Path::new(&settings_path)).await?;

    let exchange: Arc<dyn Exchange> = Arc::new(BybitExchange::new(api_key, api_secret, testnet));
    let precision = Arc::new(PrecisionCache::new());
    precision.refresh(exchange.as_ref()).await.ok();

    let circuit_breaker = Arc::new(CircuitBreaker::new(settings.circuit_breaker.clone()));
    circuit_breaker.on_trip(|reason| error!(%reason, "circuit breaker tripped"));
    circuit_breaker.on_reset(|| info!("circuit breaker reset to closed"));

    let blocklist = Arc::new(BlockedSymbolRegistry::new(BlocklistConfig::default()));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let instance_id = uuid::Uuid::new_v4().to_string();
    let instance = Arc::new(InstanceControl::new(instance_id, store.clone(), settings.instance.heartbeat_ttl_secs));
    if settings.instance.active_by_default {
        instance.try_elect().await.ok();
    }

    let settings = Arc::new(settings);
    let position_manager = Arc::new(PositionManager::new(
        exchange.clone(),
        precision.clone(),
        circuit_breaker.clone(),
        blocklist.clone(),
        instance.clone(),
        store.clone(),
        settings.clone(),
    ));

    let modes: ModePolicyTable = settings.modes.clone();
    let watchlist: Vec<String> = symbols.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();

    let scheduler = Arc::new(Scheduler::new(
        exchange.clone(),
        position_manager.clone(),
        precision.clone(),
        blocklist.clone(),
        modes,
        None,
        SchedulerConfig { watchlist, dynamic_watchlist: false, llm_weight: settings.llm.weight, default_capital: capital, default_leverage: leverage },
    ));

    let heartbeat_interval = instance.heartbeat_interval();
    let heartbeat_instance = instance.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            if heartbeat_instance.is_active() {
                let _ = heartbeat_instance.renew_heartbeat().await;
            } else {
                let _ = heartbeat_instance.try_elect().await;
            }
        }
    });

    let handles = scheduler.clone().spawn();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.shutdown();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
