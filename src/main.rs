//! MDS Scalper - Multi-timeframe score-based options scalper for Indian
//! index derivatives.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use mds_scalper::adapters::{SimBroker, SimFeed, SimMarket};
use mds_scalper::application::Engine;
use mds_scalper::config::{load_config, Config, Settings};
use mds_scalper::domain::index_spec;
use mds_scalper::ports::{BrokerPort, JsonlTradeStore, MarketDataPort, TradeStore};

#[derive(Parser)]
#[command(name = "mds-scalper", about = "Score-based intraday options scalper")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Log at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading engine
    Run {
        /// Force paper mode regardless of the config
        #[arg(long)]
        paper: bool,
        /// Force live mode regardless of the config
        #[arg(long)]
        live: bool,
    },
    /// Validate the configuration and print the resolved parameters
    Check,
    /// Summarize today's trades from the journal
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets live in .env, never in config.toml.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_logging(&config, cli.verbose, cli.debug)?;

    match cli.command {
        Command::Run { paper, live } => run_command(config, paper, live).await,
        Command::Check => check_command(&config),
        Command::Status => status_command(&config).await,
    }
}

fn init_logging(config: &Config, verbose: bool, debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()))
    };

    if config.logging.log_to_file {
        if let Some(parent) = PathBuf::from(&config.logging.log_file).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&config.logging.log_file)
            .with_context(|| format!("Failed to open log file {}", config.logging.log_file))?;
        fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run_command(mut config: Config, paper: bool, live: bool) -> Result<()> {
    if paper && live {
        bail!("--paper and --live are mutually exclusive");
    }
    if paper {
        config.engine.mode = "paper".to_string();
    }
    if live {
        config.engine.mode = "live".to_string();
    }

    if !config.is_paper() {
        // The vendor order/data API is not part of this build.
        if config.broker.get_access_token().is_none() {
            bail!("live mode requires BROKER_ACCESS_TOKEN in the environment");
        }
        bail!("no live broker adapter is wired in this build; run with --paper");
    }

    let spec = index_spec(&config.engine.selected_index);
    tracing::info!(
        "Starting engine: {} @ {} candles, mode={}",
        spec.display_name,
        mds_scalper::domain::hours::format_timeframe(config.engine.candle_interval_seconds),
        config.engine.mode
    );

    if let Some(parent) = PathBuf::from(&config.broker.journal_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let seed = chrono::Utc::now().timestamp() as u64;
    tracing::info!("Paper session seed: {}", seed);
    let market = SimMarket::new(sim_start_price(&config.engine.selected_index), 3.0, seed);
    let broker: Arc<dyn BrokerPort> = Arc::new(SimBroker::new(Arc::clone(&market)));
    let feed: Arc<dyn MarketDataPort> = Arc::new(SimFeed::new(market));
    let store: Arc<dyn TradeStore> =
        Arc::new(JsonlTradeStore::new(config.broker.journal_path.clone()));

    let settings = Settings::new(config);
    let engine = Arc::new(Engine::new(settings, broker, feed, store)?);

    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("[EVENT] {:?}", event);
        }
    });

    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested, squaring off");
    engine.stop().await;
    runner.abort();

    let status = engine.status().await;
    tracing::info!(
        "Session done: trades={} pnl={:.2} max_drawdown={:.2}",
        status.daily_trades,
        status.daily_pnl,
        status.max_drawdown
    );
    Ok(())
}

fn check_command(config: &Config) -> Result<()> {
    let spec = index_spec(&config.engine.selected_index);
    println!("Configuration OK");
    println!(
        "  index:            {} (lot {}, strike step {})",
        spec.display_name, spec.lot_size, spec.strike_interval
    );
    println!("  mode:             {}", config.engine.mode);
    println!(
        "  candle interval:  {}s",
        config.engine.candle_interval_seconds
    );
    println!("  thresholds:       {:?}", config.threshold_profile());
    println!("  confirm needed:   {}", config.confirm_needed());
    println!(
        "  target/stop:      +{} / -{}",
        config.risk.target_points, config.risk.initial_stoploss
    );
    println!(
        "  trailing:         start {} step {}",
        config.risk.trail_start_profit, config.risk.trail_step
    );
    println!(
        "  daily limits:     {} trades, max loss {}",
        config.risk.max_trades_per_day, config.risk.daily_max_loss
    );
    println!("  journal:          {}", config.broker.journal_path);
    Ok(())
}

async fn status_command(config: &Config) -> Result<()> {
    let content = match tokio::fs::read_to_string(&config.broker.journal_path).await {
        Ok(content) => content,
        Err(_) => {
            println!("No journal at {}", config.broker.journal_path);
            return Ok(());
        }
    };

    let today = chrono::Utc::now().date_naive();
    let mut opened = 0u32;
    let mut closed = 0u32;
    let mut pnl = 0.0f64;
    for line in content.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let time_field = if value["status"] == "OPEN" {
            "entry_time"
        } else {
            "exit_time"
        };
        let is_today = value[time_field]
            .as_str()
            .and_then(|t| t.parse::<chrono::DateTime<chrono::Utc>>().ok())
            .map(|t| t.date_naive() == today)
            .unwrap_or(false);
        if !is_today {
            continue;
        }
        match value["status"].as_str() {
            Some("OPEN") => opened += 1,
            Some("CLOSED") => {
                closed += 1;
                pnl += value["pnl"].as_f64().unwrap_or(0.0);
            }
            _ => {}
        }
    }

    println!("Journal: {}", config.broker.journal_path);
    println!("  trades opened today: {}", opened);
    println!("  trades closed today: {}", closed);
    println!("  realized pnl today:  {:.2}", pnl);
    Ok(())
}

fn sim_start_price(index_name: &str) -> f64 {
    match index_spec(index_name).name {
        "BANKNIFTY" => 52000.0,
        "SENSEX" => 81000.0,
        "FINNIFTY" => 23500.0,
        _ => 24500.0,
    }
}
