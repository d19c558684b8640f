//! Spread Scanner
//!
//! Reads pool account updates (NDJSON, file or stdin), reconciles them into
//! snapshots, detects cross-pool spreads and logs execution candidates.
//!
//! Supports hot-reloading of detector and tracker thresholds via SIGHUP:
//!   kill -HUP $(pgrep spread-scanner)
//!
//! Usage:
//!   spread-scanner --config config/spread.toml --updates feed.jsonl
//!   tail -f feed.jsonl | spread-scanner --config config/spread.toml

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use rust_decimal::Decimal;
use signal_hook::consts::SIGHUP;
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use dexarb_spread::arbitrage::{OpportunityTracker, SpreadDetector, TradeSizeOptimizer};
use dexarb_spread::config::{LoggingConfig, SpreadConfig};
use dexarb_spread::engine::{CandidateLogExecutor, Engine, JsonLinesCollector, Pipeline, Thresholds};
use dexarb_spread::oracle::{CachedPriceOracle, PriceOracle, PythHermesSource};
use dexarb_spread::pool::PoolStateReconciler;
use dexarb_spread::spread_logger::SpreadLogger;

/// Cross-pool AMM spread scanner
#[derive(Parser)]
#[command(name = "spread-scanner")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SPREAD_CONFIG", default_value = "config/spread.toml")]
    config: PathBuf,

    /// NDJSON update feed (stdin when omitted)
    #[arg(short, long, env = "SPREAD_UPDATES")]
    updates: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = SpreadConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    init_logging(&config.logging);

    info!("===========================================");
    info!("   Cross-Pool Spread Scanner");
    info!("===========================================");
    info!("Config file: {}", args.config.display());

    // Pool catalog
    let reconciler = PoolStateReconciler::new();
    for meta in config.pool_metadata()? {
        info!(
            "Monitoring {} {} ({}/{}, fee {})",
            meta.curve_type,
            meta.address,
            meta.base_mint,
            meta.quote_mint,
            meta.fee
        );
        reconciler.register_pool(meta);
    }
    info!("Registered {} pools", reconciler.pool_count());

    // Reference price oracle
    let oracle = Arc::new(match config.oracle.fallback_price.and_then(Decimal::from_f64_retain) {
        Some(price) => CachedPriceOracle::with_initial_price(price),
        None => CachedPriceOracle::new(),
    });
    let oracle_task = if config.oracle.enabled {
        let source = PythHermesSource::new(
            &config.oracle.endpoint,
            &config.oracle.feed_id,
            Duration::from_secs(config.oracle.timeout_secs),
        )?;
        Some(Arc::clone(&oracle).spawn_refresh(Arc::new(source), Duration::from_secs(config.oracle.refresh_secs)))
    } else {
        info!("Price oracle disabled, execution cost uses ${}", oracle.current_price());
        None
    };

    let oracle: Arc<dyn PriceOracle> = oracle;
    let detector = SpreadDetector::new(
        config.detector.clone(),
        config.execution_cost,
        TradeSizeOptimizer::new(config.optimizer),
        oracle,
    );
    let pipeline = Pipeline::new(reconciler, detector, OpportunityTracker::new(config.tracker.clone()))
        .with_spread_logger(SpreadLogger::new(&config.logging.spread_log_dir))
        .with_retention_slots(config.reconciler.retention_slots);

    let mut engine = Engine::new()
        .with_update_channel_capacity(config.engine.update_channel_capacity)
        .with_candidate_channel_capacity(config.engine.candidate_channel_capacity)
        .with_maintenance_interval(Duration::from_secs(config.engine.maintenance_interval_secs));

    match &args.updates {
        Some(path) => engine.add_collector(Box::new(JsonLinesCollector::from_file(path))),
        None => engine.add_collector(Box::new(JsonLinesCollector::from_stdin())),
    }
    engine.add_executor(Box::new(CandidateLogExecutor::new(&config.logging.candidate_log)?));

    // SIGHUP re-reads the config and sends new thresholds to the dispatcher
    let (reload_tx, reload_rx) = mpsc::channel::<Thresholds>(4);
    let mut signals = Signals::new([SIGHUP])?;
    let signals_handle = signals.handle();
    let config_path = args.config.clone();
    let signal_task = tokio::spawn(async move {
        while let Some(sig) = signals.next().await {
            if sig != SIGHUP {
                continue;
            }
            info!("Received SIGHUP - reloading {}", config_path.display());
            match SpreadConfig::load(&config_path) {
                Ok(new_config) => {
                    if reload_tx.send(Thresholds::from(&new_config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Config reload failed, keeping current thresholds: {:#}", e),
            }
        }
    });

    let mut set = engine.run(pipeline, reload_rx).await?;
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            error!("Task failed: {}", e);
        }
    }

    signals_handle.close();
    signal_task.abort();
    if let Some(task) = oracle_task {
        task.abort();
    }

    info!("Update feed exhausted, shutting down");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}
