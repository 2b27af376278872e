use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use updown_bot::analyzer::DirectionAnalyzer;
use updown_bot::client::ResilientMarketClient;
use updown_bot::config::Config;
use updown_bot::cycle::{CycleOutcome, TradingCycle};
use updown_bot::execution::{DryRunExecutor, OrderExecutor};
use updown_bot::health::spawn_health_monitor;
use updown_bot::market::{next_window_start, MarketDiscovery};
use updown_bot::provider::GammaProvider;
use updown_bot::risk::RiskGate;
use updown_bot::trade_db::TradeJournal;
use updown_bot::watcher::wait_for_shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run one trading cycle and exit
    Single,
    /// Run a cycle every market window until Ctrl-C
    Continuous,
}

/// Polymarket 15-min Up/Down trading bot
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Single)]
    mode: Mode,

    /// Simulated trades only (forces DRY_RUN)
    #[arg(long)]
    test: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Env file to load before .env
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Assets to trade, e.g. BTC,ETH (defaults to TARGET_ASSETS)
    #[arg(long, value_delimiter = ',')]
    assets: Vec<String>,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
    }
    // CLI flags win over the environment
    if cli.test {
        std::env::set_var("DRY_RUN", "true");
    }
    if cli.verbose {
        std::env::set_var("LOG_LEVEL", "debug");
    }
    if !cli.assets.is_empty() {
        std::env::set_var("TARGET_ASSETS", cli.assets.join(","));
    }

    let config = Config::from_env()?;

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(match config.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("╔═══════════════════════════════════════╗");
    info!("║     15-Min Up/Down Market Bot         ║");
    info!("╠═══════════════════════════════════════╣");
    info!("║ Mode: {:31} ║", if config.dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
    info!("║ Run: {:32} ║", format!("{:?}", cli.mode));
    info!("║ Assets: {:29} ║", config.discovery.assets.join(","));
    info!("║ Daily limit: ${:23} ║", config.risk.daily_limit);
    info!("║ Per trade: ${:25} ║", config.risk.per_trade_amount);
    info!("║ Threshold: {:26} ║", config.risk.probability_threshold);
    info!("╚═══════════════════════════════════════╝");

    let provider = GammaProvider::new(&config.gamma_url, REQUEST_TIMEOUT)?;
    let client = Arc::new(
        ResilientMarketClient::new(
            provider,
            config.retry.clone(),
            config.connection.clone(),
            config.cache.clone(),
        )
        .with_stale_fallback(config.allow_stale_prices),
    );

    // Live orders need an EIP-712 signer (`ClobExecutor` + `OrderSigner`),
    // which the wallet integration provides; this binary has none.
    if !config.dry_run {
        anyhow::bail!("Live trading needs an order signer, none is configured; run with DRY_RUN=true");
    }
    let executor: Arc<dyn OrderExecutor> = Arc::new(DryRunExecutor);

    let journal = Arc::new(TradeJournal::open(&config.trade_db_path)?);

    let gate = RiskGate::new(&config.risk);
    let committed_today = journal.committed_since(start_of_day(Utc::now()), config.dry_run)?;
    if !committed_today.is_zero() {
        info!("Already committed ${} today", committed_today);
        gate.seed_committed(committed_today);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    if client.probe().await {
        info!("Gamma API reachable");
    } else {
        warn!("Gamma API health check failed, continuing with retries");
    }

    let cycle = TradingCycle::new(
        client.clone(),
        MarketDiscovery::new(config.discovery.clone()),
        DirectionAnalyzer::new(config.analyzer.clone()),
        gate,
        executor,
        config.watch.clone(),
        shutdown_rx.clone(),
    )
    .with_journal(journal.clone());

    let session_start = Utc::now();
    let assets = config.discovery.assets.clone();

    match cli.mode {
        Mode::Single => {
            let results = cycle.run_concurrent(&assets).await;
            log_results(&results);
        }
        Mode::Continuous => {
            let health = spawn_health_monitor(client.clone(), config.health.clone(), shutdown_rx.clone());
            run_continuous(&cycle, &assets, config.discovery.duration_minutes, shutdown_rx).await;
            if let Err(e) = health.await {
                warn!("Health monitor ended abnormally: {}", e);
            }
        }
    }

    let summary = journal.summary_since(session_start)?;
    let stats = client.stats();
    info!("═══════════════ SESSION SUMMARY ═══════════════");
    info!("Trades: {} ({} UP / {} DOWN, {} failed)", summary.total_trades, summary.up_trades, summary.down_trades, summary.failed_trades);
    info!("Total amount: ${}", summary.total_amount);
    info!("Average probability: {:.3}", summary.avg_probability);
    if let Some(last) = summary.last_trade {
        info!("Last trade: {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    info!("Committed today: ${} / ${}", cycle.gate().committed(), config.risk.daily_limit);
    info!(
        "API: {} remote calls, {} cache hits, connection {:?}",
        stats.remote_calls, stats.cache_hits, stats.state
    );

    Ok(())
}

/// One cycle per market window until shutdown. The ledger resets at UTC
/// midnight.
async fn run_continuous<P>(
    cycle: &TradingCycle<P>,
    assets: &[String],
    window_minutes: u32,
    mut shutdown: watch::Receiver<bool>,
) where
    P: updown_bot::provider::MarketDataProvider,
{
    let mut day = Utc::now().date_naive();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let today = Utc::now().date_naive();
        if today != day {
            cycle.gate().reset_period();
            day = today;
        }

        info!("Starting trading cycle at {}", Utc::now().format("%H:%M:%S"));
        let results = cycle.run_concurrent(assets).await;
        log_results(&results);

        if *shutdown.borrow() {
            break;
        }

        let now = Utc::now();
        let next = next_window_start(now, window_minutes);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!("Next cycle at {} (in {}s)", next.format("%H:%M:%S"), wait.as_secs());

        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

fn log_results(results: &[(String, CycleOutcome)]) {
    for (asset, outcome) in results {
        match outcome {
            CycleOutcome::Executed { signal, amount, order } => info!(
                "{}: bought ${} {} @ {} (p={:.3}, order {})",
                asset, amount, signal.direction, order.price, signal.probability, order.order_id
            ),
            CycleOutcome::Skipped(reason) => info!("{}: skipped ({})", asset, reason),
            CycleOutcome::Failed(e) => error!("{}: cycle failed: {}", asset, e),
        }
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(now)
}
