//! Trading cycle orchestration.
//!
//! One cycle: discover the best market for the requested assets, watch it,
//! analyze the samples, ask the risk gate, and submit at most one order.
//! Cycles for different assets run concurrently and share the client, the
//! gate and the executor.

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::analyzer::DirectionAnalyzer;
use crate::client::ResilientMarketClient;
use crate::error::CycleError;
use crate::execution::OrderExecutor;
use crate::market::MarketDiscovery;
use crate::provider::MarketDataProvider;
use crate::risk::{Decision, RiskGate, SkipReason};
use crate::trade_db::{TradeJournal, TradeRecord, TradeStatus};
use crate::types::{Market, OrderRequest, OrderResult, PriceSample, TradeSignal};
use crate::watcher::{watch_market, WatchConfig, WatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Discovering,
    Watching,
    Analyzing,
    Deciding,
    Executing,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Executed {
        signal: TradeSignal,
        amount: Decimal,
        order: OrderResult,
    },
    Failed(CycleError),
}

impl CycleOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, CycleOutcome::Executed { .. })
    }
}

/// Phases a cycle went through, ending in Idle
#[derive(Debug, Default)]
struct PhaseTrace(Vec<CyclePhase>);

impl PhaseTrace {
    fn enter(&mut self, phase: CyclePhase) {
        self.0.push(phase);
    }

    fn finish(mut self, outcome: CycleOutcome) -> (CycleOutcome, Vec<CyclePhase>) {
        if matches!(outcome, CycleOutcome::Skipped(_)) {
            self.0.push(CyclePhase::Skipped);
        }
        self.0.push(CyclePhase::Idle);
        (outcome, self.0)
    }
}

pub struct TradingCycle<P> {
    client: Arc<ResilientMarketClient<P>>,
    discovery: Arc<MarketDiscovery>,
    analyzer: Arc<DirectionAnalyzer>,
    gate: RiskGate,
    executor: Arc<dyn OrderExecutor>,
    watch: WatchConfig,
    shutdown: watch::Receiver<bool>,
    journal: Option<Arc<TradeJournal>>,
}

impl<P> Clone for TradingCycle<P> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            discovery: Arc::clone(&self.discovery),
            analyzer: Arc::clone(&self.analyzer),
            gate: self.gate.clone(),
            executor: Arc::clone(&self.executor),
            watch: self.watch.clone(),
            shutdown: self.shutdown.clone(),
            journal: self.journal.clone(),
        }
    }
}

impl<P: MarketDataProvider> TradingCycle<P> {
    pub fn new(
        client: Arc<ResilientMarketClient<P>>,
        discovery: MarketDiscovery,
        analyzer: DirectionAnalyzer,
        gate: RiskGate,
        executor: Arc<dyn OrderExecutor>,
        watch: WatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            discovery: Arc::new(discovery),
            analyzer: Arc::new(analyzer),
            gate,
            executor,
            watch,
            shutdown,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn gate(&self) -> &RiskGate {
        &self.gate
    }

    pub fn client(&self) -> &Arc<ResilientMarketClient<P>> {
        &self.client
    }

    /// Run one cycle over the given assets (all configured assets if empty)
    pub async fn run_cycle(&self, assets: &[String]) -> CycleOutcome {
        self.run_cycle_traced(assets).await.0
    }

    /// Like `run_cycle`, also returning the phases passed through
    pub async fn run_cycle_traced(&self, assets: &[String]) -> (CycleOutcome, Vec<CyclePhase>) {
        let mut trace = PhaseTrace::default();

        trace.enter(CyclePhase::Discovering);
        let found = match self.discovery.discover(self.client.as_ref(), assets).await {
            Ok(found) => found,
            Err(e) => {
                error!("Discovery failed: {}", e);
                return trace.finish(CycleOutcome::Failed(e.into()));
            }
        };
        let market = match found.into_iter().next() {
            Some(d) => d.market,
            None => {
                info!("No qualifying market for {:?}", assets);
                return trace.finish(CycleOutcome::Skipped(SkipReason::NoMarket));
            }
        };

        trace.enter(CyclePhase::Watching);
        let mut shutdown = self.shutdown.clone();
        let samples = match watch_market(self.client.as_ref(), &market, &self.watch, &mut shutdown).await {
            Ok(WatchOutcome::Completed(samples)) => samples,
            Ok(WatchOutcome::Cancelled(samples)) => {
                info!("Watch of {} cancelled after {} samples", market.id, samples.len());
                return trace.finish(CycleOutcome::Skipped(SkipReason::Cancelled));
            }
            Err(e) => {
                error!("Watching {} failed: {}", market.id, e);
                return trace.finish(CycleOutcome::Failed(e.into()));
            }
        };

        trace.enter(CyclePhase::Analyzing);
        let signal = self.analyzer.analyze(&market.id, &samples);
        info!(
            "{}: {} p={:.3} vol={:.4} mom={:.4} ({} samples)",
            market.question,
            signal.direction,
            signal.probability,
            signal.volatility,
            signal.momentum,
            signal.sample_count
        );

        trace.enter(CyclePhase::Deciding);
        if *self.shutdown.borrow() {
            return trace.finish(CycleOutcome::Skipped(SkipReason::Cancelled));
        }
        let reservation = match self.gate.decide(&signal) {
            Decision::Authorized(reservation) => reservation,
            Decision::Skipped(reason) => return trace.finish(CycleOutcome::Skipped(reason)),
        };

        trace.enter(CyclePhase::Executing);
        let order = match build_order(&market, &signal, &samples, reservation.amount()) {
            Some(order) => order,
            None => {
                warn!("{} has no token for {}", market.id, signal.direction);
                reservation.rollback();
                return trace.finish(CycleOutcome::Skipped(SkipReason::NoMarket));
            }
        };

        let outcome = match self.executor.submit(&order).await {
            Ok(result) => {
                reservation.confirm();
                self.record(&market, &signal, &order, Ok(&result)).await;
                info!(
                    "Executed {} ${} on {} @ {} (order {})",
                    signal.direction, order.amount, market.id, order.price, result.order_id
                );
                CycleOutcome::Executed {
                    amount: order.amount,
                    signal,
                    order: result,
                }
            }
            Err(e) => {
                reservation.rollback();
                self.record(&market, &signal, &order, Err(e.to_string())).await;
                error!("Order for {} failed: {}", market.id, e);
                CycleOutcome::Failed(CycleError::ExecutionFailed(e))
            }
        };
        trace.finish(outcome)
    }

    /// One independent cycle per asset, run concurrently. The market list is
    /// fetched once up front so the cycles share one remote call.
    pub async fn run_concurrent(&self, assets: &[String]) -> Vec<(String, CycleOutcome)> {
        if assets.is_empty() {
            return Vec::new();
        }
        if let Err(e) = self.client.list_markets_or_stale().await {
            error!("Market list unavailable: {}", e);
            return assets
                .iter()
                .map(|asset| (asset.clone(), CycleOutcome::Failed(e.clone().into())))
                .collect();
        }

        let cycles = assets.iter().map(|asset| {
            let cycle = self.clone();
            let asset = asset.clone();
            async move {
                let outcome = cycle.run_cycle(std::slice::from_ref(&asset)).await;
                (asset, outcome)
            }
        });
        join_all(cycles).await
    }

    /// Journal writes run on the blocking pool
    async fn record(
        &self,
        market: &Market,
        signal: &TradeSignal,
        order: &OrderRequest,
        result: Result<&OrderResult, String>,
    ) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        let (status, order_id, error) = match result {
            Ok(r) => (TradeStatus::Confirmed, Some(r.order_id.clone()), None),
            Err(e) => (TradeStatus::Failed, None, Some(e)),
        };
        let record = TradeRecord {
            timestamp: Utc::now(),
            market_id: market.id.clone(),
            market_title: market.question.clone(),
            direction: signal.direction,
            amount: order.amount,
            price: order.price,
            probability: signal.probability,
            status,
            order_id,
            error,
            is_dry_run: !self.executor.is_live(),
        };
        match tokio::task::spawn_blocking(move || journal.insert_trade(&record)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to journal trade: {:#}", e),
            Err(e) => warn!("Journal task failed: {}", e),
        }
    }
}

/// Order for the signalled side, priced at the last observed sample of that
/// side or the market's listed price
fn build_order(
    market: &Market,
    signal: &TradeSignal,
    samples: &[PriceSample],
    amount: Decimal,
) -> Option<OrderRequest> {
    let outcome = signal.direction.outcome()?;
    let token = market.token(outcome)?;
    let price = samples
        .iter()
        .rev()
        .find(|s| s.outcome == outcome)
        .map(|s| s.price)
        .unwrap_or(token.price);

    Some(OrderRequest {
        market_id: market.id.clone(),
        token_id: token.token_id.clone(),
        outcome,
        amount,
        price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerConfig;
    use crate::cache::CacheConfig;
    use crate::connection::ConnectionConfig;
    use crate::error::{ClientError, ExecutionError, ProviderError};
    use crate::market::DiscoveryConfig;
    use crate::retry::RetryPolicy;
    use crate::risk::RiskConfig;
    use crate::testkit::{btc_market, market, PriceSource, RecordingExecutor, ScriptedProvider};
    use crate::types::{Direction, Outcome};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        cycle: TradingCycle<ScriptedProvider>,
        executor: Arc<RecordingExecutor>,
        shutdown: watch::Sender<bool>,
    }

    fn harness(provider: ScriptedProvider, executor: Arc<RecordingExecutor>) -> Harness {
        let client = Arc::new(ResilientMarketClient::new(
            provider,
            RetryPolicy {
                base_delay: Duration::from_millis(100),
                ..RetryPolicy::default()
            },
            ConnectionConfig::default(),
            CacheConfig::default(),
        ));
        let (tx, rx) = watch::channel(false);
        let cycle = TradingCycle::new(
            client,
            MarketDiscovery::new(DiscoveryConfig::default()),
            DirectionAnalyzer::new(AnalyzerConfig::default()),
            RiskGate::new(&RiskConfig::default()),
            executor.clone(),
            WatchConfig {
                duration: Duration::from_secs(60),
                interval: Duration::from_secs(10),
            },
            rx,
        );
        Harness {
            cycle,
            executor,
            shutdown: tx,
        }
    }

    /// UP climbs 0.01 per probe from 0.60: a strong UP trend
    fn rising(markets: Vec<Market>) -> ScriptedProvider {
        ScriptedProvider::new(markets).with_prices(PriceSource::Ramp {
            start: dec!(0.60),
            step: dec!(0.01),
        })
    }

    fn btc() -> Vec<String> {
        vec!["BTC".to_string()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_rising_market_executes_up_order() {
        let h = harness(rising(vec![btc_market("m1")]), Arc::new(RecordingExecutor::default()));

        let (outcome, phases) = h.cycle.run_cycle_traced(&btc()).await;

        match &outcome {
            CycleOutcome::Executed { signal, amount, order } => {
                assert_eq!(signal.direction, Direction::Up);
                assert!(signal.probability >= 0.7);
                assert_eq!(*amount, dec!(0.8));
                assert_eq!(order.price, dec!(0.65));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            phases,
            vec![
                CyclePhase::Discovering,
                CyclePhase::Watching,
                CyclePhase::Analyzing,
                CyclePhase::Deciding,
                CyclePhase::Executing,
                CyclePhase::Idle,
            ]
        );

        let submitted = h.executor.submitted.lock();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].outcome, Outcome::Up);
        assert_eq!(submitted[0].token_id, "up-token");
        drop(submitted);
        assert_eq!(h.cycle.gate().committed(), dec!(0.8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_market_skips_neutral() {
        let h = harness(
            ScriptedProvider::new(vec![btc_market("m1")]),
            Arc::new(RecordingExecutor::default()),
        );

        let (outcome, phases) = h.cycle.run_cycle_traced(&btc()).await;
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NeutralSignal));
        assert_eq!(phases.last(), Some(&CyclePhase::Idle));
        assert!(phases.contains(&CyclePhase::Skipped));
        assert_eq!(h.executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_market_for_asset() {
        let h = harness(
            rising(vec![market("x", "Will it rain?", dec!(1), dec!(1))]),
            Arc::new(RecordingExecutor::default()),
        );
        assert_eq!(
            h.cycle.run_cycle(&btc()).await,
            CycleOutcome::Skipped(SkipReason::NoMarket)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_execution_rolls_back_and_is_journaled() {
        let journal = Arc::new(TradeJournal::open_in_memory().unwrap());
        let h = harness(rising(vec![btc_market("m1")]), RecordingExecutor::failing());
        let cycle = h.cycle.clone().with_journal(journal.clone());
        let before = cycle.gate().snapshot();

        let outcome = cycle.run_cycle(&btc()).await;

        assert_eq!(
            outcome,
            CycleOutcome::Failed(CycleError::ExecutionFailed(ExecutionError::Rejected(
                "not enough balance".to_string()
            )))
        );
        assert_eq!(h.executor.count(), 1);
        assert_eq!(cycle.gate().snapshot(), before);

        let summary = journal
            .summary_since(Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.failed_trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_provider_fails_without_trading() {
        let provider = rising(vec![btc_market("m1")]);
        provider
            .markets
            .set_fallback(Err(ProviderError::Transient("down".to_string())));
        let h = harness(provider, Arc::new(RecordingExecutor::default()));

        match h.cycle.run_cycle(&btc()).await {
            CycleOutcome::Failed(CycleError::Client(ClientError::ProviderUnavailable { .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_watch_is_cancelled_with_no_debit() {
        let h = harness(rising(vec![btc_market("m1")]), Arc::new(RecordingExecutor::default()));
        let shutdown = h.shutdown;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            let _ = shutdown.send(true);
        });

        let outcome = h.cycle.run_cycle(&btc()).await;
        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Cancelled));
        assert_eq!(h.cycle.gate().committed(), Decimal::ZERO);
        assert_eq!(h.executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_share_the_ledger() {
        let markets = vec![
            btc_market("btc-1"),
            market("eth-1", "Ethereum Up or Down - 15 minute", dec!(500), dec!(10)),
        ];
        let h = harness(rising(markets), Arc::new(RecordingExecutor::default()));

        let results = h
            .cycle
            .run_concurrent(&["BTC".to_string(), "ETH".to_string()])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, o)| o.is_executed()));
        let mut traded: Vec<String> = h
            .executor
            .submitted
            .lock()
            .iter()
            .map(|o| o.market_id.clone())
            .collect();
        traded.sort();
        assert_eq!(traded, vec!["btc-1", "eth-1"]);
        assert_eq!(h.cycle.gate().committed(), dec!(1.6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_fetch_market_list_once() {
        let markets = vec![
            btc_market("btc-1"),
            market("eth-1", "Ethereum Up or Down - 15 minute", dec!(500), dec!(10)),
            market("sol-1", "Solana Up or Down - 15 minute", dec!(300), dec!(10)),
        ];
        let h = harness(rising(markets), Arc::new(RecordingExecutor::default()));

        let assets: Vec<String> = ["BTC", "ETH", "SOL"].iter().map(|a| a.to_string()).collect();
        let results = h.cycle.run_concurrent(&assets).await;

        assert_eq!(results.len(), 3);
        assert_eq!(h.cycle.client().provider().markets.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_cycles_fail_together_when_list_unavailable() {
        let provider = rising(vec![btc_market("m1")]);
        provider
            .markets
            .set_fallback(Err(ProviderError::Transient("down".to_string())));
        let h = harness(provider, Arc::new(RecordingExecutor::default()));

        let results = h
            .cycle
            .run_concurrent(&["BTC".to_string(), "ETH".to_string()])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|(_, o)| matches!(o, CycleOutcome::Failed(CycleError::Client(_)))));
        assert_eq!(h.cycle.client().provider().markets.calls(), 3);
        assert_eq!(h.executor.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_trade_is_journaled() {
        let journal = Arc::new(TradeJournal::open_in_memory().unwrap());
        let h = harness(rising(vec![btc_market("m1")]), Arc::new(RecordingExecutor::default()));
        let cycle = h.cycle.clone().with_journal(journal.clone());

        assert!(cycle.run_cycle(&btc()).await.is_executed());

        let since = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(journal.committed_since(since, true).unwrap(), dec!(0.8));
        assert_eq!(journal.committed_since(since, false).unwrap(), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_skips() {
        let h = harness(rising(vec![btc_market("m1")]), Arc::new(RecordingExecutor::default()));
        h.cycle.gate().seed_committed(dec!(4.5));

        assert_eq!(
            h.cycle.run_cycle(&btc()).await,
            CycleOutcome::Skipped(SkipReason::InsufficientBudget)
        );
        assert_eq!(h.executor.count(), 0);
    }
}
