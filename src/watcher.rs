//! Timed price sampling for one market.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::client::ResilientMarketClient;
use crate::error::{ClientError, ClientResult};
use crate::provider::MarketDataProvider;
use crate::types::{Market, PriceSample};

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Total time to watch a market before analyzing
    pub duration: Duration,
    /// Time between price probes
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(300),
            interval: Duration::from_secs(10),
        }
    }
}

/// Append-only sample buffer holding at most `max_age` of history
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<PriceSample>,
    max_age: Duration,
}

impl SampleWindow {
    pub fn new(max_age: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            max_age,
        }
    }

    pub fn push(&mut self, sample: PriceSample) {
        self.samples.push_back(sample);
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = sample.timestamp - max_age;
        while matches!(self.samples.front(), Some(s) if s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_vec(self) -> Vec<PriceSample> {
        self.samples.into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Completed(Vec<PriceSample>),
    /// Shutdown arrived mid-watch; holds what was collected so far
    Cancelled(Vec<PriceSample>),
}

/// Resolves once `shutdown` reads true. A dropped sender never resolves.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Probe `market` every `interval` for `duration`, collecting one sample per
/// outcome token per probe.
///
/// Every probe is a fresh read. When the provider is unavailable and stale
/// prices are allowed, the probe is skipped instead of failing the watch.
pub async fn watch_market<P: MarketDataProvider>(
    client: &ResilientMarketClient<P>,
    market: &Market,
    config: &WatchConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> ClientResult<WatchOutcome> {
    let start = Instant::now();
    let wall_start = Utc::now();
    let deadline = start + config.duration;
    let mut window = SampleWindow::new(config.duration);
    let mut next_probe = start;

    info!(
        "Watching {} for {:?} (every {:?})",
        market.question, config.duration, config.interval
    );

    loop {
        if *shutdown.borrow() {
            return Ok(WatchOutcome::Cancelled(window.into_vec()));
        }

        let probe = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                return Ok(WatchOutcome::Cancelled(window.into_vec()));
            }
            probe = client.refresh_prices(&market.id) => probe,
        };

        match probe {
            Ok(prices) => {
                let timestamp = wall_clock(wall_start, start);
                for token in &prices {
                    if let Some(outcome) = token.outcome() {
                        window.push(PriceSample {
                            timestamp,
                            outcome,
                            price: token.price,
                        });
                    }
                }
                debug!(
                    "{} sample {}: {:?}",
                    market.id,
                    window.len(),
                    prices.iter().map(|p| (&p.label, p.price)).collect::<Vec<_>>()
                );
            }
            Err(ClientError::ProviderUnavailable { reason }) if client.allows_stale() => {
                warn!("Skipping probe for {}: {}", market.id, reason);
            }
            Err(e) => return Err(e),
        }

        next_probe += config.interval;
        if next_probe >= deadline {
            break;
        }

        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                return Ok(WatchOutcome::Cancelled(window.into_vec()));
            }
            _ = sleep_until(next_probe) => {}
        }
    }

    info!("Finished watching {}: {} samples", market.id, window.len());
    Ok(WatchOutcome::Completed(window.into_vec()))
}

/// Wall-clock time derived from the monotonic clock so samples stay evenly
/// spaced even if the system clock jumps
fn wall_clock(wall_start: DateTime<Utc>, start: Instant) -> DateTime<Utc> {
    wall_start + chrono::Duration::from_std(start.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}
