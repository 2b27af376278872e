//! Periodic health prober.
//!
//! Probes the market client on a fixed interval and asks it to reconnect once
//! enough probes in a row have failed. Connection state itself is owned by the
//! client; this only drives it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::client::ResilientMarketClient;
use crate::connection::ConnectionState;
use crate::provider::MarketDataProvider;
use crate::watcher::wait_for_shutdown;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Failed probes in a row before a reconnect is attempted
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub state: ConnectionState,
    pub failed_probes: u32,
    pub reconnected: bool,
}

pub struct HealthMonitor<P> {
    client: Arc<ResilientMarketClient<P>>,
    config: HealthConfig,
    failed_probes: u32,
}

impl<P: MarketDataProvider> HealthMonitor<P> {
    pub fn new(client: Arc<ResilientMarketClient<P>>, config: HealthConfig) -> Self {
        Self {
            client,
            config,
            failed_probes: 0,
        }
    }

    pub async fn check_once(&mut self) -> HealthReport {
        if self.client.probe().await {
            if self.failed_probes > 0 {
                info!("Health check passed after {} failures", self.failed_probes);
            }
            self.failed_probes = 0;
            return HealthReport {
                healthy: true,
                state: self.client.state(),
                failed_probes: 0,
                reconnected: false,
            };
        }

        self.failed_probes += 1;
        warn!(
            "Health check failed ({}/{}), connection {:?}",
            self.failed_probes,
            self.config.failure_threshold,
            self.client.state()
        );

        let mut reconnected = false;
        if self.failed_probes >= self.config.failure_threshold {
            let state = self.client.reconnect().await;
            if state == ConnectionState::Healthy {
                self.failed_probes = 0;
                reconnected = true;
            }
        }

        HealthReport {
            healthy: reconnected,
            state: self.client.state(),
            failed_probes: self.failed_probes,
            reconnected,
        }
    }

    /// Probe every interval until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Health monitor started (every {:?})", self.config.interval);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
        info!("Health monitor stopped");
    }
}

pub fn spawn_health_monitor<P>(
    client: Arc<ResilientMarketClient<P>>,
    config: HealthConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    P: MarketDataProvider + 'static,
{
    tokio::spawn(HealthMonitor::new(client, config).run(shutdown))
}
