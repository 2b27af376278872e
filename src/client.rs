//! Resilient market client.
//!
//! Wraps a [`MarketDataProvider`] with a TTL cache, a uniform retry policy, a
//! per-call wall-clock budget and the connection state machine. Transient and
//! rate-limited failures are absorbed here; callers only ever see
//! `ClientError::Permanent` or `ClientError::ProviderUnavailable`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, TtlCache};
use crate::connection::{ConnectionConfig, ConnectionMonitor, ConnectionState, Permit};
use crate::error::{ClientError, ClientResult, ProviderError};
use crate::provider::MarketDataProvider;
use crate::retry::RetryPolicy;
use crate::types::{Market, OutcomePrice};

const MARKETS_KEY: &str = "markets";

/// Counters for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub remote_calls: u64,
    pub cache_hits: u64,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
}

pub struct ResilientMarketClient<P> {
    provider: P,
    retry: RetryPolicy,
    connection: ConnectionMonitor,
    allow_stale: bool,

    markets: TtlCache<Vec<Market>>,
    market: TtlCache<Market>,
    prices: TtlCache<Vec<OutcomePrice>>,

    remote_calls: AtomicU64,
    cache_hits: AtomicU64,
}

impl<P: MarketDataProvider> ResilientMarketClient<P> {
    pub fn new(
        provider: P,
        retry: RetryPolicy,
        connection: ConnectionConfig,
        cache: CacheConfig,
    ) -> Self {
        Self {
            provider,
            retry,
            connection: ConnectionMonitor::new(connection),
            allow_stale: false,
            markets: TtlCache::new(cache.ttl),
            market: TtlCache::new(cache.ttl),
            prices: TtlCache::new(cache.ttl),
            remote_calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Let the `*_or_stale` reads fall back to expired cache entries
    pub fn with_stale_fallback(mut self, allow: bool) -> Self {
        self.allow_stale = allow;
        self
    }

    pub fn allows_stale(&self) -> bool {
        self.allow_stale
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionMonitor {
        &self.connection
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            state: self.connection.state(),
            consecutive_failures: self.connection.consecutive_failures(),
        }
    }

    // ----- markets -----

    pub async fn list_markets(&self) -> ClientResult<Vec<Market>> {
        if let Some(markets) = self.cached(&self.markets, MARKETS_KEY) {
            return Ok(markets);
        }
        self.refresh_markets().await
    }

    /// Bypass the cache for one call and rewrite the entry
    pub async fn refresh_markets(&self) -> ClientResult<Vec<Market>> {
        let markets = self
            .call("list_markets", || self.provider.list_markets())
            .await?;

        for market in &markets {
            self.market.insert(market_key(&market.id), market.clone());
        }
        self.markets.insert(MARKETS_KEY, markets.clone());
        info!("Retrieved {} active markets", markets.len());
        Ok(markets)
    }

    pub async fn list_markets_or_stale(&self) -> ClientResult<Vec<Market>> {
        let result = self.list_markets().await;
        self.stale_fallback(result, &self.markets, MARKETS_KEY)
    }

    pub async fn get_market(&self, id: &str) -> ClientResult<Market> {
        if let Some(market) = self.cached(&self.market, &market_key(id)) {
            return Ok(market);
        }
        self.refresh_market(id).await
    }

    pub async fn refresh_market(&self, id: &str) -> ClientResult<Market> {
        let market = self
            .call("get_market", || self.provider.get_market(id))
            .await?;
        self.market.insert(market_key(id), market.clone());
        Ok(market)
    }

    /// Cache-first lookup by slug. Misses are not cached, so a window market
    /// that appears later is picked up on the next call.
    pub async fn get_market_by_slug(&self, slug: &str) -> ClientResult<Option<Market>> {
        if let Some(market) = self.cached(&self.market, &slug_key(slug)) {
            return Ok(Some(market));
        }
        let market = self
            .call("get_market_by_slug", || self.provider.get_market_by_slug(slug))
            .await?;
        if let Some(market) = &market {
            self.market.insert(slug_key(slug), market.clone());
            self.market.insert(market_key(&market.id), market.clone());
        }
        Ok(market)
    }

    // ----- prices -----

    pub async fn get_prices(&self, id: &str) -> ClientResult<Vec<OutcomePrice>> {
        if let Some(prices) = self.cached(&self.prices, &prices_key(id)) {
            return Ok(prices);
        }
        self.refresh_prices(id).await
    }

    pub async fn refresh_prices(&self, id: &str) -> ClientResult<Vec<OutcomePrice>> {
        let prices = self
            .call("get_prices", || self.provider.get_prices(id))
            .await?;
        self.prices.insert(prices_key(id), prices.clone());
        Ok(prices)
    }

    pub async fn get_prices_or_stale(&self, id: &str) -> ClientResult<Vec<OutcomePrice>> {
        let result = self.get_prices(id).await;
        self.stale_fallback(result, &self.prices, &prices_key(id))
    }

    // ----- health -----

    /// Single health check, never cached and never retried. Refused without a
    /// network call while the circuit is open.
    pub async fn probe(&self) -> bool {
        if let Permit::Refused { remaining } = self.connection.permit() {
            debug!("Probe skipped, circuit open for another {:?}", remaining);
            return false;
        }

        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        let outcome =
            tokio::time::timeout(self.retry.call_budget, self.provider.health_check()).await;

        match outcome {
            Ok(Ok(())) => {
                self.connection.record_success();
                true
            }
            Ok(Err(e)) => {
                warn!("{} health check failed: {}", self.provider.name(), e);
                self.connection.record_failure();
                false
            }
            Err(_) => {
                warn!(
                    "{} health check exceeded {:?}",
                    self.provider.name(),
                    self.retry.call_budget
                );
                self.connection.record_failure();
                false
            }
        }
    }

    /// Self-heal: rebuild the provider session and probe it
    pub async fn reconnect(&self) -> ConnectionState {
        info!("Attempting to heal {} connection...", self.provider.name());
        self.connection.begin_reconnect();

        if let Err(e) = self.provider.reset_session().await {
            warn!("Session reset failed: {}", e);
            self.connection.record_failure();
            return self.connection.state();
        }

        if self.probe().await {
            info!("Connection healed");
        }
        self.connection.state()
    }

    // ----- internals -----

    fn cached<V: Clone>(&self, cache: &TtlCache<V>, key: &str) -> Option<V> {
        let hit = cache.get(key)?;
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!("Cache hit for {}", key);
        Some(hit)
    }

    fn stale_fallback<V: Clone>(
        &self,
        result: ClientResult<V>,
        cache: &TtlCache<V>,
        key: &str,
    ) -> ClientResult<V> {
        match result {
            Err(ClientError::ProviderUnavailable { reason }) if self.allow_stale => {
                match cache.get_stale(key) {
                    Some((value, age)) => {
                        warn!("Provider unavailable ({}), serving {} aged {:?}", reason, key, age);
                        Ok(value)
                    }
                    None => Err(ClientError::ProviderUnavailable { reason }),
                }
            }
            other => other,
        }
    }

    /// Run one remote operation under the retry policy and the call budget
    async fn call<T, F, Fut>(&self, operation: &str, mut attempt: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let budget = self.retry.call_budget;
        match tokio::time::timeout(budget, self.call_with_retry(operation, &mut attempt)).await {
            Ok(result) => result,
            Err(_) => {
                // The in-flight attempt was abandoned; count it against health
                self.connection.record_failure();
                warn!("{} exceeded call budget of {:?}", operation, budget);
                Err(ClientError::unavailable(format!(
                    "{} exceeded call budget of {:?}",
                    operation, budget
                )))
            }
        }
    }

    async fn call_with_retry<T, F, Fut>(&self, operation: &str, attempt: &mut F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut schedule = self.retry.schedule();
        let mut attempts = 0;

        loop {
            if let Permit::Refused { remaining } = self.connection.permit() {
                return Err(ClientError::unavailable(format!(
                    "circuit open, {} refused for another {:?}",
                    operation, remaining
                )));
            }

            attempts += 1;
            self.remote_calls.fetch_add(1, Ordering::Relaxed);

            let error = match attempt().await {
                Ok(value) => {
                    self.connection.record_success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            self.connection.record_failure();

            if !error.is_retryable() {
                warn!("{} failed permanently: {}", operation, error);
                return Err(ClientError::Permanent(error.to_string()));
            }

            if self.connection.state() == ConnectionState::Failed {
                return Err(ClientError::unavailable(format!(
                    "{} failed and opened the circuit: {}",
                    operation, error
                )));
            }

            if attempts >= self.retry.max_attempts {
                return Err(ClientError::unavailable(format!(
                    "{} failed after {} attempts: {}",
                    operation, attempts, error
                )));
            }

            let delay = self.retry.delay_for(&error, &mut schedule);
            warn!(
                "{} attempt {}/{} failed: {}. Retrying in {:?}",
                operation, attempts, self.retry.max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn market_key(id: &str) -> String {
    format!("market:{}", id)
}

fn slug_key(slug: &str) -> String {
    format!("slug:{}", slug)
}

fn prices_key(id: &str) -> String {
    format!("prices:{}", id)
}
