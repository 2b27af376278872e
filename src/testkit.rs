//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ExecutionError, ProviderError};
use crate::execution::OrderExecutor;
use crate::provider::MarketDataProvider;
use crate::types::{Market, OrderRequest, OrderResult, OutcomePrice};

/// Queue of scripted responses; once drained, every call gets the fallback
pub struct Script<T> {
    queue: Mutex<VecDeque<Result<T, ProviderError>>>,
    fallback: Mutex<Result<T, ProviderError>>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    pub fn always(value: Result<T, ProviderError>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(value),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, value: Result<T, ProviderError>) {
        self.queue.lock().push_back(value);
    }

    pub fn set_fallback(&self, value: Result<T, ProviderError>) {
        *self.fallback.lock() = value;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<T, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().pop_front() {
            Some(v) => v,
            None => self.fallback.lock().clone(),
        }
    }
}

/// Where `get_prices` answers come from
pub enum PriceSource {
    Scripted(Script<Vec<OutcomePrice>>),
    /// UP price = start + step * n for the n-th call per market, DOWN = 1 - UP
    Ramp { start: Decimal, step: Decimal },
}

pub struct ScriptedProvider {
    pub markets: Script<Vec<Market>>,
    pub market: Script<Market>,
    pub by_slug: Script<Option<Market>>,
    pub slugs_requested: Mutex<Vec<String>>,
    pub prices: PriceSource,
    pub health: Script<()>,
    /// Artificial latency on every call
    pub latency: Mutex<Option<Duration>>,
    pub resets: AtomicUsize,
    price_calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProvider {
    pub fn new(markets: Vec<Market>) -> Self {
        let first = markets
            .first()
            .cloned()
            .ok_or_else(|| ProviderError::Permanent("HTTP 404".to_string()));
        Self {
            markets: Script::always(Ok(markets)),
            market: Script::always(first),
            by_slug: Script::always(Ok(None)),
            slugs_requested: Mutex::new(Vec::new()),
            prices: PriceSource::Scripted(Script::always(Ok(up_down_prices(dec!(0.5))))),
            health: Script::always(Ok(())),
            latency: Mutex::new(None),
            resets: AtomicUsize::new(0),
            price_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_prices(mut self, prices: PriceSource) -> Self {
        self.prices = prices;
        self
    }

    pub fn price_script(&self) -> &Script<Vec<OutcomePrice>> {
        match &self.prices {
            PriceSource::Scripted(script) => script,
            PriceSource::Ramp { .. } => panic!("provider uses a price ramp"),
        }
    }

    /// Remote calls of any kind
    pub fn total_calls(&self) -> usize {
        let prices = match &self.prices {
            PriceSource::Scripted(script) => script.calls(),
            PriceSource::Ramp { .. } => self.price_calls.lock().values().sum(),
        };
        self.markets.calls() + self.market.calls() + self.by_slug.calls() + self.health.calls() + prices
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ProviderError> {
        self.delay().await;
        self.markets.next()
    }

    async fn get_market(&self, _id: &str) -> Result<Market, ProviderError> {
        self.delay().await;
        self.market.next()
    }

    async fn get_market_by_slug(&self, slug: &str) -> Result<Option<Market>, ProviderError> {
        self.delay().await;
        self.slugs_requested.lock().push(slug.to_string());
        self.by_slug.next()
    }

    async fn get_prices(&self, id: &str) -> Result<Vec<OutcomePrice>, ProviderError> {
        self.delay().await;
        match &self.prices {
            PriceSource::Scripted(script) => script.next(),
            PriceSource::Ramp { start, step } => {
                let n = {
                    let mut calls = self.price_calls.lock();
                    let n = calls.entry(id.to_string()).or_insert(0);
                    *n += 1;
                    *n - 1
                };
                let up = (*start + *step * Decimal::from(n)).clamp(dec!(0.01), dec!(0.99));
                Ok(up_down_prices(up))
            }
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.delay().await;
        self.health.next()
    }

    async fn reset_session(&self) -> Result<(), ProviderError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn up_down_prices(up: Decimal) -> Vec<OutcomePrice> {
    vec![
        OutcomePrice {
            token_id: "up-token".to_string(),
            label: "Up".to_string(),
            price: up,
        },
        OutcomePrice {
            token_id: "down-token".to_string(),
            label: "Down".to_string(),
            price: Decimal::ONE - up,
        },
    ]
}

pub fn market(id: &str, question: &str, liquidity: Decimal, volume: Decimal) -> Market {
    Market {
        id: id.to_string(),
        question: question.to_string(),
        slug: id.to_string(),
        active: true,
        end_time: None,
        created_at: None,
        tokens: up_down_prices(dec!(0.5)),
        liquidity,
        volume,
    }
}

pub fn btc_market(id: &str) -> Market {
    market(id, "Bitcoin Up or Down - 15 minute", dec!(1000), dec!(100))
}

/// Executor that records every submission and can be told to fail
#[derive(Default)]
pub struct RecordingExecutor {
    pub fail: std::sync::atomic::AtomicBool,
    pub submitted: Mutex<Vec<OrderRequest>>,
}

impl RecordingExecutor {
    pub fn failing() -> Arc<Self> {
        let executor = Self::default();
        executor.fail.store(true, Ordering::SeqCst);
        Arc::new(executor)
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl OrderExecutor for RecordingExecutor {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        self.submitted.lock().push(order.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExecutionError::Rejected("not enough balance".to_string()));
        }
        Ok(OrderResult {
            order_id: format!("order-{}", self.count()),
            status: "MATCHED".to_string(),
            filled_amount: order.amount,
            price: order.price,
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}
