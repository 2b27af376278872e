//! Market data providers.
//!
//! The client only sees the [`MarketDataProvider`] trait. [`GammaProvider`] is
//! the HTTP implementation against Polymarket's Gamma API; it classifies every
//! failure into transient / rate-limited / permanent so the client can decide
//! what to retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::types::{GammaMarket, Market, OutcomePrice};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn list_markets(&self) -> Result<Vec<Market>, ProviderError>;

    async fn get_market(&self, id: &str) -> Result<Market, ProviderError>;

    /// Market with the given slug, `None` when no market carries it
    async fn get_market_by_slug(&self, slug: &str) -> Result<Option<Market>, ProviderError>;

    async fn get_prices(&self, id: &str) -> Result<Vec<OutcomePrice>, ProviderError>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// Drop and rebuild the transport session
    async fn reset_session(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Gamma API provider
pub struct GammaProvider {
    base_url: String,
    request_timeout: Duration,
    http: RwLock<Client>,
}

impl GammaProvider {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = build_client(request_timeout)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            http: RwLock::new(http),
        })
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let client = self.http.read().clone();

        let response = client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(classify_status(status, retry_after));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("reading body from {}: {}", path, e)))?;

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Permanent(format!("malformed payload from {}: {}", path, e)))
    }
}

#[async_trait]
impl MarketDataProvider for GammaProvider {
    fn name(&self) -> &str {
        "gamma"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ProviderError> {
        let raw: Vec<GammaMarket> = self
            .fetch_json(
                "/markets",
                &[("active", "true"), ("closed", "false"), ("limit", "500")],
            )
            .await?;

        let total = raw.len();
        let markets: Vec<Market> = raw
            .into_iter()
            .filter_map(|m| {
                let id = m.id.clone();
                match parse_market(m) {
                    Ok(market) => Some(market),
                    Err(e) => {
                        debug!("Skipping market {}: {}", id, e);
                        None
                    }
                }
            })
            .collect();

        debug!("Parsed {}/{} markets from Gamma", markets.len(), total);
        Ok(markets)
    }

    async fn get_market(&self, id: &str) -> Result<Market, ProviderError> {
        let raw: GammaMarket = self.fetch_json(&format!("/markets/{}", id), &[]).await?;
        parse_market(raw).map_err(ProviderError::Permanent)
    }

    async fn get_market_by_slug(&self, slug: &str) -> Result<Option<Market>, ProviderError> {
        let raw: Vec<GammaMarket> = self.fetch_json("/markets", &[("slug", slug)]).await?;
        match raw.into_iter().next() {
            Some(m) => parse_market(m).map(Some).map_err(ProviderError::Permanent),
            None => Ok(None),
        }
    }

    async fn get_prices(&self, id: &str) -> Result<Vec<OutcomePrice>, ProviderError> {
        let market = self.get_market(id).await?;
        if market.tokens.is_empty() {
            return Err(ProviderError::Permanent(format!(
                "market {} has no outcome prices",
                id
            )));
        }
        Ok(market.tokens)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let _: Vec<serde_json::Value> = self.fetch_json("/markets", &[("limit", "1")]).await?;
        Ok(())
    }

    async fn reset_session(&self) -> Result<(), ProviderError> {
        let fresh = build_client(self.request_timeout)
            .map_err(|e| ProviderError::Transient(format!("rebuilding HTTP client: {}", e)))?;
        *self.http.write() = fresh;
        info!("Rebuilt Gamma HTTP session");
        Ok(())
    }
}

fn build_client(request_timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .tcp_nodelay(true)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent("updown-bot/0.1")
        .build()?)
}

fn classify_transport(error: &reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::Permanent(format!("malformed payload: {}", error))
    } else {
        // Timeouts, connect failures, resets
        ProviderError::Transient(error.to_string())
    }
}

/// Map a non-2xx status onto the retry taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ProviderError::Transient(format!("HTTP {}", status))
    } else {
        ProviderError::Permanent(format!("HTTP {}", status))
    }
}

/// Retry-After in delta-seconds form. HTTP-date values are ignored and the
/// caller falls back to its own backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Convert a Gamma market into our model, validating the outcome prices
pub fn parse_market(raw: GammaMarket) -> Result<Market, String> {
    let mut tokens = Vec::new();

    // First try tokens array
    for token in &raw.tokens {
        let price = token
            .price
            .as_ref()
            .and_then(parse_decimal)
            .unwrap_or(Decimal::ZERO);
        tokens.push(OutcomePrice {
            token_id: token.id.clone(),
            label: token.outcome.clone(),
            price,
        });
    }

    // If tokens array empty, parse from outcomes / outcomePrices / clobTokenIds
    if tokens.is_empty() {
        if let Some(outcomes_str) = &raw.outcomes {
            let outcomes: Vec<String> = serde_json::from_str(outcomes_str)
                .map_err(|e| format!("bad outcomes field: {}", e))?;
            let prices: Vec<String> = match &raw.outcome_prices {
                Some(s) => serde_json::from_str(s).map_err(|e| format!("bad outcomePrices: {}", e))?,
                None => Vec::new(),
            };
            let token_ids: Vec<String> = match &raw.clob_token_ids {
                Some(s) => serde_json::from_str(s).unwrap_or_default(),
                None => Vec::new(),
            };

            for (i, label) in outcomes.iter().enumerate() {
                let price = match prices.get(i) {
                    Some(p) => Decimal::from_str(p.trim())
                        .map_err(|e| format!("bad price {:?}: {}", p, e))?,
                    None => Decimal::ZERO,
                };
                tokens.push(OutcomePrice {
                    token_id: token_ids.get(i).cloned().unwrap_or_default(),
                    label: label.clone(),
                    price,
                });
            }
        }
    }

    if let Some(bad) = tokens
        .iter()
        .find(|t| t.price < Decimal::ZERO || t.price > Decimal::ONE)
    {
        return Err(format!("price {} for {} outside [0, 1]", bad.price, bad.label));
    }

    Ok(Market {
        active: raw.active && !raw.closed,
        end_time: parse_time(raw.end_date.as_deref()),
        created_at: parse_time(raw.created_at.as_deref()),
        liquidity: raw.liquidity.as_ref().and_then(parse_decimal).unwrap_or_default(),
        volume: raw.volume.as_ref().and_then(parse_decimal).unwrap_or_default(),
        id: raw.id,
        question: raw.question,
        slug: raw.slug,
        tokens,
    })
}
