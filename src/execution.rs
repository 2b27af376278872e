//! Order execution collaborators.
//!
//! The cycle calls [`OrderExecutor::submit`] exactly once per authorized
//! decision and never retries it.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::generate_headers;
use crate::config::ApiCredentials;
use crate::error::ExecutionError;
use crate::types::{OrderRequest, OrderResult};

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError>;

    /// Whether submissions reach a real exchange
    fn is_live(&self) -> bool;
}

/// Simulated fills at the requested price
#[derive(Default)]
pub struct DryRunExecutor;

#[async_trait]
impl OrderExecutor for DryRunExecutor {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let order_id = format!("dry-{}", uuid::Uuid::new_v4());
        info!(
            "[DRY RUN] Would buy ${} of {} on {} @ {} ({})",
            order.amount, order.outcome, order.market_id, order.price, order_id
        );
        Ok(OrderResult {
            order_id,
            status: "SIMULATED".to_string(),
            filled_amount: order.amount,
            price: order.price,
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// Builds the exchange-signed order (EIP-712 over the CTF exchange order
/// struct). No signer ships with this crate; the wallet integration provides
/// one.
pub trait OrderSigner: Send + Sync {
    /// Signed BUY order for `size` shares of `order.token_id` at `order.price`
    fn sign(&self, order: &OrderRequest, size: Decimal) -> Result<serde_json::Value, ExecutionError>;
}

/// Order body posted to the CLOB
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClobOrderBody {
    order: serde_json::Value,
    owner: String,
    order_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClobOrderResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, rename = "orderID")]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
}

/// Live execution against the CLOB REST API with L2 auth headers. Orders
/// are signed by the supplied [`OrderSigner`] and posted fill-or-kill.
pub struct ClobExecutor {
    client: Client,
    clob_url: String,
    credentials: ApiCredentials,
    signer: Arc<dyn OrderSigner>,
}

impl ClobExecutor {
    pub fn new(
        clob_url: &str,
        credentials: ApiCredentials,
        signer: Arc<dyn OrderSigner>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("updown-bot/0.1")
            .build()?;

        Ok(Self {
            client,
            clob_url: clob_url.trim_end_matches('/').to_string(),
            credentials,
            signer,
        })
    }

    /// JSON body for one order: sized, signed, wrapped with owner and type
    fn order_body(&self, order: &OrderRequest) -> Result<String, ExecutionError> {
        let size = shares_for(order.amount, order.price)
            .filter(|s| *s > Decimal::ZERO)
            .ok_or_else(|| {
                ExecutionError::Rejected(format!(
                    "cannot size ${} at price {}",
                    order.amount, order.price
                ))
            })?;

        let body = ClobOrderBody {
            order: self.signer.sign(order, size)?,
            owner: self.credentials.api_key.clone(),
            order_type: "FOK",
        };
        serde_json::to_string(&body)
            .map_err(|e| ExecutionError::Rejected(format!("encoding order: {}", e)))
    }
}

/// Shares bought for `amount` USD at `price`, rounded down to 2 decimals
pub fn shares_for(amount: Decimal, price: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    Some((amount / price).round_dp_with_strategy(2, RoundingStrategy::ToZero))
}

#[async_trait]
impl OrderExecutor for ClobExecutor {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderResult, ExecutionError> {
        let path = "/order";
        let body = self.order_body(order)?;

        let headers = generate_headers(&self.credentials, "POST", path, &body)
            .map_err(|e| ExecutionError::NotConfigured(e.to_string()))?;

        let mut request = self.client.post(format!("{}{}", self.clob_url, path));
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!("Order failed: {} - {}", status, text);
            return Err(ExecutionError::Rejected(format!("HTTP {}: {}", status, text)));
        }

        let parsed: ClobOrderResponse = serde_json::from_str(&text)
            .map_err(|e| ExecutionError::Rejected(format!("unreadable response {:?}: {}", text, e)))?;

        if parsed.success == Some(false) {
            return Err(ExecutionError::Rejected(
                parsed.error_msg.unwrap_or_else(|| "order not accepted".to_string()),
            ));
        }

        let order_id = parsed
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExecutionError::Rejected(format!("no order id in {}", text)))?;

        info!(
            "Order posted successfully: {} {} ${} @ {}",
            order_id, order.outcome, order.amount, order.price
        );

        Ok(OrderResult {
            order_id,
            status: parsed.status.unwrap_or_else(|| "live".to_string()),
            filled_amount: order.amount,
            price: order.price,
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}
