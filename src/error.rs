//! Error taxonomy for the provider, client, execution and cycle boundaries.
//!
//! Transient and rate-limited provider failures never leave the client; only
//! permanent failures and `ProviderUnavailable` cross it.

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a market data provider, already classified
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network error, timeout or 5xx. Safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// 429-class response. `retry_after` is the provider's hint, if any.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 4xx other than rate limiting, or a payload we cannot decode
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }
}

/// Errors surfaced by the resilient market client
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Retries exhausted, call budget exceeded, or circuit open
    #[error("provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },
}

impl ClientError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ClientError::ProviderUnavailable {
            reason: reason.into(),
        }
    }
}

/// Order submission failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("order transport error: {0}")]
    Transport(String),

    #[error("execution not configured: {0}")]
    NotConfigured(String),
}

/// Why a trading cycle ended in `Failed`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CycleError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The ledger reservation has already been rolled back when this is reported
    #[error("execution failed: {0}")]
    ExecutionFailed(#[from] ExecutionError),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
