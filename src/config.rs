use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::analyzer::AnalyzerConfig;
use crate::cache::CacheConfig;
use crate::connection::ConnectionConfig;
use crate::health::HealthConfig;
use crate::market::DiscoveryConfig;
use crate::retry::RetryPolicy;
use crate::risk::RiskConfig;
use crate::watcher::WatchConfig;

/// L2 API credentials for the CLOB (only needed for live execution)
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    // API Credentials (optional, dry run works without them)
    pub credentials: Option<ApiCredentials>,

    // Mode
    pub dry_run: bool,
    pub log_level: String,
    pub allow_stale_prices: bool,

    // Storage
    pub trade_db_path: String,

    // Endpoints
    pub gamma_url: String,
    pub clob_url: String,

    // Components
    pub retry: RetryPolicy,
    pub connection: ConnectionConfig,
    pub cache: CacheConfig,
    pub discovery: DiscoveryConfig,
    pub analyzer: AnalyzerConfig,
    pub risk: RiskConfig,
    pub watch: WatchConfig,
    pub health: HealthConfig,
}

/// Read `key`, falling back to `default` when unset
fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid {}: {:?}", key, raw))
}

fn secs(key: &str, default: &str) -> Result<Duration> {
    Ok(Duration::from_secs(env_or::<u64>(key, default)?))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let credentials = match (
            env::var("POLY_API_KEY"),
            env::var("POLY_API_SECRET"),
            env::var("POLY_API_PASSPHRASE"),
            env::var("POLY_ADDRESS"),
        ) {
            (Ok(api_key), Ok(api_secret), Ok(api_passphrase), Ok(address)) => Some(ApiCredentials {
                api_key,
                api_secret,
                api_passphrase,
                address,
            }),
            _ => None,
        };

        let assets: Vec<String> = env::var("TARGET_ASSETS")
            .unwrap_or_else(|_| "BTC,ETH,SOL,XRP".to_string())
            .split(',')
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect();

        let retry = RetryPolicy {
            max_attempts: env_or("MAX_RETRIES", "3")?,
            base_delay: Duration::from_millis(env_or("RETRY_BASE_DELAY_MS", "500")?),
            multiplier: env_or("RETRY_MULTIPLIER", "2.0")?,
            max_delay: Duration::from_millis(env_or("RETRY_MAX_DELAY_MS", "5000")?),
            call_budget: secs("CALL_BUDGET_SECONDS", "30")?,
        };

        let risk = RiskConfig {
            daily_limit: env_or::<Decimal>("MAX_TRADE_AMOUNT", "5.0")?,
            per_trade_amount: env_or::<Decimal>("DEFAULT_TRADE_AMOUNT", "0.8")?,
            probability_threshold: env_or("PROBABILITY_THRESHOLD", "0.7")?,
        };

        let analyzer = AnalyzerConfig {
            blend_weight: env_or("ANALYZER_BLEND_WEIGHT", "0.5")?,
            min_samples: env_or("ANALYZER_MIN_SAMPLES", "6")?,
            ..AnalyzerConfig::default()
        };

        let config = Config {
            credentials,

            dry_run: env_or("DRY_RUN", "true").unwrap_or(true),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            allow_stale_prices: env_or("ALLOW_STALE_PRICES", "false").unwrap_or(false),

            trade_db_path: env::var("TRADE_DB_PATH").unwrap_or_else(|_| "trades.db".to_string()),

            gamma_url: env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string()),
            clob_url: env::var("CLOB_API_URL")
                .unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),

            retry,
            connection: ConnectionConfig::default(),
            cache: CacheConfig {
                ttl: secs("CACHE_TTL_SECONDS", "300")?,
            },
            discovery: DiscoveryConfig {
                assets,
                duration_minutes: env_or("MARKET_DURATION_MINUTES", "15")?,
                ..DiscoveryConfig::default()
            },
            analyzer,
            risk,
            watch: WatchConfig {
                duration: secs("WATCH_DURATION_SECONDS", "300")?,
                interval: secs("SAMPLE_INTERVAL_SECONDS", "10")?,
            },
            health: HealthConfig {
                interval: secs("HEALTH_CHECK_INTERVAL_SECONDS", "60")?,
                ..HealthConfig::default()
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the bot cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.risk.per_trade_amount <= Decimal::ZERO {
            anyhow::bail!("DEFAULT_TRADE_AMOUNT must be positive");
        }
        if self.risk.per_trade_amount > self.risk.daily_limit {
            anyhow::bail!(
                "DEFAULT_TRADE_AMOUNT ({}) exceeds MAX_TRADE_AMOUNT ({})",
                self.risk.per_trade_amount,
                self.risk.daily_limit
            );
        }
        if !(0.0..=1.0).contains(&self.risk.probability_threshold) {
            anyhow::bail!("PROBABILITY_THRESHOLD must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.analyzer.blend_weight) {
            anyhow::bail!("ANALYZER_BLEND_WEIGHT must be within [0, 1]");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("MAX_RETRIES must be at least 1");
        }
        if self.watch.interval.is_zero() {
            anyhow::bail!("SAMPLE_INTERVAL_SECONDS must be at least 1");
        }
        if self.discovery.assets.is_empty() {
            anyhow::bail!("TARGET_ASSETS must name at least one asset");
        }
        if !self.dry_run && self.credentials.is_none() {
            anyhow::bail!(
                "Live trading needs POLY_API_KEY, POLY_API_SECRET, POLY_API_PASSPHRASE and POLY_ADDRESS"
            );
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: None,
            dry_run: true,
            log_level: "info".to_string(),
            allow_stale_prices: false,
            trade_db_path: "trades.db".to_string(),
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            clob_url: "https://clob.polymarket.com".to_string(),
            retry: RetryPolicy::default(),
            connection: ConnectionConfig::default(),
            cache: CacheConfig::default(),
            discovery: DiscoveryConfig::default(),
            analyzer: AnalyzerConfig::default(),
            risk: RiskConfig::default(),
            watch: WatchConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.daily_limit, dec!(5.0));
        assert_eq!(config.risk.per_trade_amount, dec!(0.8));
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let config = Config {
            dry_run: false,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trade_amount_above_limit_rejected() {
        let mut config = Config::default();
        config.risk.per_trade_amount = dec!(6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_falls_back_to_default() {
        let value: u32 = env_or("UPDOWN_TEST_UNSET_VARIABLE", "42").unwrap();
        assert_eq!(value, 42);
    }
}
