use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market information from Gamma API
///
/// Numeric fields come back either as JSON numbers or strings depending on the
/// endpoint, and `outcomes`/`outcomePrices`/`clobTokenIds` are JSON-encoded
/// strings like "[\"Up\", \"Down\"]".
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    pub end_date: Option<String>,
    pub created_at: Option<String>,
    pub liquidity: Option<serde_json::Value>,
    pub volume: Option<serde_json::Value>,
    pub outcomes: Option<String>,
    pub outcome_prices: Option<String>,
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub tokens: Vec<GammaToken>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaToken {
    #[serde(default, alias = "token_id")]
    pub id: String,
    pub outcome: String,
    pub price: Option<serde_json::Value>,
}

/// Which side of a binary Up/Down market a token pays out on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Up,
    Down,
}

impl Outcome {
    /// Map a provider outcome label onto Up/Down. "Yes"/"No" are accepted for
    /// markets that label the binary legs that way.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "up" | "yes" => Some(Outcome::Up),
            "down" | "no" => Some(Outcome::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Up => "UP",
            Outcome::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outcome token with its current price in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomePrice {
    pub token_id: String,
    pub label: String,
    pub price: Decimal,
}

impl OutcomePrice {
    pub fn outcome(&self) -> Option<Outcome> {
        Outcome::from_label(&self.label)
    }
}

/// A binary market as read from the provider. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub slug: String,
    pub active: bool,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub tokens: Vec<OutcomePrice>,
    pub liquidity: Decimal,
    pub volume: Decimal,
}

impl Market {
    pub fn token(&self, outcome: Outcome) -> Option<&OutcomePrice> {
        self.tokens.iter().find(|t| t.outcome() == Some(outcome))
    }

    /// Exactly two tokens, one UP and one DOWN
    pub fn is_binary_up_down(&self) -> bool {
        self.tokens.len() == 2
            && self.token(Outcome::Up).is_some()
            && self.token(Outcome::Down).is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end_time, Some(end) if end <= now)
    }

    /// Time remaining until resolution, if the provider told us the end time
    pub fn time_until_resolution(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - now)
    }

    /// UP + DOWN prices. Anything away from 1.0 is an arbitrage gap.
    pub fn combined_price(&self) -> Option<Decimal> {
        Some(self.token(Outcome::Up)?.price + self.token(Outcome::Down)?.price)
    }
}

/// Single observation of one outcome's price during the watch window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub price: Decimal,
}

/// Direction the analyzer expects the market to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    /// Outcome token to buy for this direction
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Direction::Up => Some(Outcome::Up),
            Direction::Down => Some(Outcome::Down),
            Direction::Neutral => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Neutral => "NEUTRAL",
        };
        f.write_str(s)
    }
}

/// Output of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    pub market_id: String,
    pub direction: Direction,
    /// Probability that `direction` resolves, in [0, 1]
    pub probability: f64,
    pub volatility: f64,
    pub momentum: f64,
    /// Least-squares slope in price units per second
    pub slope: f64,
    pub sample_count: usize,
    /// Last observed price of the traded outcome
    pub last_price: Option<Decimal>,
}

/// Order handed to the execution service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    /// USD amount to spend
    pub amount: Decimal,
    /// Limit price per share
    pub price: Decimal,
}

/// Confirmation returned by the execution service
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: String,
    pub filled_amount: Decimal,
    pub price: Decimal,
}
