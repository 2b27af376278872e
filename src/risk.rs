//! Trade decision and risk gate.
//!
//! A signal is authorized only when it has a direction, clears the probability
//! threshold and fits in what is left of the period budget. Authorization
//! debits the ledger immediately and hands back a [`Reservation`]; the caller
//! confirms it after a successful order or lets it roll back.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::types::{Direction, TradeSignal};

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Max total committed per accounting period (USD)
    pub daily_limit: Decimal,
    /// Amount per trade for fixed sizing (USD)
    pub per_trade_amount: Decimal,
    /// Minimum probability to trade
    pub probability_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_limit: dec!(5.0),
            per_trade_amount: dec!(0.8),
            probability_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLedger {
    pub committed: Decimal,
    pub daily_limit: Decimal,
    pub per_trade_amount: Decimal,
}

impl RiskLedger {
    pub fn remaining(&self) -> Decimal {
        (self.daily_limit - self.committed).max(Decimal::ZERO)
    }
}

/// Chooses the amount for an authorized trade
pub trait SizingStrategy: Send + Sync {
    fn amount(&self, signal: &TradeSignal, ledger: &RiskLedger) -> Decimal;
}

/// Always the ledger's per-trade amount
pub struct FixedSizing;

impl SizingStrategy for FixedSizing {
    fn amount(&self, _signal: &TradeSignal, ledger: &RiskLedger) -> Decimal {
        ledger.per_trade_amount
    }
}

/// Why a cycle did not trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NoMarket,
    NeutralSignal,
    BelowThreshold,
    InsufficientBudget,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoMarket => "no qualifying market",
            SkipReason::NeutralSignal => "neutral signal",
            SkipReason::BelowThreshold => "probability below threshold",
            SkipReason::InsufficientBudget => "insufficient budget",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of `RiskGate::decide`
#[derive(Debug)]
pub enum Decision {
    Authorized(Reservation),
    Skipped(SkipReason),
}

/// Amount debited from the ledger for one authorized trade.
///
/// Dropping an unsettled reservation rolls it back, so a cycle that is
/// cancelled between authorization and execution never leaks budget.
#[derive(Debug)]
pub struct Reservation {
    ledger: Arc<Mutex<RiskLedger>>,
    amount: Decimal,
    settled: bool,
}

impl Reservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Order went through; the debit stays
    pub fn confirm(mut self) {
        self.settled = true;
        debug!("Reservation of ${} confirmed", self.amount);
    }

    /// Order failed; give the amount back
    pub fn rollback(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut ledger = self.ledger.lock();
        ledger.committed = (ledger.committed - self.amount).max(Decimal::ZERO);
        info!(
            "Rolled back ${} (committed now ${} / ${})",
            self.amount, ledger.committed, ledger.daily_limit
        );
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Reservation of ${} dropped unsettled", self.amount);
            self.release();
        }
    }
}

/// Shared between concurrent cycles; clones point at the same ledger
#[derive(Clone)]
pub struct RiskGate {
    ledger: Arc<Mutex<RiskLedger>>,
    sizing: Arc<dyn SizingStrategy>,
    probability_threshold: f64,
}

impl RiskGate {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(RiskLedger {
                committed: Decimal::ZERO,
                daily_limit: config.daily_limit,
                per_trade_amount: config.per_trade_amount,
            })),
            sizing: Arc::new(FixedSizing),
            probability_threshold: config.probability_threshold,
        }
    }

    pub fn with_sizing(mut self, sizing: Arc<dyn SizingStrategy>) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn probability_threshold(&self) -> f64 {
        self.probability_threshold
    }

    /// Pure check against a ledger snapshot; returns the amount to trade
    pub fn evaluate(&self, signal: &TradeSignal, ledger: &RiskLedger) -> Result<Decimal, SkipReason> {
        if signal.direction == Direction::Neutral {
            return Err(SkipReason::NeutralSignal);
        }
        if signal.probability < self.probability_threshold {
            return Err(SkipReason::BelowThreshold);
        }

        let amount = self.sizing.amount(signal, ledger);
        if amount <= Decimal::ZERO || ledger.committed + amount > ledger.daily_limit {
            return Err(SkipReason::InsufficientBudget);
        }
        Ok(amount)
    }

    /// Check and reserve in one step under the ledger lock
    pub fn decide(&self, signal: &TradeSignal) -> Decision {
        let mut ledger = self.ledger.lock();

        match self.evaluate(signal, &ledger) {
            Ok(amount) => {
                ledger.committed += amount;
                info!(
                    "Authorized ${} {} on {} (p={:.3}, committed ${} / ${})",
                    amount,
                    signal.direction,
                    signal.market_id,
                    signal.probability,
                    ledger.committed,
                    ledger.daily_limit
                );
                Decision::Authorized(Reservation {
                    ledger: Arc::clone(&self.ledger),
                    amount,
                    settled: false,
                })
            }
            Err(reason) => {
                info!(
                    "Skipping {}: {} (p={:.3}, threshold {:.2}, remaining ${})",
                    signal.market_id,
                    reason,
                    signal.probability,
                    self.probability_threshold,
                    ledger.remaining()
                );
                Decision::Skipped(reason)
            }
        }
    }

    pub fn snapshot(&self) -> RiskLedger {
        self.ledger.lock().clone()
    }

    pub fn committed(&self) -> Decimal {
        self.ledger.lock().committed
    }

    /// Start a new accounting period
    pub fn reset_period(&self) {
        let mut ledger = self.ledger.lock();
        info!("Resetting risk ledger (was ${} committed)", ledger.committed);
        ledger.committed = Decimal::ZERO;
    }

    /// Seed the ledger with amounts already committed this period, e.g. from
    /// the trade journal after a restart
    pub fn seed_committed(&self, amount: Decimal) {
        let mut ledger = self.ledger.lock();
        ledger.committed = amount.max(Decimal::ZERO);
    }
}
