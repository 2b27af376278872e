//! Connection health state machine for the market client.
//!
//! Driven purely by call outcomes: consecutive failures walk the state from
//! Healthy to Degraded to Failed, and a success walks it back through
//! Reconnecting to Healthy. While Failed the circuit is open and remote calls
//! are refused until the cool-down expires, at which point a single trial call
//! is let through.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const HISTORY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Healthy,
    Degraded,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Consecutive failures before Healthy becomes Degraded
    pub degraded_threshold: u32,
    /// Consecutive failures before the circuit opens
    pub failed_threshold: u32,
    /// How long remote calls are refused once Failed
    pub cooldown: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: 3,
            failed_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Whether a remote call may be attempted right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed,
    Refused { remaining: Duration },
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    history: Vec<ConnectionState>,
}

impl Inner {
    fn transition(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        match to {
            ConnectionState::Healthy => info!("Connection {:?} -> Healthy", self.state),
            ConnectionState::Reconnecting => info!("Connection {:?} -> Reconnecting", self.state),
            ConnectionState::Degraded => warn!(
                "Connection degraded after {} consecutive failures",
                self.consecutive_failures
            ),
            ConnectionState::Failed => warn!(
                "Connection failed after {} consecutive failures, circuit open",
                self.consecutive_failures
            ),
        }
        self.state = to;
        if self.history.len() >= HISTORY_LEN {
            self.history.remove(0);
        }
        self.history.push(to);
    }
}

pub struct ConnectionMonitor {
    config: ConnectionConfig,
    inner: Mutex<Inner>,
}

impl ConnectionMonitor {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Healthy,
                consecutive_failures: 0,
                open_until: None,
                history: vec![ConnectionState::Healthy],
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Every state entered so far, oldest first (bounded)
    pub fn history(&self) -> Vec<ConnectionState> {
        self.inner.lock().history.clone()
    }

    /// Check the circuit before a remote call.
    ///
    /// Once the cool-down has expired the state moves to Reconnecting and the
    /// caller's next call is the trial.
    pub fn permit(&self) -> Permit {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Failed {
            return Permit::Allowed;
        }

        let now = Instant::now();
        match inner.open_until {
            Some(until) if now < until => Permit::Refused {
                remaining: until - now,
            },
            _ => {
                inner.open_until = None;
                inner.transition(ConnectionState::Reconnecting);
                Permit::Allowed
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.open_until = None;
        if inner.state != ConnectionState::Healthy {
            inner.transition(ConnectionState::Reconnecting);
            inner.transition(ConnectionState::Healthy);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let failures = inner.consecutive_failures;

        if failures >= self.config.failed_threshold {
            // A failed trial re-opens the circuit with a fresh cool-down
            if inner.state != ConnectionState::Failed || inner.open_until.is_none() {
                inner.open_until = Some(Instant::now() + self.config.cooldown);
            }
            inner.transition(ConnectionState::Failed);
        } else if failures >= self.config.degraded_threshold {
            inner.transition(ConnectionState::Degraded);
        } else if inner.state == ConnectionState::Reconnecting {
            inner.transition(ConnectionState::Degraded);
        }
    }

    /// Enter Reconnecting ahead of a forced session rebuild; clears any open
    /// circuit so the following probe is let through.
    pub fn begin_reconnect(&self) {
        let mut inner = self.inner.lock();
        inner.open_until = None;
        inner.transition(ConnectionState::Reconnecting);
    }
}
