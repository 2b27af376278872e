//! 15-min Up/Down Market Bot for Polymarket
//!
//! This library provides the pieces of a bot that watches Polymarket's
//! 15-minute Up/Down crypto markets (BTC, ETH, SOL, XRP), reads the price
//! trend of the UP token over a watch window, and places a small, budgeted
//! bet on the side the trend favors. Market data goes through a cached,
//! retrying client that tracks connection health and heals itself.

pub mod analyzer;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod cycle;
pub mod error;
pub mod execution;
pub mod health;
pub mod market;
pub mod provider;
pub mod retry;
pub mod risk;
pub mod trade_db;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testkit;
