//! Direction analyzer.
//!
//! Turns the price history collected while watching a market into a
//! [`TradeSignal`]. The UP token price is the market's implied probability of
//! UP, so a rising UP price is read as an UP trend and a falling one as DOWN.
//! The output probability blends the current price of the chosen side with
//! the trend strength.

use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use crate::types::{Direction, Outcome, PriceSample, TradeSignal};

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Below this many samples the signal is NEUTRAL
    pub min_samples: usize,
    /// Slopes within +/- this (price units per second) are NEUTRAL
    pub dead_band: f64,
    /// Slope at which trend strength saturates at 1.0
    pub slope_scale: f64,
    /// Weight of trend strength against side price, in [0, 1]
    pub blend_weight: f64,
    /// Outcome whose price series is analyzed
    pub outcome: Outcome,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_samples: 6,
            dead_band: 1e-5,
            slope_scale: 1e-3, // 0.01 per 10s sample
            blend_weight: 0.5,
            outcome: Outcome::Up,
        }
    }
}

/// Summary statistics over one price series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub slope: f64,
    pub volatility: f64,
    pub momentum: f64,
}

pub struct DirectionAnalyzer {
    config: AnalyzerConfig,
}

impl DirectionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze the samples for one market. Samples of other outcomes are
    /// ignored. Pure: same input, same signal.
    pub fn analyze(&self, market_id: &str, samples: &[PriceSample]) -> TradeSignal {
        let series: Vec<&PriceSample> = samples
            .iter()
            .filter(|s| s.outcome == self.config.outcome)
            .collect();

        let last_price = series.last().map(|s| s.price);
        let last = last_price.and_then(|p| p.to_f64()).unwrap_or(0.5);

        if series.len() < self.config.min_samples.max(2) {
            debug!(
                "{}: {} samples, need {} - NEUTRAL",
                market_id,
                series.len(),
                self.config.min_samples
            );
            return TradeSignal {
                market_id: market_id.to_string(),
                direction: Direction::Neutral,
                probability: last.clamp(0.0, 1.0),
                volatility: 0.0,
                momentum: 0.0,
                slope: 0.0,
                sample_count: series.len(),
                last_price,
            };
        }

        let points: Vec<(f64, f64)> = {
            let origin = series[0].timestamp;
            series
                .iter()
                .map(|s| {
                    let t = (s.timestamp - origin).num_milliseconds() as f64 / 1000.0;
                    (t, s.price.to_f64().unwrap_or(0.0))
                })
                .collect()
        };
        let stats = series_stats(&points);

        let direction = self.classify(stats.slope);
        let probability = self.probability(direction, stats.slope, last, samples);

        debug!(
            "{}: slope={:.6}/s vol={:.4} mom={:.4} -> {} p={:.3}",
            market_id, stats.slope, stats.volatility, stats.momentum, direction, probability
        );

        TradeSignal {
            market_id: market_id.to_string(),
            direction,
            probability,
            volatility: stats.volatility,
            momentum: stats.momentum,
            slope: stats.slope,
            sample_count: series.len(),
            last_price,
        }
    }

    fn classify(&self, slope: f64) -> Direction {
        let rising = match self.config.outcome {
            Outcome::Up => Direction::Up,
            Outcome::Down => Direction::Down,
        };
        let falling = match rising {
            Direction::Up => Direction::Down,
            _ => Direction::Up,
        };

        if slope > self.config.dead_band {
            rising
        } else if slope < -self.config.dead_band {
            falling
        } else {
            Direction::Neutral
        }
    }

    fn probability(&self, direction: Direction, slope: f64, last: f64, samples: &[PriceSample]) -> f64 {
        let side = match direction.outcome() {
            None => return last.clamp(0.0, 1.0),
            Some(side) => side,
        };

        // Price of the side we would buy. Prefer an observed sample of that
        // side, else the complement of the analyzed series.
        let side_price = if side == self.config.outcome {
            last
        } else {
            samples
                .iter()
                .rev()
                .find(|s| s.outcome == side)
                .and_then(|s| s.price.to_f64())
                .unwrap_or(1.0 - last)
        };

        let strength = if self.config.slope_scale > 0.0 {
            (slope.abs() / self.config.slope_scale).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let w = self.config.blend_weight.clamp(0.0, 1.0);

        ((1.0 - w) * side_price + w * strength).clamp(0.0, 1.0)
    }
}

/// Slope, volatility and momentum over (seconds, price) points
pub fn series_stats(points: &[(f64, f64)]) -> SeriesStats {
    SeriesStats {
        slope: least_squares_slope(points),
        volatility: change_volatility(points),
        momentum: momentum(points),
    }
}

fn least_squares_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let mean_t = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_p = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (t, p)| {
        let dt = t - mean_t;
        (num + dt * (p - mean_p), den + dt * dt)
    });

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Sample std-dev (n-1) of consecutive price changes
fn change_volatility(points: &[(f64, f64)]) -> f64 {
    let changes: Vec<f64> = points.windows(2).map(|w| w[1].1 - w[0].1).collect();
    if changes.len() < 2 {
        return 0.0;
    }
    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let var = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Mean of the last third minus mean of the first third
fn momentum(points: &[(f64, f64)]) -> f64 {
    let third = (points.len() / 3).max(1);
    if points.len() < 2 {
        return 0.0;
    }
    let mean = |slice: &[(f64, f64)]| slice.iter().map(|p| p.1).sum::<f64>() / slice.len() as f64;
    mean(&points[points.len() - third..]) - mean(&points[..third])
}
