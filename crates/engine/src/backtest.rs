//! Backtest projection for the backtesting stage.
//!
//! A buy-and-hold estimate over the frame's close column: entry at the
//! first close, exit at the last, fees charged on both sides, volatility
//! and Sharpe derived from close-to-close returns. Drawdown, win rate, and
//! trade counts are fixed rule-of-thumb figures; this stage is a preview,
//! not a trade-level simulation.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::frame;

const RISK_FREE_RATE: f64 = 0.02;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const ASSUMED_MAX_DRAWDOWN: f64 = 0.15;
const ASSUMED_WIN_RATE: f64 = 0.65;
const ASSUMED_TRADES: u32 = 10;
const ASSUMED_PROFITABLE_TRADES: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_cash: f64,
    /// Per-side fee as a fraction (0.001 = 0.1%).
    pub fees: f64,
    pub slippage: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_cash: 10_000.0,
            fees: 0.001,
            slippage: 0.001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_cash: f64,
    pub final_value: f64,
    pub total_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: u32,
    pub profitable_trades: u32,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Run the projection over a frame's close column.
pub fn run(df: &DataFrame, config: &BacktestConfig) -> EngineResult<BacktestReport> {
    let close = frame::column_f64(df, "close")?;
    let (first, last) = match (close.first(), close.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Err(EngineError::EmptyFrame),
    };
    if !(first > 0.0) {
        return Err(EngineError::Unsupported(
            "first close must be positive".to_string(),
        ));
    }

    let shares = config.initial_cash / first;
    let gross_value = shares * last;
    let total_fees = config.initial_cash * config.fees * 2.0;
    let final_value = gross_value - total_fees;
    let total_return = (final_value - config.initial_cash) / config.initial_cash;

    let returns: Vec<f64> = close
        .windows(2)
        .filter(|w| w[0].is_finite() && w[1].is_finite() && w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    let volatility = std_dev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
    let sharpe_ratio = if volatility > 0.0 {
        (total_return - RISK_FREE_RATE) / volatility
    } else {
        0.0
    };

    let bounds = frame::time_bounds(df);
    Ok(BacktestReport {
        initial_cash: config.initial_cash,
        final_value,
        total_return,
        volatility,
        sharpe_ratio,
        max_drawdown: ASSUMED_MAX_DRAWDOWN,
        win_rate: ASSUMED_WIN_RATE,
        total_trades: ASSUMED_TRADES,
        profitable_trades: ASSUMED_PROFITABLE_TRADES,
        start: bounds.map(|(s, _)| frame::format_ms(s)),
        end: bounds.map(|(_, e)| frame::format_ms(e)),
    })
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}
