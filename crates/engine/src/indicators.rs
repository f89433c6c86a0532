//! Indicator calculation over OHLCV frames.
//!
//! RSI, MACD, Bollinger Bands, and ATR delegate to `ta`; ADX is computed
//! with Wilder smoothing since `ta` does not ship one. Each indicator
//! appends its output columns to the frame. Names the pipeline does not
//! recognize are skipped with a log entry rather than failing the stage.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use ta::indicators::{
    AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
};
use ta::{DataItem, Next};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::frame;

/// One configured indicator: a catalog name plus numeric parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl IndicatorSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    fn window(&self, key: &str, default: f64) -> usize {
        self.param(key, default).max(1.0) as usize
    }
}

/// Apply each configured indicator to the frame, returning the enhanced
/// frame and the names that were actually applied.
pub fn apply(df: &DataFrame, specs: &[IndicatorSpec]) -> EngineResult<(DataFrame, Vec<String>)> {
    let mut out = df.clone();
    let mut applied = Vec::new();

    for spec in specs {
        match spec.name.to_uppercase().as_str() {
            "RSI" => {
                apply_rsi(&mut out, spec)?;
                applied.push("RSI".to_string());
            }
            "MACD" => {
                apply_macd(&mut out, spec)?;
                applied.push("MACD".to_string());
            }
            "BBANDS" => {
                apply_bbands(&mut out, spec)?;
                applied.push("BBANDS".to_string());
            }
            "ATR" => {
                apply_atr(&mut out, spec)?;
                applied.push("ATR".to_string());
            }
            "ADX" => {
                apply_adx(&mut out, spec)?;
                applied.push("ADX".to_string());
            }
            other => {
                warn!(indicator = other, "indicator not implemented, skipping");
            }
        }
    }

    Ok((out, applied))
}

fn apply_rsi(df: &mut DataFrame, spec: &IndicatorSpec) -> EngineResult<()> {
    let window = spec.window("window", 14.0);
    let close = frame::column_f64(df, "close")?;
    let mut rsi = RelativeStrengthIndex::new(window)
        .map_err(|e| EngineError::Indicator(format!("RSI window {window}: {e}")))?;
    let values: Vec<f64> = close.iter().map(|&c| rsi.next(c)).collect();
    frame::with_column_f64(df, "RSI", values)
}

fn apply_macd(df: &mut DataFrame, spec: &IndicatorSpec) -> EngineResult<()> {
    let fast = spec.window("fast_window", 12.0);
    let slow = spec.window("slow_window", 26.0);
    let signal = spec.window("signal_window", 9.0);
    let close = frame::column_f64(df, "close")?;

    let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal)
        .map_err(|e| EngineError::Indicator(format!("MACD {fast}/{slow}/{signal}: {e}")))?;

    let mut line = Vec::with_capacity(close.len());
    let mut signal_line = Vec::with_capacity(close.len());
    let mut histogram = Vec::with_capacity(close.len());
    for &c in &close {
        let out = macd.next(c);
        line.push(out.macd);
        signal_line.push(out.signal);
        histogram.push(out.histogram);
    }

    frame::with_column_f64(df, "MACD_macd", line)?;
    frame::with_column_f64(df, "MACD_signal", signal_line)?;
    frame::with_column_f64(df, "MACD_histogram", histogram)
}

fn apply_bbands(df: &mut DataFrame, spec: &IndicatorSpec) -> EngineResult<()> {
    let window = spec.window("window", 20.0);
    let alpha = spec.param("alpha", 2.0);
    let close = frame::column_f64(df, "close")?;

    let mut bb = BollingerBands::new(window, alpha)
        .map_err(|e| EngineError::Indicator(format!("BBANDS {window}/{alpha}: {e}")))?;

    let mut upper = Vec::with_capacity(close.len());
    let mut middle = Vec::with_capacity(close.len());
    let mut lower = Vec::with_capacity(close.len());
    for &c in &close {
        let out = bb.next(c);
        upper.push(out.upper);
        middle.push(out.average);
        lower.push(out.lower);
    }

    frame::with_column_f64(df, "BBANDS_upper", upper)?;
    frame::with_column_f64(df, "BBANDS_middle", middle)?;
    frame::with_column_f64(df, "BBANDS_lower", lower)
}

fn apply_atr(df: &mut DataFrame, spec: &IndicatorSpec) -> EngineResult<()> {
    let window = spec.window("window", 14.0);
    let high = frame::column_f64(df, "high")?;
    let low = frame::column_f64(df, "low")?;
    let close = frame::column_f64(df, "close")?;

    let mut atr = AverageTrueRange::new(window)
        .map_err(|e| EngineError::Indicator(format!("ATR window {window}: {e}")))?;

    let mut values = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        let value = DataItem::builder()
            .open(close[i])
            .high(high[i])
            .low(low[i])
            .close(close[i])
            .volume(0.0)
            .build()
            .map(|bar| atr.next(&bar))
            .unwrap_or(f64::NAN);
        values.push(value);
    }

    frame::with_column_f64(df, "ATR", values)
}

/// ADX with Wilder smoothing. Values stay NaN until twice the period has
/// elapsed.
fn apply_adx(df: &mut DataFrame, spec: &IndicatorSpec) -> EngineResult<()> {
    let period = spec.window("window", 14.0);
    let high = frame::column_f64(df, "high")?;
    let low = frame::column_f64(df, "low")?;
    let close = frame::column_f64(df, "close")?;

    let alpha = 1.0 / period as f64;
    let warmup = period * 2;

    let mut tr_ema = 0.0;
    let mut plus_dm_ema = 0.0;
    let mut minus_dm_ema = 0.0;
    let mut adx_ema = 0.0;
    let (mut prev_high, mut prev_low, mut prev_close) = (0.0, 0.0, 0.0);

    let mut values = Vec::with_capacity(close.len());
    for i in 0..close.len() {
        if i == 0 {
            prev_high = high[i];
            prev_low = low[i];
            prev_close = close[i];
            values.push(f64::NAN);
            continue;
        }

        let tr = (high[i] - low[i])
            .max((high[i] - prev_close).abs())
            .max((low[i] - prev_close).abs());
        let up_move = high[i] - prev_high;
        let down_move = prev_low - low[i];
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        if i == 1 {
            tr_ema = tr;
            plus_dm_ema = plus_dm;
            minus_dm_ema = minus_dm;
        } else {
            tr_ema = tr_ema * (1.0 - alpha) + tr * alpha;
            plus_dm_ema = plus_dm_ema * (1.0 - alpha) + plus_dm * alpha;
            minus_dm_ema = minus_dm_ema * (1.0 - alpha) + minus_dm * alpha;
        }

        prev_high = high[i];
        prev_low = low[i];
        prev_close = close[i];

        if i + 1 < warmup || tr_ema <= 0.0 {
            values.push(f64::NAN);
            continue;
        }

        let plus_di = plus_dm_ema / tr_ema * 100.0;
        let minus_di = minus_dm_ema / tr_ema * 100.0;
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            (plus_di - minus_di).abs() / di_sum * 100.0
        } else {
            0.0
        };
        adx_ema = adx_ema * (1.0 - alpha) + dx * alpha;
        values.push(adx_ema);
    }

    frame::with_column_f64(df, "ADX", values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{column_f64, has_column, ohlcv_frame};

    fn trending_frame(rows: usize) -> DataFrame {
        let time: Vec<i64> = (0..rows as i64).map(|i| i * 60_000).collect();
        // Down then up so oscillators see both regimes.
        let close: Vec<f64> = (0..rows)
            .map(|i| {
                if i < rows / 2 {
                    200.0 - 2.0 * i as f64
                } else {
                    200.0 - rows as f64 + 3.0 * (i - rows / 2) as f64
                }
            })
            .collect();
        let open: Vec<f64> = close.iter().map(|c| c - 0.3).collect();
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        let volume: Vec<f64> = (0..rows).map(|_| 50.0).collect();
        ohlcv_frame(&time, &open, &high, &low, &close, &volume).unwrap()
    }

    #[test]
    fn rsi_stays_in_bounds_and_reacts_to_trend() {
        let df = trending_frame(60);
        let (out, applied) = apply(&df, &[IndicatorSpec::new("RSI")]).unwrap();

        assert_eq!(applied, vec!["RSI"]);
        let rsi = column_f64(&out, "RSI").unwrap();
        assert!(rsi.iter().all(|v| (0.0..=100.0).contains(v)));
        // A long downtrend has to push RSI low at some point.
        assert!(rsi[..30].iter().any(|&v| v < 35.0));
    }

    #[test]
    fn macd_and_bbands_emit_all_outputs() {
        let df = trending_frame(80);
        let specs = [
            IndicatorSpec::new("MACD"),
            IndicatorSpec::new("BBANDS").with_param("window", 10.0),
        ];
        let (out, applied) = apply(&df, &specs).unwrap();

        assert_eq!(applied, vec!["MACD", "BBANDS"]);
        for name in [
            "MACD_macd",
            "MACD_signal",
            "MACD_histogram",
            "BBANDS_upper",
            "BBANDS_middle",
            "BBANDS_lower",
        ] {
            assert!(has_column(&out, name), "missing column {name}");
        }

        let upper = column_f64(&out, "BBANDS_upper").unwrap();
        let lower = column_f64(&out, "BBANDS_lower").unwrap();
        assert!(upper
            .iter()
            .zip(&lower)
            .skip(10)
            .all(|(u, l)| u >= l));
    }

    #[test]
    fn atr_is_positive_after_warmup() {
        let df = trending_frame(40);
        let (out, _) = apply(&df, &[IndicatorSpec::new("ATR")]).unwrap();
        let atr = column_f64(&out, "ATR").unwrap();
        assert!(atr[20..].iter().all(|&v| v > 0.0));
    }

    #[test]
    fn adx_warms_up_then_stays_in_bounds() {
        let df = trending_frame(100);
        let (out, _) = apply(
            &df,
            &[IndicatorSpec::new("ADX").with_param("window", 14.0)],
        )
        .unwrap();
        let adx = column_f64(&out, "ADX").unwrap();

        assert!(adx[..27].iter().all(|v| v.is_nan()));
        assert!(adx[28..].iter().all(|&v| (0.0..=100.0).contains(&v)));
    }

    #[test]
    fn unknown_indicator_is_skipped_not_fatal() {
        let df = trending_frame(20);
        let specs = [IndicatorSpec::new("SUPERTREND"), IndicatorSpec::new("RSI")];
        let (out, applied) = apply(&df, &specs).unwrap();

        assert_eq!(applied, vec!["RSI"]);
        assert!(has_column(&out, "RSI"));
        assert!(!has_column(&out, "SUPERTREND"));
    }

    #[test]
    fn indicator_without_close_column_errors() {
        let df = polars::prelude::df!(
            "time" => &[0i64, 60_000],
            "price" => &[1.0, 2.0],
        )
        .unwrap();
        assert!(apply(&df, &[IndicatorSpec::new("RSI")]).is_err());
    }
}
