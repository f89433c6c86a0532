//! Helpers around the polars frames that flow between stages.
//!
//! Every frame carries a `time` column (Datetime, millisecond precision)
//! plus OHLCV and arbitrary indicator columns. Columns are read back as
//! `f64` regardless of their physical dtype, so frames survive the dtype
//! optimization pass unchanged from the caller's point of view.

use polars::prelude::*;

use crate::error::{EngineError, EngineResult};

pub const TIME_COLUMN: &str = "time";
pub const OHLCV_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Build an OHLCV frame from epoch-millisecond timestamps.
pub fn ohlcv_frame(
    time_ms: &[i64],
    open: &[f64],
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
) -> EngineResult<DataFrame> {
    let df = df!(
        TIME_COLUMN => time_ms,
        "open" => open,
        "high" => high,
        "low" => low,
        "close" => close,
        "volume" => volume,
    )?;
    ensure_time_column(df)
}

/// Guarantee the frame has a `time` column of Datetime[ms]. A frame without
/// one gets its first column renamed, matching the "first column is the
/// index" convention of raw CSV input.
pub fn ensure_time_column(mut df: DataFrame) -> EngineResult<DataFrame> {
    let has_time = df
        .get_column_names()
        .iter()
        .any(|c| c.as_str() == TIME_COLUMN);
    if !has_time {
        let first = df
            .get_column_names()
            .first()
            .map(|c| c.to_string())
            .ok_or(EngineError::EmptyFrame)?;
        df.rename(&first, TIME_COLUMN.into())?;
    }

    let series = df.column(TIME_COLUMN)?.as_materialized_series().clone();
    if !matches!(
        series.dtype(),
        DataType::Datetime(TimeUnit::Milliseconds, _)
    ) {
        let cast = series.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        df.with_column(cast)?;
    }
    Ok(df)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Columns available as strategy-condition inputs: everything that is not
/// the time index or a base OHLCV column.
pub fn indicator_columns(df: &DataFrame) -> Vec<String> {
    column_names(df)
        .into_iter()
        .filter(|name| {
            let lowered = name.to_lowercase();
            lowered != TIME_COLUMN && !OHLCV_COLUMNS.contains(&lowered.as_str())
        })
        .collect()
}

/// Extract a column as `f64`, casting from whatever numeric dtype it holds.
/// Nulls become NaN.
pub fn column_f64(df: &DataFrame, name: &str) -> EngineResult<Vec<f64>> {
    let col = df
        .column(name)
        .map_err(|_| EngineError::MissingColumn(name.to_string()))?;
    let series = col.as_materialized_series().cast(&DataType::Float64)?;
    let ca = series.f64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Append or replace an `f64` column.
pub fn with_column_f64(df: &mut DataFrame, name: &str, values: Vec<f64>) -> EngineResult<()> {
    df.with_column(Series::new(name.into(), values))?;
    Ok(())
}

/// The `time` column as epoch milliseconds.
pub fn time_ms(df: &DataFrame) -> EngineResult<Vec<i64>> {
    let col = df
        .column(TIME_COLUMN)
        .map_err(|_| EngineError::MissingColumn(TIME_COLUMN.to_string()))?;
    let series = col.as_materialized_series().cast(&DataType::Int64)?;
    let ca = series.i64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0)).collect())
}

/// First and last timestamps in milliseconds, if any rows exist.
pub fn time_bounds(df: &DataFrame) -> Option<(i64, i64)> {
    let times = time_ms(df).ok()?;
    Some((*times.first()?, *times.last()?))
}

/// Inclusive timestamp filter over the `time` column.
pub fn filter_time_range(
    df: &DataFrame,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
) -> EngineResult<DataFrame> {
    if start_ms.is_none() && end_ms.is_none() {
        return Ok(df.clone());
    }
    let times = time_ms(df)?;
    let mask: Vec<bool> = times
        .iter()
        .map(|&t| start_ms.map_or(true, |s| t >= s) && end_ms.map_or(true, |e| t <= e))
        .collect();
    let mask = BooleanChunked::from_slice("mask".into(), &mask);
    Ok(df.filter(&mask)?)
}

/// Format an epoch-millisecond timestamp for display and metadata.
pub fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
