//! OHLCV resampling into coarser time buckets.
//!
//! Aggregation is a single dynamic group-by on the time column:
//! open=first, high=max, low=min, close=last, volume=sum. The VWAP method
//! additionally emits a volume-weighted average price per bucket.

use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::frame::{self, TIME_COLUMN};
use crate::types::{ResampleMethod, Timeframe};

/// Resample a frame to the given timeframe. With `drop_empty` set, buckets
/// without source rows are absent; otherwise the full bucket grid is
/// materialized with nulls.
pub fn resample(
    df: &DataFrame,
    timeframe: Timeframe,
    method: ResampleMethod,
    drop_empty: bool,
) -> EngineResult<DataFrame> {
    if df.height() == 0 {
        return Err(EngineError::EmptyFrame);
    }
    let df = frame::ensure_time_column(df.clone())?;
    for required in ["open", "high", "low", "close"] {
        if !frame::has_column(&df, required) {
            return Err(EngineError::MissingColumn(required.to_string()));
        }
    }
    let has_volume = frame::has_column(&df, "volume");

    let mut aggs = vec![
        col("open").first(),
        col("high").max(),
        col("low").min(),
        col("close").last(),
    ];
    if has_volume {
        aggs.push(col("volume").sum());
    }
    if method == ResampleMethod::Vwap && has_volume {
        aggs.push(
            ((col("close") * col("volume")).sum() / col("volume").sum()).alias("vwap"),
        );
    }

    let rows_in = df.height();
    let every = Duration::parse(timeframe.every());
    let options = DynamicGroupOptions {
        index_column: TIME_COLUMN.into(),
        every,
        period: every,
        offset: Duration::parse("0s"),
        ..Default::default()
    };

    let mut resampled = df
        .lazy()
        .sort([TIME_COLUMN], Default::default())
        .group_by_dynamic(col(TIME_COLUMN), [], options)
        .agg(aggs)
        .sort([TIME_COLUMN], Default::default())
        .collect()?;

    if !drop_empty {
        resampled = resampled.upsample(Vec::<PlSmallStr>::new(), TIME_COLUMN, every)?;
    }

    info!(
        timeframe = timeframe.label(),
        rows_in = rows_in,
        rows_out = resampled.height(),
        "frame resampled"
    );
    Ok(resampled)
}

/// Resample into several timeframes at once, keyed by label.
pub fn resample_multi(
    df: &DataFrame,
    timeframes: &[Timeframe],
    method: ResampleMethod,
    drop_empty: bool,
) -> EngineResult<BTreeMap<String, DataFrame>> {
    let mut out = BTreeMap::new();
    for tf in timeframes {
        out.insert(
            tf.label().to_string(),
            resample(df, *tf, method, drop_empty)?,
        );
    }
    Ok(out)
}
