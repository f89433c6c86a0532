//! Equal chart segmentation for the visualization stage.

use polars::prelude::DataFrame;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::frame;

#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub index: usize,
    pub rows: usize,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Split a frame into up to `chart_count` segments of equal width. The
/// segment width is `min(candles_per_chart, total_rows / chart_count)`;
/// trailing rows that do not fill a full segment are dropped rather than
/// forming a short final segment.
pub fn split_equal(
    df: &DataFrame,
    chart_count: usize,
    candles_per_chart: usize,
) -> EngineResult<Vec<DataFrame>> {
    if chart_count == 0 || candles_per_chart == 0 {
        return Err(EngineError::Unsupported(
            "chart_count and candles_per_chart must be positive".to_string(),
        ));
    }
    let total = df.height();
    if total == 0 {
        return Err(EngineError::EmptyFrame);
    }

    let segment_size = candles_per_chart.min(total / chart_count);
    if segment_size == 0 {
        return Ok(Vec::new());
    }

    let mut segments = Vec::with_capacity(chart_count);
    for i in 0..chart_count {
        let start = i * segment_size;
        if start >= total {
            break;
        }
        let len = segment_size.min(total - start);
        segments.push(df.slice(start as i64, len));
    }
    Ok(segments)
}

pub fn summarize(segments: &[DataFrame]) -> Vec<SegmentSummary> {
    segments
        .iter()
        .enumerate()
        .map(|(index, df)| {
            let bounds = frame::time_bounds(df);
            SegmentSummary {
                index,
                rows: df.height(),
                start: bounds.map(|(s, _)| frame::format_ms(s)),
                end: bounds.map(|(_, e)| frame::format_ms(e)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ohlcv_frame;

    fn frame_with_rows(rows: usize) -> DataFrame {
        let time: Vec<i64> = (0..rows as i64).map(|i| i * 60_000).collect();
        let price: Vec<f64> = (0..rows).map(|i| i as f64).collect();
        ohlcv_frame(&time, &price, &price, &price, &price, &price).unwrap()
    }

    #[test]
    fn even_split_covers_all_rows() {
        let df = frame_with_rows(100);
        let segments = split_equal(&df, 4, 25).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.height() == 25));
    }

    #[test]
    fn uneven_split_drops_remainder_rows() {
        // 103 rows over 4 charts: segment width 25, the trailing 3 rows
        // never appear in any segment.
        let df = frame_with_rows(103);
        let segments = split_equal(&df, 4, 100).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.height() == 25));
        let covered: usize = segments.iter().map(DataFrame::height).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn candles_per_chart_caps_segment_width() {
        let df = frame_with_rows(100);
        let segments = split_equal(&df, 2, 10).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.height() == 10));
    }

    #[test]
    fn more_charts_than_rows_yields_no_segments() {
        let df = frame_with_rows(3);
        let segments = split_equal(&df, 10, 100).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn summaries_carry_time_bounds() {
        let df = frame_with_rows(20);
        let segments = split_equal(&df, 2, 10).unwrap();
        let summaries = summarize(&segments);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].rows, 10);
        assert!(summaries[0].start.is_some());
        assert_ne!(summaries[0].start, summaries[1].start);
    }
}
