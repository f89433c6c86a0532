//! The dataset handed from stage to stage.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::frame;

/// Either one frame, or one frame per timeframe label in multi-timeframe
/// mode. Every stage that consumes a dataset branches on this shape.
#[derive(Debug, Clone)]
pub enum Dataset {
    Single(DataFrame),
    Multi(BTreeMap<String, DataFrame>),
}

impl Dataset {
    pub fn is_multi(&self) -> bool {
        matches!(self, Dataset::Multi(_))
    }

    pub fn timeframes(&self) -> Vec<String> {
        match self {
            Dataset::Single(_) => Vec::new(),
            Dataset::Multi(frames) => frames.keys().cloned().collect(),
        }
    }

    /// The frame used by stages that operate on one table: the single frame,
    /// or the first timeframe in multi mode.
    pub fn primary(&self) -> EngineResult<&DataFrame> {
        match self {
            Dataset::Single(df) => Ok(df),
            Dataset::Multi(frames) => frames.values().next().ok_or(EngineError::EmptyFrame),
        }
    }

    /// (rows, columns) for a single frame; multi-timeframe datasets have no
    /// single shape.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Dataset::Single(df) => Some((df.height(), df.width())),
            Dataset::Multi(_) => None,
        }
    }

    pub fn total_rows(&self) -> usize {
        match self {
            Dataset::Single(df) => df.height(),
            Dataset::Multi(frames) => frames.values().map(DataFrame::height).sum(),
        }
    }

    /// Column names of the primary frame.
    pub fn columns(&self) -> Vec<String> {
        self.primary().map(frame::column_names).unwrap_or_default()
    }

    pub fn estimated_size_mb(&self) -> f64 {
        match self {
            Dataset::Single(df) => persistence::estimated_size_mb(df),
            Dataset::Multi(frames) => frames.values().map(persistence::estimated_size_mb).sum(),
        }
    }
}

/// Display summary of a dataset, also used to populate metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfo {
    pub kind: String,
    pub rows: usize,
    pub shape: Option<(usize, usize)>,
    pub columns: Vec<String>,
    pub timeframes: Vec<String>,
    pub memory_mb: f64,
    pub time_range: Option<(String, String)>,
}

impl DatasetInfo {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let time_range = dataset
            .primary()
            .ok()
            .and_then(frame::time_bounds)
            .map(|(start, end)| (frame::format_ms(start), frame::format_ms(end)));

        Self {
            kind: if dataset.is_multi() { "multi" } else { "single" }.to_string(),
            rows: dataset.total_rows(),
            shape: dataset.shape(),
            columns: dataset.columns(),
            timeframes: dataset.timeframes(),
            memory_mb: dataset.estimated_size_mb(),
            time_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ohlcv_frame;

    fn small_frame() -> DataFrame {
        ohlcv_frame(
            &[0, 60_000],
            &[1.0, 2.0],
            &[2.0, 3.0],
            &[0.5, 1.5],
            &[1.5, 2.5],
            &[10.0, 20.0],
        )
        .unwrap()
    }

    #[test]
    fn single_dataset_reports_shape() {
        let dataset = Dataset::Single(small_frame());
        assert!(!dataset.is_multi());
        assert_eq!(dataset.shape(), Some((2, 6)));
        assert_eq!(dataset.total_rows(), 2);
    }

    #[test]
    fn multi_dataset_has_no_single_shape() {
        let mut frames = BTreeMap::new();
        frames.insert("1H".to_string(), small_frame());
        frames.insert("4H".to_string(), small_frame());
        let dataset = Dataset::Multi(frames);

        assert!(dataset.is_multi());
        assert_eq!(dataset.shape(), None);
        assert_eq!(dataset.total_rows(), 4);
        assert_eq!(dataset.timeframes(), vec!["1H", "4H"]);
    }

    #[test]
    fn info_reflects_primary_frame() {
        let dataset = Dataset::Single(small_frame());
        let info = DatasetInfo::from_dataset(&dataset);
        assert_eq!(info.kind, "single");
        assert!(info.columns.contains(&"close".to_string()));
        assert!(info.time_range.is_some());
    }
}
