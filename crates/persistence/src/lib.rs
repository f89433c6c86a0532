//! Persistence layer for stratlab
//!
//! File-based snapshot storage for OHLCV frames: Parquet with zstd
//! compression, JSON metadata sidecars, numeric dtype optimization,
//! CSV export, and snapshot-directory scanning.

pub mod scan;
pub mod snapshot;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("file not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub use scan::{scan_snapshots, SnapshotInfo};
pub use snapshot::{
    estimated_size_mb, export_csv, load_frame, optimize_dtypes, save_frame, sidecar_path,
    SavedSnapshot,
};

/// Directories the pipeline reads and writes, created on construction.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub configs: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let paths = Self {
            input: root.join("historical_data"),
            output: root.join("output"),
            configs: root.join("configs"),
        };
        for dir in [&paths.input, &paths.output, &paths.configs] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_paths_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(tmp.path()).unwrap();
        assert!(paths.input.is_dir());
        assert!(paths.output.is_dir());
        assert!(paths.configs.is_dir());
    }
}
