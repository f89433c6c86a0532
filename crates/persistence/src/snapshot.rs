//! Snapshot save/load and numeric dtype optimization.
//!
//! A snapshot is a Parquet file (zstd-compressed) plus an optional JSON
//! sidecar carrying the pipeline metadata that produced it. Loading
//! dispatches on the file extension; CSV input is accepted for raw
//! historical data.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;
use polars::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::{StoreError, StoreResult};

/// Price columns eligible for Float32 downcasting.
const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub size_mb: f64,
}

/// Path of the JSON metadata sidecar for a snapshot file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

/// Write a frame as a zstd-compressed Parquet snapshot with an optional
/// metadata sidecar. Returns the written path and size in MB.
pub fn save_frame(
    df: &DataFrame,
    path: &Path,
    metadata: Option<&Value>,
) -> StoreResult<SavedSnapshot> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut out = df.clone();
    let file = File::create(path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut out)?;

    if let Some(meta) = metadata {
        let mut meta = meta.clone();
        if let Value::Object(map) = &mut meta {
            map.insert(
                "save_time".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            map.insert("compression".to_string(), Value::String("zstd".to_string()));
        }
        std::fs::write(sidecar_path(path), serde_json::to_vec_pretty(&meta)?)?;
    }

    let size_mb = std::fs::metadata(path)?.len() as f64 / (1024.0 * 1024.0);
    info!(
        path = %path.display(),
        rows = df.height(),
        size_mb = format!("{size_mb:.2}").as_str(),
        "snapshot written"
    );

    Ok(SavedSnapshot {
        path: path.to_path_buf(),
        size_mb,
    })
}

/// Load a snapshot (`.parquet`) or raw data file (`.csv`) together with its
/// metadata sidecar, if one exists.
pub fn load_frame(path: &Path) -> StoreResult<(DataFrame, Option<Value>)> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.display().to_string()));
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let df = match ext {
        "parquet" => ParquetReader::new(File::open(path)?).finish()?,
        "csv" => CsvReadOptions::default()
            .with_has_header(true)
            .with_parse_options(CsvParseOptions::default().with_try_parse_dates(true))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        other => return Err(StoreError::UnsupportedFormat(other.to_string())),
    };

    let sidecar = sidecar_path(path);
    let metadata = if sidecar.exists() {
        match std::fs::read_to_string(&sidecar) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(path = %sidecar.display(), error = %e, "unreadable metadata sidecar");
                    None
                }
            },
            Err(e) => {
                warn!(path = %sidecar.display(), error = %e, "failed to read metadata sidecar");
                None
            }
        }
    } else {
        None
    };

    info!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        "snapshot loaded"
    );

    Ok((df, metadata))
}

/// Downcast numeric columns where the value range allows it: price columns
/// to Float32, an integral volume column to Int32.
pub fn optimize_dtypes(df: &DataFrame) -> StoreResult<DataFrame> {
    let before_mb = estimated_size_mb(df);
    let mut out = df.clone();

    for name in PRICE_COLUMNS {
        let Ok(col) = df.column(name) else { continue };
        let series = col.as_materialized_series();
        let values = series.cast(&DataType::Float64)?;
        let ca = values.f64()?;
        let max = ca.max().unwrap_or(0.0);
        let min = ca.min().unwrap_or(0.0);
        if max < f32::MAX as f64 && min > f32::MIN as f64 {
            out.with_column(series.cast(&DataType::Float32)?)?;
        }
    }

    if let Ok(col) = df.column("volume") {
        let series = col.as_materialized_series();
        let values = series.cast(&DataType::Float64)?;
        let ca = values.f64()?;
        let max = ca.max().unwrap_or(0.0);
        let integral = ca.into_no_null_iter().all(|v| v.fract() == 0.0);
        if integral && max < i32::MAX as f64 {
            out.with_column(series.cast(&DataType::Int32)?)?;
        }
    }

    let after_mb = estimated_size_mb(&out);
    info!(
        before_mb = format!("{before_mb:.2}").as_str(),
        after_mb = format!("{after_mb:.2}").as_str(),
        "column dtypes optimized"
    );

    Ok(out)
}

/// Estimated in-memory size of a frame in MB.
pub fn estimated_size_mb(df: &DataFrame) -> f64 {
    df.estimated_size() as f64 / (1024.0 * 1024.0)
}

/// Export a frame to CSV for manual inspection.
pub fn export_csv(df: &DataFrame, path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = df.clone();
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut out)?;
    info!(path = %path.display(), rows = df.height(), "CSV exported");
    Ok(())
}
