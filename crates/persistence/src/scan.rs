//! Snapshot-directory scanning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::StoreResult;

#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size_mb: f64,
    pub modified: Option<SystemTime>,
}

/// Scan a directory for saved snapshots, keyed by dataset name. The name is
/// the file stem up to the first underscore, matching the
/// `<name>_<stage>_<timestamp>` naming scheme used by the pipeline.
pub fn scan_snapshots(dir: &Path) -> StoreResult<BTreeMap<String, SnapshotInfo>> {
    let mut snapshots = BTreeMap::new();
    if !dir.exists() {
        return Ok(snapshots);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = stem.split('_').next().unwrap_or(stem).to_string();

        let (size_mb, modified) = match entry.metadata() {
            Ok(meta) => (
                meta.len() as f64 / (1024.0 * 1024.0),
                meta.modified().ok(),
            ),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat snapshot");
                continue;
            }
        };

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(stem)
            .to_string();

        snapshots.insert(
            name,
            SnapshotInfo {
                file_name,
                path,
                size_mb,
                modified,
            },
        );
    }

    info!(count = snapshots.len(), dir = %dir.display(), "snapshot directory scanned");
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn scan_groups_by_name_prefix_and_skips_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let df = df!("close" => &[1.0, 2.0]).unwrap();

        crate::save_frame(&df, &tmp.path().join("btc_resampling_1.parquet"), None).unwrap();
        crate::save_frame(&df, &tmp.path().join("btc_resampling_2.parquet"), None).unwrap();
        crate::save_frame(&df, &tmp.path().join("eth_indicators_1.parquet"), None).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let snapshots = scan_snapshots(tmp.path()).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.contains_key("btc"));
        assert!(snapshots.contains_key("eth"));
        assert!(snapshots["eth"].size_mb > 0.0);
    }

    #[test]
    fn scan_of_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshots = scan_snapshots(&tmp.path().join("nope")).unwrap();
        assert!(snapshots.is_empty());
    }
}
