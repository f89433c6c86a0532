//! Shared pipeline state.
//!
//! One `DataManager` holds the current dataset, its accumulated metadata,
//! the history of replaced datasets, and the workflow journal. Stages read
//! the current dataset, transform it, and write back through `set`;
//! metadata merges last-write-wins with no conflict detection, and there is
//! no atomic commit across the dataset and its on-disk snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use persistence::{scan_snapshots, SnapshotInfo, StorePaths};

use crate::dataset::{Dataset, DatasetInfo};
use crate::error::{EngineError, EngineResult};
use crate::frame;
use crate::stages::Stage;

/// How many replaced datasets `cleanup` keeps.
const HISTORY_KEEP: usize = 10;

#[derive(Debug)]
pub struct HistoryEntry {
    pub dataset: Dataset,
    pub metadata: Map<String, Value>,
    pub source: Option<Stage>,
    pub replaced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveRecord {
    pub stage: Stage,
    pub file_path: PathBuf,
    pub size_mb: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowState {
    pub current_stage: Option<Stage>,
    pub completed_stages: Vec<Stage>,
    pub data_pipeline: Vec<SaveRecord>,
}

pub struct DataManager {
    paths: StorePaths,
    current: Option<Dataset>,
    metadata: Map<String, Value>,
    history: Vec<HistoryEntry>,
    workflow: WorkflowState,
    configs: BTreeMap<String, Value>,
}

impl DataManager {
    pub fn new(root: impl AsRef<Path>) -> EngineResult<Self> {
        Ok(Self {
            paths: StorePaths::new(root)?,
            current: None,
            metadata: Map::new(),
            history: Vec::new(),
            workflow: WorkflowState::default(),
            configs: BTreeMap::new(),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn get(&self) -> Option<&Dataset> {
        self.current.as_ref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn workflow(&self) -> &WorkflowState {
        &self.workflow
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Replace the current dataset. The previous dataset moves onto the
    /// history list with a snapshot of its metadata; new metadata merges
    /// last-write-wins.
    pub fn set(&mut self, dataset: Dataset, stage: Stage, extra: Option<Map<String, Value>>) {
        if let Some(previous) = self.current.take() {
            self.history.push(HistoryEntry {
                dataset: previous,
                metadata: self.metadata.clone(),
                source: self.workflow.current_stage,
                replaced_at: Utc::now(),
            });
        }

        let info = DatasetInfo::from_dataset(&dataset);
        self.current = Some(dataset);
        self.workflow.current_stage = Some(stage);

        self.metadata.insert(
            "source_stage".to_string(),
            Value::String(stage.slug().to_string()),
        );
        self.metadata.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        self.metadata.insert(
            "data_shape".to_string(),
            match info.shape {
                Some((rows, cols)) => json!([rows, cols]),
                None => Value::Null,
            },
        );
        self.metadata
            .insert("columns".to_string(), json!(info.columns));
        self.metadata.insert(
            "index_range".to_string(),
            match &info.time_range {
                Some((start, end)) => json!({ "start": start, "end": end }),
                None => Value::Null,
            },
        );

        if let Some(extra) = extra {
            for (key, value) in extra {
                self.metadata.insert(key, value);
            }
        }

        self.mark_completed(stage);
        info!(stage = %stage, rows = info.rows, "dataset updated");
    }

    /// Merge metadata and mark a stage complete without replacing the
    /// dataset. Used by stages that only annotate the pipeline.
    pub fn annotate(&mut self, stage: Stage, extra: Map<String, Value>) {
        for (key, value) in extra {
            self.metadata.insert(key, value);
        }
        self.workflow.current_stage = Some(stage);
        self.mark_completed(stage);
        info!(stage = %stage, "pipeline annotated");
    }

    fn mark_completed(&mut self, stage: Stage) {
        if !self.workflow.completed_stages.contains(&stage) {
            self.workflow.completed_stages.push(stage);
        }
    }

    /// Save the current dataset under `output/<filename>`. Multi-timeframe
    /// datasets write one snapshot per timeframe label. A failure leaves the
    /// in-memory dataset untouched.
    pub fn save(&mut self, filename: &str, stage: Stage) -> EngineResult<Vec<PathBuf>> {
        let dataset = self.current.clone().ok_or(EngineError::NoData)?;

        let mut export_meta = self.metadata.clone();
        export_meta.insert(
            "export_stage".to_string(),
            Value::String(stage.slug().to_string()),
        );
        export_meta.insert(
            "export_timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename)
            .to_string();

        let mut saved = Vec::new();
        match &dataset {
            Dataset::Single(df) => {
                let path = self.paths.output.join(format!("{stem}.parquet"));
                export_meta.insert(
                    "file_path".to_string(),
                    Value::String(path.display().to_string()),
                );
                let snap =
                    persistence::save_frame(df, &path, Some(&Value::Object(export_meta.clone())))?;
                self.workflow.data_pipeline.push(SaveRecord {
                    stage,
                    file_path: snap.path.clone(),
                    size_mb: snap.size_mb,
                    timestamp: Utc::now(),
                });
                saved.push(snap.path);
            }
            Dataset::Multi(frames) => {
                for (label, df) in frames {
                    let path = self.paths.output.join(format!("{stem}_{label}.parquet"));
                    let mut meta = export_meta.clone();
                    meta.insert("timeframe".to_string(), Value::String(label.clone()));
                    meta.insert(
                        "file_path".to_string(),
                        Value::String(path.display().to_string()),
                    );
                    let snap = persistence::save_frame(df, &path, Some(&Value::Object(meta)))?;
                    self.workflow.data_pipeline.push(SaveRecord {
                        stage,
                        file_path: snap.path.clone(),
                        size_mb: snap.size_mb,
                        timestamp: Utc::now(),
                    });
                    saved.push(snap.path);
                }
            }
        }
        Ok(saved)
    }

    /// Load a snapshot or CSV file and make it the current dataset. The
    /// sidecar's recorded source stage is adopted when present.
    pub fn load(&mut self, path: &Path) -> EngineResult<()> {
        let (df, sidecar) = persistence::load_frame(path)?;
        let df = frame::ensure_time_column(df)?;

        let (stage, extra) = match sidecar {
            Some(Value::Object(map)) => {
                let stage = map
                    .get("source_stage")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Stage>().ok())
                    .unwrap_or(Stage::DataLoader);
                (stage, Some(map))
            }
            _ => (Stage::DataLoader, None),
        };

        self.set(Dataset::Single(df), stage, extra);
        Ok(())
    }

    pub fn data_info(&self) -> Option<DatasetInfo> {
        self.current.as_ref().map(DatasetInfo::from_dataset)
    }

    /// Persist a stage configuration as `configs/<stage>_config.json`.
    pub fn set_stage_config(&mut self, stage: Stage, config: Value) -> EngineResult<()> {
        let path = self
            .paths
            .configs
            .join(format!("{}_config.json", stage.slug()));
        std::fs::write(&path, serde_json::to_vec_pretty(&config)?)?;
        self.configs.insert(stage.slug().to_string(), config);
        Ok(())
    }

    pub fn stage_config(&mut self, stage: Stage) -> Option<Value> {
        if let Some(config) = self.configs.get(stage.slug()) {
            return Some(config.clone());
        }
        let path = self
            .paths
            .configs
            .join(format!("{}_config.json", stage.slug()));
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(config) => {
                self.configs
                    .insert(stage.slug().to_string(), config.clone());
                Some(config)
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "unreadable stage config");
                None
            }
        }
    }

    pub fn available_files(&self) -> EngineResult<BTreeMap<String, SnapshotInfo>> {
        Ok(scan_snapshots(&self.paths.output)?)
    }

    /// Truncate history to the most recent entries.
    pub fn cleanup(&mut self) {
        if self.history.len() > HISTORY_KEEP {
            let excess = self.history.len() - HISTORY_KEEP;
            self.history.drain(..excess);
        }
    }

    /// Write the workflow summary (journal, metadata, configs) as JSON.
    pub fn export_summary(&self, path: &Path) -> EngineResult<PathBuf> {
        let summary = json!({
            "workflow_state": self.workflow,
            "current_metadata": self.metadata,
            "stage_configs": self.configs,
            "export_timestamp": Utc::now().to_rfc3339(),
        });
        std::fs::write(path, serde_json::to_vec_pretty(&summary)?)?;
        info!(path = %path.display(), "workflow summary exported");
        Ok(path.to_path_buf())
    }
}
