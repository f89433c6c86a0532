//! The nine pipeline stages and their runners.
//!
//! Each runner follows the same shape: read its configuration, transform
//! the current dataset with one call into the engine, and write the result
//! back through the data manager. `run_pipeline` chains the stages a plan
//! selects, saving snapshots and emitting notebook snippets along the way.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::backtest::{self, BacktestConfig, BacktestReport};
use crate::codegen;
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};
use crate::frame;
use crate::indicators::{self, IndicatorSpec};
use crate::manager::DataManager;
use crate::optimizer::{self, OptimizationOutcome, OptimizeProgress, OptimizeRequest};
use crate::resample;
use crate::segment::{self, SegmentSummary};
use crate::strategy::{self, SignalSet, StrategyConfig};
use crate::types::{ResampleMethod, Timeframe};

// ============================================================================
// Stage enum
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DataLoader,
    Resampling,
    Indicators,
    Visualization,
    Features,
    StrategyBuilder,
    StrategyViz,
    Backtesting,
    Optimization,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::DataLoader,
        Stage::Resampling,
        Stage::Indicators,
        Stage::Visualization,
        Stage::Features,
        Stage::StrategyBuilder,
        Stage::StrategyViz,
        Stage::Backtesting,
        Stage::Optimization,
    ];

    /// Stable identifier used in configs, metadata, and file names.
    pub fn slug(self) -> &'static str {
        match self {
            Stage::DataLoader => "data_loader",
            Stage::Resampling => "resampling",
            Stage::Indicators => "indicators",
            Stage::Visualization => "visualization",
            Stage::Features => "features",
            Stage::StrategyBuilder => "strategy_builder",
            Stage::StrategyViz => "strategy_viz",
            Stage::Backtesting => "backtesting",
            Stage::Optimization => "optimization",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::DataLoader => "Data Loader",
            Stage::Resampling => "Resampling",
            Stage::Indicators => "Indicators",
            Stage::Visualization => "Visualization",
            Stage::Features => "Features",
            Stage::StrategyBuilder => "Strategy Builder",
            Stage::StrategyViz => "Strategy Visualization",
            Stage::Backtesting => "Backtesting",
            Stage::Optimization => "Optimization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Stage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.slug() == s)
            .ok_or_else(|| EngineError::Unsupported(format!("unknown stage: {s}")))
    }
}

// ============================================================================
// Stage configurations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub path: PathBuf,
    /// Inclusive start date, `YYYY-MM-DD`.
    #[serde(default)]
    pub start_date: Option<String>,
    /// Inclusive end date (midnight boundary), `YYYY-MM-DD`.
    #[serde(default)]
    pub end_date: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleStageConfig {
    pub timeframes: Vec<Timeframe>,
    #[serde(default)]
    pub method: ResampleMethod,
    #[serde(default = "default_true")]
    pub drop_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorStageConfig {
    pub indicators: Vec<IndicatorSpec>,
}

fn default_chart_count() -> usize {
    1
}

fn default_candles_per_chart() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationConfig {
    #[serde(default = "default_chart_count")]
    pub chart_count: usize,
    #[serde(default = "default_candles_per_chart")]
    pub candles_per_chart: usize,
    /// Timeframe label to chart in multi mode; first timeframe otherwise.
    #[serde(default)]
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStageConfig {
    #[serde(default = "FeatureStageConfig::default_flags")]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub strategy_parameters: Map<String, Value>,
}

impl Default for FeatureStageConfig {
    fn default() -> Self {
        Self {
            flags: Self::default_flags(),
            strategy_parameters: Map::new(),
        }
    }
}

impl FeatureStageConfig {
    pub fn default_flags() -> BTreeMap<String, bool> {
        BTreeMap::from([
            ("memory_optimization".to_string(), true),
            ("compression".to_string(), true),
            ("metadata_tracking".to_string(), true),
            ("data_validation".to_string(), false),
        ])
    }
}

// ============================================================================
// Stage runners
// ============================================================================

fn parse_date_ms(date: &Option<String>) -> EngineResult<Option<i64>> {
    let Some(date) = date else { return Ok(None) };
    if date.is_empty() {
        return Ok(None);
    }
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| EngineError::Unsupported(format!("invalid date {date}: {e}")))?;
    let midnight = parsed
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| EngineError::Unsupported(format!("invalid date {date}")))?;
    Ok(Some(midnight.and_utc().timestamp_millis()))
}

/// Stage 1: load a raw file, optionally filter to a date range.
pub fn run_data_loader(mgr: &mut DataManager, config: &LoadConfig) -> EngineResult<()> {
    let (df, _) = persistence::load_frame(&config.path)?;
    let df = frame::ensure_time_column(df)?;
    let rows_loaded = df.height();

    let start_ms = parse_date_ms(&config.start_date)?;
    let end_ms = parse_date_ms(&config.end_date)?;
    let df = frame::filter_time_range(&df, start_ms, end_ms)?;

    let mut meta = Map::new();
    meta.insert(
        "source_file".to_string(),
        Value::String(config.path.display().to_string()),
    );
    meta.insert(
        "timeframe_filter".to_string(),
        json!({
            "start_date": config.start_date,
            "end_date": config.end_date,
            "rows_before": rows_loaded,
            "rows_after": df.height(),
        }),
    );

    mgr.set(Dataset::Single(df), Stage::DataLoader, Some(meta));
    Ok(())
}

/// Stage 2: resample into one or more timeframes.
pub fn run_resampling(mgr: &mut DataManager, config: &ResampleStageConfig) -> EngineResult<()> {
    if config.timeframes.is_empty() {
        return Err(EngineError::InvalidTimeframe(
            "no target timeframes selected".to_string(),
        ));
    }
    let source = match mgr.get().ok_or(EngineError::NoData)? {
        Dataset::Single(df) => df.clone(),
        Dataset::Multi(_) => {
            return Err(EngineError::Unsupported(
                "resampling expects a single-timeframe dataset".to_string(),
            ))
        }
    };
    let original_shape = (source.height(), source.width());

    let mut resampled =
        resample::resample_multi(&source, &config.timeframes, config.method, config.drop_empty)?;

    let mut meta = Map::new();
    if resampled.len() == 1 {
        let Some((label, df)) = resampled.pop_first() else {
            return Err(EngineError::EmptyFrame);
        };
        meta.insert("resampling_mode".to_string(), json!("single"));
        meta.insert("timeframe".to_string(), json!(label));
        meta.insert("original_shape".to_string(), json!(original_shape));
        meta.insert(
            "resampled_shape".to_string(),
            json!([df.height(), df.width()]),
        );
        mgr.set(Dataset::Single(df), Stage::Resampling, Some(meta));
    } else {
        meta.insert("resampling_mode".to_string(), json!("multi"));
        meta.insert(
            "timeframes".to_string(),
            json!(resampled.keys().cloned().collect::<Vec<_>>()),
        );
        meta.insert("original_shape".to_string(), json!(original_shape));
        mgr.set(Dataset::Multi(resampled), Stage::Resampling, Some(meta));
    }
    Ok(())
}

/// Stage 3: compute the configured indicators, per timeframe in multi mode.
pub fn run_indicators(mgr: &mut DataManager, config: &IndicatorStageConfig) -> EngineResult<()> {
    if config.indicators.is_empty() {
        return Err(EngineError::Unsupported(
            "no indicators selected".to_string(),
        ));
    }
    let dataset = mgr.get().cloned().ok_or(EngineError::NoData)?;

    let mut meta = Map::new();
    let enhanced = match dataset {
        Dataset::Single(df) => {
            let (df, applied) = indicators::apply(&df, &config.indicators)?;
            meta.insert("indicators_added".to_string(), json!(applied));
            meta.insert("is_multi_timeframe".to_string(), json!(false));
            Dataset::Single(df)
        }
        Dataset::Multi(frames) => {
            let mut enhanced = BTreeMap::new();
            let mut added = Vec::new();
            for (label, df) in frames {
                let (df, applied) = indicators::apply(&df, &config.indicators)?;
                for name in applied {
                    added.push(format!("{name}_{label}"));
                }
                enhanced.insert(label, df);
            }
            meta.insert("indicators_added".to_string(), json!(added));
            meta.insert("is_multi_timeframe".to_string(), json!(true));
            meta.insert(
                "timeframes".to_string(),
                json!(enhanced.keys().cloned().collect::<Vec<_>>()),
            );
            Dataset::Multi(enhanced)
        }
    };

    mgr.set(enhanced, Stage::Indicators, Some(meta));
    Ok(())
}

/// Stage 4: equal chart segmentation over one frame; annotates the pipeline
/// without replacing the dataset.
pub fn run_visualization(
    mgr: &mut DataManager,
    config: &VisualizationConfig,
) -> EngineResult<Vec<SegmentSummary>> {
    let dataset = mgr.get().ok_or(EngineError::NoData)?;
    let df = match (&config.timeframe, dataset) {
        (Some(label), Dataset::Multi(frames)) => frames.get(label).ok_or_else(|| {
            EngineError::Unsupported(format!("timeframe {label} not present in dataset"))
        })?,
        _ => dataset.primary()?,
    };

    let segments = segment::split_equal(df, config.chart_count, config.candles_per_chart)?;
    let summaries = segment::summarize(&segments);

    let mut meta = Map::new();
    meta.insert(
        "charts".to_string(),
        json!({
            "chart_count": config.chart_count,
            "candles_per_chart": config.candles_per_chart,
            "segments": summaries.len(),
        }),
    );
    mgr.annotate(Stage::Visualization, meta);
    Ok(summaries)
}

/// Stage 5: apply performance/data feature flags; dtype optimization runs
/// when `memory_optimization` is set.
pub fn run_features(mgr: &mut DataManager, config: &FeatureStageConfig) -> EngineResult<()> {
    let dataset = mgr.get().cloned().ok_or(EngineError::NoData)?;

    let optimized = if config
        .flags
        .get("memory_optimization")
        .copied()
        .unwrap_or(true)
    {
        match dataset {
            Dataset::Single(df) => Dataset::Single(persistence::optimize_dtypes(&df)?),
            Dataset::Multi(frames) => {
                let mut out = BTreeMap::new();
                for (label, df) in frames {
                    out.insert(label, persistence::optimize_dtypes(&df)?);
                }
                Dataset::Multi(out)
            }
        }
    } else {
        dataset
    };

    let mut meta = Map::new();
    meta.insert("features_applied".to_string(), json!(config.flags));
    meta.insert(
        "strategy_parameters".to_string(),
        Value::Object(config.strategy_parameters.clone()),
    );
    meta.insert(
        "features_timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    mgr.set(optimized, Stage::Features, Some(meta));
    Ok(())
}

/// Stage 6: validate and record the strategy configuration.
pub fn run_strategy_builder(mgr: &mut DataManager, config: &StrategyConfig) -> EngineResult<()> {
    if config.entry_conditions.is_empty() && config.exit_conditions.is_empty() {
        return Err(EngineError::InvalidStrategy(
            "at least one entry or exit condition is required".to_string(),
        ));
    }
    let dataset = mgr.get().cloned().ok_or(EngineError::NoData)?;

    let mut meta = Map::new();
    meta.insert("strategy_config".to_string(), serde_json::to_value(config)?);
    meta.insert("strategy_created".to_string(), json!(true));
    meta.insert(
        "strategy_timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    mgr.set(dataset, Stage::StrategyBuilder, Some(meta));
    Ok(())
}

/// Stage 7: evaluate entry/exit masks from the recorded strategy over the
/// primary frame.
pub fn run_strategy_viz(mgr: &mut DataManager) -> EngineResult<SignalSet> {
    let config: StrategyConfig = mgr
        .metadata()
        .get("strategy_config")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| {
            EngineError::InvalidStrategy("no strategy configured; run the builder first".to_string())
        })?;

    let dataset = mgr.get().ok_or(EngineError::NoData)?;
    let signals = strategy::evaluate(dataset.primary()?, &config)?;

    let mut meta = Map::new();
    meta.insert(
        "signal_counts".to_string(),
        json!({
            "entries": signals.entry_count(),
            "exits": signals.exit_count(),
        }),
    );
    mgr.annotate(Stage::StrategyViz, meta);
    Ok(signals)
}

/// Stage 8: run the backtest projection over the primary frame.
pub fn run_backtesting(
    mgr: &mut DataManager,
    config: &BacktestConfig,
) -> EngineResult<BacktestReport> {
    if !mgr.metadata().contains_key("strategy_config") {
        return Err(EngineError::InvalidStrategy(
            "no strategy configured; run the builder first".to_string(),
        ));
    }
    let dataset = mgr.get().ok_or(EngineError::NoData)?;
    let report = backtest::run(dataset.primary()?, config)?;

    let mut meta = Map::new();
    meta.insert(
        "backtest_results".to_string(),
        serde_json::to_value(&report)?,
    );
    mgr.annotate(Stage::Backtesting, meta);
    Ok(report)
}

/// Stage 9: run the parameter search and record the best trial.
pub async fn run_optimization_stage(
    mgr: &mut DataManager,
    config: &OptimizeRequest,
    progress: Arc<OptimizeProgress>,
) -> EngineResult<OptimizationOutcome> {
    mgr.get().ok_or(EngineError::NoData)?;
    let outcome = optimizer::run_optimization(config.clone(), progress).await?;

    let mut meta = Map::new();
    meta.insert(
        "optimization_results".to_string(),
        json!({
            "best": serde_json::to_value(&outcome.best)?,
            "algorithm": serde_json::to_value(outcome.algorithm)?,
            "target_metric": serde_json::to_value(outcome.target_metric)?,
            "total_iterations": outcome.total_iterations,
        }),
    );
    mgr.annotate(Stage::Optimization, meta);
    Ok(outcome)
}

// ============================================================================
// Pipeline plan
// ============================================================================

/// Which stages to run, with their configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePlan {
    pub load: LoadConfig,
    #[serde(default)]
    pub resampling: Option<ResampleStageConfig>,
    #[serde(default)]
    pub indicators: Option<IndicatorStageConfig>,
    #[serde(default)]
    pub visualization: Option<VisualizationConfig>,
    #[serde(default)]
    pub features: Option<FeatureStageConfig>,
    #[serde(default)]
    pub strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub backtest: Option<BacktestConfig>,
    #[serde(default)]
    pub optimization: Option<OptimizeRequest>,
    /// Save a snapshot after every stage that produces data.
    #[serde(default)]
    pub save_snapshots: bool,
    /// Emit a notebook snippet for every executed stage.
    #[serde(default)]
    pub emit_code: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalCounts {
    pub entries: usize,
    pub exits: usize,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub segments: Vec<SegmentSummary>,
    pub signals: Option<SignalCounts>,
    pub backtest: Option<BacktestReport>,
    pub optimization: Option<OptimizationOutcome>,
    pub snapshots: Vec<PathBuf>,
    pub snippets: Vec<(Stage, String)>,
    pub summary_path: Option<PathBuf>,
}

fn after_stage(
    mgr: &mut DataManager,
    plan: &PipelinePlan,
    stage: Stage,
    config: Value,
    snapshot: bool,
    report: &mut PipelineReport,
) -> EngineResult<()> {
    mgr.set_stage_config(stage, config.clone())?;
    if plan.save_snapshots && snapshot {
        let filename = format!("{}_{}", stage.slug(), Utc::now().format("%Y%m%d_%H%M%S"));
        report.snapshots.extend(mgr.save(&filename, stage)?);
    }
    if plan.emit_code {
        report.snippets.push((stage, codegen::generate(stage, &config)));
    }
    Ok(())
}

/// Run the staged workflow a plan selects, in order.
pub async fn run_pipeline(
    mgr: &mut DataManager,
    plan: &PipelinePlan,
) -> EngineResult<PipelineReport> {
    let mut report = PipelineReport::default();

    info!(path = %plan.load.path.display(), "pipeline starting");
    run_data_loader(mgr, &plan.load)?;
    after_stage(
        mgr,
        plan,
        Stage::DataLoader,
        serde_json::to_value(&plan.load)?,
        true,
        &mut report,
    )?;

    if let Some(config) = &plan.resampling {
        run_resampling(mgr, config)?;
        after_stage(
            mgr,
            plan,
            Stage::Resampling,
            serde_json::to_value(config)?,
            true,
            &mut report,
        )?;
    }

    if let Some(config) = &plan.indicators {
        run_indicators(mgr, config)?;
        after_stage(
            mgr,
            plan,
            Stage::Indicators,
            serde_json::to_value(config)?,
            true,
            &mut report,
        )?;
    }

    if let Some(config) = &plan.visualization {
        report.segments = run_visualization(mgr, config)?;
        after_stage(
            mgr,
            plan,
            Stage::Visualization,
            serde_json::to_value(config)?,
            false,
            &mut report,
        )?;
    }

    if let Some(config) = &plan.features {
        run_features(mgr, config)?;
        after_stage(
            mgr,
            plan,
            Stage::Features,
            serde_json::to_value(config)?,
            true,
            &mut report,
        )?;
    }

    if let Some(config) = &plan.strategy {
        run_strategy_builder(mgr, config)?;
        after_stage(
            mgr,
            plan,
            Stage::StrategyBuilder,
            serde_json::to_value(config)?,
            false,
            &mut report,
        )?;

        let signals = run_strategy_viz(mgr)?;
        report.signals = Some(SignalCounts {
            entries: signals.entry_count(),
            exits: signals.exit_count(),
        });
        after_stage(mgr, plan, Stage::StrategyViz, Value::Null, false, &mut report)?;
    }

    if let Some(config) = &plan.backtest {
        report.backtest = Some(run_backtesting(mgr, config)?);
        after_stage(
            mgr,
            plan,
            Stage::Backtesting,
            serde_json::to_value(config)?,
            false,
            &mut report,
        )?;
    }

    if let Some(config) = &plan.optimization {
        let progress = Arc::new(OptimizeProgress::new());
        report.optimization = Some(run_optimization_stage(mgr, config, progress).await?);
        after_stage(
            mgr,
            plan,
            Stage::Optimization,
            serde_json::to_value(config)?,
            false,
            &mut report,
        )?;
    }

    mgr.cleanup();
    let summary_path = mgr.paths().output.join("workflow_summary.json");
    report.summary_path = Some(mgr.export_summary(&summary_path)?);

    info!(
        completed = mgr.workflow().completed_stages.len(),
        "pipeline finished"
    );
    Ok(report)
}
