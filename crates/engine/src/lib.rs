//! stratlab engine — staged strategy research over OHLCV frames.
//!
//! The pipeline mirrors a nine-stage workbench: data loading, resampling,
//! indicator calculation, chart segmentation, feature flags, strategy
//! construction, signal evaluation, a backtest projection, and a parameter
//! search. Stages share one `DataManager` holding the current dataset, its
//! accumulated metadata, and the workflow journal; each stage reads the
//! dataset, transforms it with one call into the engine, and writes back.

pub mod backtest;
pub mod catalog;
pub mod codegen;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod indicators;
pub mod manager;
pub mod optimizer;
pub mod resample;
pub mod segment;
pub mod stages;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use backtest::{BacktestConfig, BacktestReport};
pub use catalog::IndicatorCatalog;
pub use dataset::{Dataset, DatasetInfo};
pub use error::{EngineError, EngineResult};
pub use indicators::IndicatorSpec;
pub use manager::{DataManager, WorkflowState};
pub use optimizer::{
    run_optimization, OptimizationOutcome, OptimizeAlgorithm, OptimizeProgress, OptimizeRequest,
    OptimizeStatus, TargetMetric,
};
pub use segment::SegmentSummary;
pub use stages::{run_pipeline, PipelinePlan, PipelineReport, Stage};
pub use strategy::{Condition, ConditionLogic, ConditionOp, SignalSet, StrategyConfig};
pub use types::{ResampleMethod, Timeframe};
