//! End-to-end run of the staged workflow against a synthetic dataset.

use engine::frame::{self, ohlcv_frame};
use engine::indicators::IndicatorSpec;
use engine::stages::{
    FeatureStageConfig, IndicatorStageConfig, LoadConfig, PipelinePlan, ResampleStageConfig,
    VisualizationConfig,
};
use engine::strategy::{Condition, ConditionOp, StrategyConfig};
use engine::{
    run_pipeline, BacktestConfig, DataManager, OptimizeAlgorithm, OptimizeRequest, ResampleMethod,
    Stage, Timeframe,
};

/// Two days of one-minute bars with a sine-ish swing so oscillators fire.
fn write_input(dir: &std::path::Path) -> std::path::PathBuf {
    let rows = 2 * 24 * 60;
    let time: Vec<i64> = (0..rows as i64).map(|i| i * 60_000).collect();
    let close: Vec<f64> = (0..rows)
        .map(|i| 100.0 + 20.0 * ((i as f64) / 180.0).sin())
        .collect();
    let open: Vec<f64> = close.iter().map(|c| c - 0.2).collect();
    let high: Vec<f64> = close.iter().map(|c| c + 0.8).collect();
    let low: Vec<f64> = close.iter().map(|c| c - 0.8).collect();
    let volume: Vec<f64> = (0..rows).map(|i| 10.0 + (i % 7) as f64).collect();

    let df = ohlcv_frame(&time, &open, &high, &low, &close, &volume).unwrap();
    let path = dir.join("btc_minute.parquet");
    persistence::save_frame(&df, &path, None).unwrap();
    path
}

fn full_plan(input: std::path::PathBuf) -> PipelinePlan {
    PipelinePlan {
        load: LoadConfig {
            path: input,
            start_date: None,
            end_date: None,
        },
        resampling: Some(ResampleStageConfig {
            timeframes: vec![Timeframe::Hour1],
            method: ResampleMethod::Standard,
            drop_empty: true,
        }),
        indicators: Some(IndicatorStageConfig {
            indicators: vec![
                IndicatorSpec::new("RSI"),
                IndicatorSpec::new("BBANDS").with_param("window", 10.0),
            ],
        }),
        visualization: Some(VisualizationConfig {
            chart_count: 2,
            candles_per_chart: 12,
            timeframe: None,
        }),
        features: Some(FeatureStageConfig::default()),
        strategy: Some(StrategyConfig {
            entry_conditions: vec![Condition::new("RSI", ConditionOp::Lt, 45.0)],
            exit_conditions: vec![Condition::new("RSI", ConditionOp::Gt, 55.0)],
            ..Default::default()
        }),
        backtest: Some(BacktestConfig::default()),
        optimization: Some(OptimizeRequest {
            algorithm: OptimizeAlgorithm::RandomSearch,
            max_iterations: 20,
            seed: Some(11),
            ..Default::default()
        }),
        save_snapshots: true,
        emit_code: true,
    }
}

#[tokio::test]
async fn full_pipeline_runs_all_nine_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path());
    let mut mgr = DataManager::new(tmp.path()).unwrap();

    let report = run_pipeline(&mut mgr, &full_plan(input)).await.unwrap();

    assert_eq!(
        mgr.workflow().completed_stages,
        vec![
            Stage::DataLoader,
            Stage::Resampling,
            Stage::Indicators,
            Stage::Visualization,
            Stage::Features,
            Stage::StrategyBuilder,
            Stage::StrategyViz,
            Stage::Backtesting,
            Stage::Optimization,
        ]
    );

    // Stage outputs made it into the report.
    assert_eq!(report.segments.len(), 2);
    let signals = report.signals.expect("signal counts");
    assert!(signals.entries > 0);
    assert!(signals.exits > 0);
    let backtest = report.backtest.expect("backtest report");
    assert!(backtest.final_value > 0.0);
    let optimization = report.optimization.expect("optimization outcome");
    assert_eq!(optimization.total_iterations, 20);

    // Snapshots were written for the data-producing stages.
    assert!(!report.snapshots.is_empty());
    for path in &report.snapshots {
        assert!(path.is_file(), "missing snapshot {}", path.display());
    }

    // Snippets for every executed stage.
    assert_eq!(report.snippets.len(), 9);

    // The journal summary landed on disk.
    let summary_path = report.summary_path.expect("summary path");
    let raw = std::fs::read_to_string(summary_path).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        summary["workflow_state"]["completed_stages"]
            .as_array()
            .unwrap()
            .len(),
        9
    );
}

#[tokio::test]
async fn rerunning_stages_keeps_the_journal_duplicate_free() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path());
    let mut mgr = DataManager::new(tmp.path()).unwrap();

    let mut plan = full_plan(input);
    plan.save_snapshots = false;
    plan.emit_code = false;
    plan.optimization = None;

    run_pipeline(&mut mgr, &plan).await.unwrap();
    let first = mgr.workflow().completed_stages.clone();
    run_pipeline(&mut mgr, &plan).await.unwrap();

    assert_eq!(mgr.workflow().completed_stages, first);
}

#[tokio::test]
async fn date_filter_trims_the_loaded_range() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(tmp.path());
    let mut mgr = DataManager::new(tmp.path()).unwrap();

    let plan = PipelinePlan {
        load: LoadConfig {
            path: input,
            start_date: Some("1970-01-02".to_string()),
            end_date: None,
        },
        resampling: None,
        indicators: None,
        visualization: None,
        features: None,
        strategy: None,
        backtest: None,
        optimization: None,
        save_snapshots: false,
        emit_code: false,
    };
    run_pipeline(&mut mgr, &plan).await.unwrap();

    let dataset = mgr.get().unwrap();
    assert_eq!(dataset.total_rows(), 24 * 60);
    let df = dataset.primary().unwrap();
    let (start, _) = frame::time_bounds(df).unwrap();
    assert_eq!(start, 24 * 60 * 60_000);
}
