//! Parameter search for the optimization stage.
//!
//! Sweeps RSI-period / stop-loss / take-profit combinations with grid or
//! random sampling and scores each trial with simulated metrics nudged by
//! simple rules of thumb. The numbers rank parameter regions against each
//! other; they are not trade-level backtest results.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeAlgorithm {
    #[default]
    GridSearch,
    RandomSearch,
    /// Draws like random search; kept as a separate label for reporting.
    Bayesian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    #[default]
    SharpeRatio,
    TotalReturn,
    WinRate,
}

impl TargetMetric {
    pub fn value(self, trial: &TrialResult) -> f64 {
        match self {
            TargetMetric::SharpeRatio => trial.sharpe_ratio,
            TargetMetric::TotalReturn => trial.total_return,
            TargetMetric::WinRate => trial.win_rate,
        }
    }
}

/// Inclusive parameter bounds; steps are fixed (RSI 2, stop-loss 0.5,
/// take-profit 1.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRanges {
    pub rsi_min: u32,
    pub rsi_max: u32,
    pub sl_min: f64,
    pub sl_max: f64,
    pub tp_min: f64,
    pub tp_max: f64,
}

impl Default for ParamRanges {
    fn default() -> Self {
        Self {
            rsi_min: 10,
            rsi_max: 30,
            sl_min: 1.0,
            sl_max: 10.0,
            tp_min: 5.0,
            tp_max: 20.0,
        }
    }
}

impl ParamRanges {
    fn rsi_steps(&self) -> Vec<u32> {
        (self.rsi_min..=self.rsi_max).step_by(2).collect()
    }

    fn sl_steps(&self) -> Vec<f64> {
        float_steps(self.sl_min, self.sl_max, 0.5)
    }

    fn tp_steps(&self) -> Vec<f64> {
        float_steps(self.tp_min, self.tp_max, 1.0)
    }
}

fn float_steps(min: f64, max: f64, step: f64) -> Vec<f64> {
    let mut steps = Vec::new();
    let mut value = min;
    while value <= max + 1e-9 {
        steps.push(value);
        value += step;
    }
    steps
}

fn default_max_iterations() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    #[serde(default)]
    pub algorithm: OptimizeAlgorithm,
    #[serde(default)]
    pub target_metric: TargetMetric,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub ranges: ParamRanges,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for OptimizeRequest {
    fn default() -> Self {
        Self {
            algorithm: OptimizeAlgorithm::default(),
            target_metric: TargetMetric::default(),
            max_iterations: default_max_iterations(),
            ranges: ParamRanges::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    rsi_period: u32,
    stop_loss: f64,
    take_profit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub iteration: usize,
    pub rsi_period: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub trials: Vec<TrialResult>,
    pub best: TrialResult,
    pub algorithm: OptimizeAlgorithm,
    pub target_metric: TargetMetric,
    pub total_iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    Running,
    Complete,
    Error,
}

/// Shared progress between the stage driver and the search task.
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub total: AtomicU32,
    pub completed: AtomicU32,
    pub error_message: RwLock<Option<String>>,
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            total: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            error_message: RwLock::new(None),
        }
    }

    pub fn reset(&self) {
        *self.status.write().unwrap() = OptimizeStatus::Running;
        self.total.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        *self.error_message.write().unwrap() = None;
    }

    pub fn progress_pct(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), OptimizeStatus::Running)
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Search
// ============================================================================

fn build_candidates(request: &OptimizeRequest, rng: &mut StdRng) -> Vec<Candidate> {
    let rsi_steps = request.ranges.rsi_steps();
    let sl_steps = request.ranges.sl_steps();
    let tp_steps = request.ranges.tp_steps();
    if rsi_steps.is_empty() || sl_steps.is_empty() || tp_steps.is_empty() {
        return Vec::new();
    }

    match request.algorithm {
        OptimizeAlgorithm::GridSearch => {
            let mut grid = Vec::new();
            'outer: for &rsi in &rsi_steps {
                for &sl in &sl_steps {
                    for &tp in &tp_steps {
                        if grid.len() >= request.max_iterations {
                            break 'outer;
                        }
                        grid.push(Candidate {
                            rsi_period: rsi,
                            stop_loss: sl,
                            take_profit: tp,
                        });
                    }
                }
            }
            grid
        }
        OptimizeAlgorithm::RandomSearch | OptimizeAlgorithm::Bayesian => (0..request
            .max_iterations)
            .map(|_| Candidate {
                rsi_period: rsi_steps[rng.gen_range(0..rsi_steps.len())],
                stop_loss: sl_steps[rng.gen_range(0..sl_steps.len())],
                take_profit: tp_steps[rng.gen_range(0..tp_steps.len())],
            })
            .collect(),
    }
}

fn simulate_trial(candidate: Candidate, iteration: usize, rng: &mut StdRng) -> TrialResult {
    let mut sharpe_ratio = rng.gen_range(0.5..2.5);
    let mut total_return = rng.gen_range(-0.2..0.8);
    let mut win_rate = rng.gen_range(0.4..0.8);

    // Rules of thumb: aggressive entries, tight stops, wide targets.
    if candidate.rsi_period < 20 {
        sharpe_ratio *= 1.1;
        total_return *= 1.2;
    }
    if candidate.stop_loss < 3.0 {
        sharpe_ratio *= 0.9;
        win_rate *= 0.85;
    }
    if candidate.take_profit > 15.0 {
        total_return *= 1.1;
        win_rate *= 0.9;
    }

    TrialResult {
        iteration,
        rsi_period: candidate.rsi_period,
        stop_loss: candidate.stop_loss,
        take_profit: candidate.take_profit,
        sharpe_ratio,
        total_return,
        win_rate,
    }
}

/// Run the parameter search, reporting progress through `progress`.
pub async fn run_optimization(
    request: OptimizeRequest,
    progress: Arc<OptimizeProgress>,
) -> EngineResult<OptimizationOutcome> {
    progress.reset();

    let mut rng = match request.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let candidates = build_candidates(&request, &mut rng);
    if candidates.is_empty() {
        *progress.status.write().unwrap() = OptimizeStatus::Error;
        *progress.error_message.write().unwrap() = Some("empty parameter grid".to_string());
        return Err(EngineError::Unsupported(
            "optimization parameter grid is empty".to_string(),
        ));
    }

    progress
        .total
        .store(candidates.len() as u32, Ordering::Relaxed);
    info!(
        algorithm = ?request.algorithm,
        combinations = candidates.len(),
        "starting parameter search"
    );

    let mut trials = Vec::with_capacity(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        trials.push(simulate_trial(*candidate, i + 1, &mut rng));
        progress.completed.store((i + 1) as u32, Ordering::Relaxed);

        // Yield to the runtime every 10 iterations.
        if i % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let metric = request.target_metric;
    let best = trials
        .iter()
        .max_by(|a, b| metric.value(a).total_cmp(&metric.value(b)))
        .cloned()
        .ok_or_else(|| EngineError::Unsupported("no trials produced".to_string()))?;

    *progress.status.write().unwrap() = OptimizeStatus::Complete;
    info!(
        best_iteration = best.iteration,
        sharpe = best.sharpe_ratio,
        total_return = best.total_return,
        win_rate = best.win_rate,
        "parameter search complete"
    );

    Ok(OptimizationOutcome {
        total_iterations: trials.len(),
        trials,
        best,
        algorithm: request.algorithm,
        target_metric: request.target_metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_request(algorithm: OptimizeAlgorithm) -> OptimizeRequest {
        OptimizeRequest {
            algorithm,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn grid_is_truncated_to_max_iterations() {
        let mut rng = StdRng::seed_from_u64(0);
        let request = OptimizeRequest {
            max_iterations: 25,
            ..seeded_request(OptimizeAlgorithm::GridSearch)
        };
        let candidates = build_candidates(&request, &mut rng);
        assert_eq!(candidates.len(), 25);
    }

    #[test]
    fn random_search_draws_exactly_max_iterations() {
        let mut rng = StdRng::seed_from_u64(0);
        let request = seeded_request(OptimizeAlgorithm::RandomSearch);
        let candidates = build_candidates(&request, &mut rng);
        assert_eq!(candidates.len(), 100);

        let ranges = ParamRanges::default();
        for c in &candidates {
            assert!((ranges.rsi_min..=ranges.rsi_max).contains(&c.rsi_period));
            assert!(c.stop_loss >= ranges.sl_min && c.stop_loss <= ranges.sl_max);
            assert!(c.take_profit >= ranges.tp_min && c.take_profit <= ranges.tp_max);
        }
    }

    #[test]
    fn metric_ranges_respect_nudges() {
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..500 {
            let candidate = Candidate {
                rsi_period: 10 + (i % 20) as u32,
                stop_loss: 1.0 + (i % 18) as f64 * 0.5,
                take_profit: 5.0 + (i % 15) as f64,
            };
            let trial = simulate_trial(candidate, i, &mut rng);
            // Bounds of the draw times the widest applicable nudges.
            assert!(trial.sharpe_ratio > 0.4 && trial.sharpe_ratio < 2.8);
            assert!(trial.total_return > -0.3 && trial.total_return < 1.1);
            assert!(trial.win_rate > 0.3 && trial.win_rate < 0.81);
        }
    }

    #[tokio::test]
    async fn seeded_runs_are_reproducible() {
        let a = run_optimization(
            seeded_request(OptimizeAlgorithm::RandomSearch),
            Arc::new(OptimizeProgress::new()),
        )
        .await
        .unwrap();
        let b = run_optimization(
            seeded_request(OptimizeAlgorithm::RandomSearch),
            Arc::new(OptimizeProgress::new()),
        )
        .await
        .unwrap();

        assert_eq!(a.best.iteration, b.best.iteration);
        assert_eq!(a.best.sharpe_ratio, b.best.sharpe_ratio);
        assert_eq!(a.trials.len(), b.trials.len());
    }

    #[tokio::test]
    async fn best_trial_maximizes_the_target_metric() {
        for metric in [
            TargetMetric::SharpeRatio,
            TargetMetric::TotalReturn,
            TargetMetric::WinRate,
        ] {
            let request = OptimizeRequest {
                target_metric: metric,
                ..seeded_request(OptimizeAlgorithm::GridSearch)
            };
            let outcome = run_optimization(request, Arc::new(OptimizeProgress::new()))
                .await
                .unwrap();
            let max = outcome
                .trials
                .iter()
                .map(|t| metric.value(t))
                .fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(metric.value(&outcome.best), max);
        }
    }

    #[tokio::test]
    async fn progress_completes() {
        let progress = Arc::new(OptimizeProgress::new());
        let outcome = run_optimization(
            seeded_request(OptimizeAlgorithm::GridSearch),
            progress.clone(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.total_iterations, 100);
        assert!(!progress.is_running());
        assert_eq!(progress.progress_pct(), 100.0);
    }

    #[tokio::test]
    async fn degenerate_ranges_error_out() {
        let request = OptimizeRequest {
            ranges: ParamRanges {
                rsi_min: 30,
                rsi_max: 10,
                ..Default::default()
            },
            ..seeded_request(OptimizeAlgorithm::GridSearch)
        };
        let progress = Arc::new(OptimizeProgress::new());
        assert!(run_optimization(request, progress.clone()).await.is_err());
        assert!(matches!(
            *progress.status.read().unwrap(),
            OptimizeStatus::Error
        ));
    }
}
