//! Strategy configuration and signal evaluation.
//!
//! A strategy is a list of entry conditions and exit conditions, each a
//! `(column, operator, threshold)` triple, combined with one global AND/OR.
//! Per-condition masks are built independently of the combinator; the
//! combinator only decides how they fold together.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl ConditionOp {
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            ConditionOp::Gt => value > threshold,
            ConditionOp::Lt => value < threshold,
            ConditionOp::Ge => value >= threshold,
            ConditionOp::Le => value <= threshold,
            ConditionOp::Eq => value == threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ConditionOp::Gt => ">",
            ConditionOp::Lt => "<",
            ConditionOp::Ge => ">=",
            ConditionOp::Le => "<=",
            ConditionOp::Eq => "==",
        }
    }
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ConditionOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(ConditionOp::Gt),
            "<" => Ok(ConditionOp::Lt),
            ">=" => Ok(ConditionOp::Ge),
            "<=" => Ok(ConditionOp::Le),
            "==" => Ok(ConditionOp::Eq),
            other => Err(EngineError::InvalidStrategy(format!(
                "unknown comparison operator: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: ConditionOp,
    pub threshold: f64,
}

impl Condition {
    pub fn new(column: &str, op: ConditionOp, threshold: f64) -> Self {
        Self {
            column: column.to_string(),
            op,
            threshold,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    /// Position size as a fraction of capital.
    pub position_size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            position_size: 1.0,
            stop_loss: 0.05,
            take_profit: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub entry_conditions: Vec<Condition>,
    #[serde(default)]
    pub exit_conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: ConditionLogic,
    /// Free-text logic expression collected from configuration. Carried in
    /// metadata; not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_logic: Option<String>,
    #[serde(default)]
    pub risk: RiskParams,
}

/// Entry and exit masks over a frame, one flag per row.
#[derive(Debug, Clone)]
pub struct SignalSet {
    pub entries: Vec<bool>,
    pub exits: Vec<bool>,
}

impl SignalSet {
    pub fn entry_count(&self) -> usize {
        self.entries.iter().filter(|&&b| b).count()
    }

    pub fn exit_count(&self) -> usize {
        self.exits.iter().filter(|&&b| b).count()
    }
}

/// Build the mask for one condition. Rows with NaN values never match.
pub fn condition_mask(df: &DataFrame, condition: &Condition) -> EngineResult<Vec<bool>> {
    let values = frame::column_f64(df, &condition.column)?;
    Ok(values
        .iter()
        .map(|&v| condition.op.apply(v, condition.threshold))
        .collect())
}

/// Fold a condition list into one mask with the global combinator.
/// Conditions naming absent columns are skipped with a log entry; with no
/// applicable conditions the mask is all false.
pub fn combine_conditions(
    df: &DataFrame,
    conditions: &[Condition],
    logic: ConditionLogic,
) -> EngineResult<Vec<bool>> {
    let mut combined: Option<Vec<bool>> = None;

    for condition in conditions {
        if !frame::has_column(df, &condition.column) {
            warn!(column = %condition.column, "condition references a missing column, skipping");
            continue;
        }
        let mask = condition_mask(df, condition)?;
        combined = Some(match combined {
            None => mask,
            Some(acc) => match logic {
                ConditionLogic::And => acc.iter().zip(&mask).map(|(a, b)| *a && *b).collect(),
                ConditionLogic::Or => acc.iter().zip(&mask).map(|(a, b)| *a || *b).collect(),
            },
        });
    }

    Ok(combined.unwrap_or_else(|| vec![false; df.height()]))
}

/// Evaluate entry and exit masks for a strategy over a frame.
pub fn evaluate(df: &DataFrame, config: &StrategyConfig) -> EngineResult<SignalSet> {
    Ok(SignalSet {
        entries: combine_conditions(df, &config.entry_conditions, config.logic)?,
        exits: combine_conditions(df, &config.exit_conditions, config.logic)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn frame_with_indicators() -> DataFrame {
        df!(
            "time" => &[0i64, 60_000, 120_000, 180_000],
            "close" => &[10.0, 20.0, 30.0, 40.0],
            "RSI" => &[25.0, 45.0, 65.0, 85.0],
            "ADX" => &[10.0, 30.0, 30.0, 10.0],
        )
        .unwrap()
    }

    #[test]
    fn single_condition_masks_rows() {
        let df = frame_with_indicators();
        let mask = condition_mask(&df, &Condition::new("RSI", ConditionOp::Lt, 50.0)).unwrap();
        assert_eq!(mask, vec![true, true, false, false]);
    }

    #[test]
    fn and_or_change_only_the_combination() {
        let df = frame_with_indicators();
        let conditions = vec![
            Condition::new("RSI", ConditionOp::Lt, 50.0),
            Condition::new("ADX", ConditionOp::Ge, 25.0),
        ];

        let per_condition: Vec<Vec<bool>> = conditions
            .iter()
            .map(|c| condition_mask(&df, c).unwrap())
            .collect();

        let anded = combine_conditions(&df, &conditions, ConditionLogic::And).unwrap();
        let ored = combine_conditions(&df, &conditions, ConditionLogic::Or).unwrap();

        assert_eq!(anded, vec![false, true, false, false]);
        assert_eq!(ored, vec![true, true, true, true]);

        // Per-condition masks are identical under either combinator.
        let after: Vec<Vec<bool>> = conditions
            .iter()
            .map(|c| condition_mask(&df, c).unwrap())
            .collect();
        assert_eq!(per_condition, after);
    }

    #[test]
    fn missing_columns_are_skipped() {
        let df = frame_with_indicators();
        let conditions = vec![
            Condition::new("MACD_macd", ConditionOp::Gt, 0.0),
            Condition::new("RSI", ConditionOp::Gt, 60.0),
        ];
        let mask = combine_conditions(&df, &conditions, ConditionLogic::And).unwrap();
        assert_eq!(mask, vec![false, false, true, true]);
    }

    #[test]
    fn no_applicable_conditions_yield_all_false() {
        let df = frame_with_indicators();
        let conditions = vec![Condition::new("BBANDS_upper", ConditionOp::Gt, 0.0)];
        let mask = combine_conditions(&df, &conditions, ConditionLogic::Or).unwrap();
        assert_eq!(mask, vec![false; 4]);
    }

    #[test]
    fn evaluate_builds_independent_entry_and_exit_masks() {
        let df = frame_with_indicators();
        let config = StrategyConfig {
            entry_conditions: vec![Condition::new("RSI", ConditionOp::Lt, 30.0)],
            exit_conditions: vec![Condition::new("RSI", ConditionOp::Gt, 70.0)],
            ..Default::default()
        };
        let signals = evaluate(&df, &config).unwrap();
        assert_eq!(signals.entry_count(), 1);
        assert_eq!(signals.exit_count(), 1);
        assert!(signals.entries[0]);
        assert!(signals.exits[3]);
    }

    #[test]
    fn operator_round_trips_through_serde() {
        let op: ConditionOp = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, ConditionOp::Ge);
        assert_eq!(serde_json::to_string(&op).unwrap(), "\">=\"");
        assert_eq!("<".parse::<ConditionOp>().unwrap(), ConditionOp::Lt);
    }

    #[test]
    fn nan_rows_never_match() {
        let df = df!(
            "RSI" => &[f64::NAN, 50.0],
        )
        .unwrap();
        let mask = condition_mask(&df, &Condition::new("RSI", ConditionOp::Lt, 100.0)).unwrap();
        assert_eq!(mask, vec![false, true]);
    }
}
