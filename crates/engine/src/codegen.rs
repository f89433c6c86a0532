//! Notebook snippet generation.
//!
//! Pure function from (stage, configuration) to an illustrative
//! pandas/vectorbt-flavored Python snippet, so a pipeline run can be
//! re-traced in a notebook. The snippets approximate what a stage did;
//! they are not a faithful replay. Stages without a dedicated template
//! yield a comment carrying the configuration dump.

use std::fmt::Write;

use chrono::Utc;
use serde_json::Value;

use crate::stages::Stage;

const BASIC_IMPORTS: &str = "import pandas as pd\nimport numpy as np\nfrom datetime import datetime, timedelta";
const ANALYTICS_IMPORTS: &str = "import vectorbtpro as vbt";
const PLOTTING_IMPORTS: &str = "import plotly.graph_objects as go";

pub fn generate(stage: Stage, config: &Value) -> String {
    match stage {
        Stage::DataLoader => data_loading_snippet(config),
        Stage::Resampling => resampling_snippet(config),
        Stage::Indicators => indicators_snippet(config),
        Stage::StrategyBuilder => strategy_snippet(config),
        Stage::Backtesting => backtest_snippet(config),
        other => fallback_snippet(other, config),
    }
}

fn header(title: &str) -> String {
    format!(
        "# {title}\n# generated by stratlab on {}\n\n{BASIC_IMPORTS}\n{ANALYTICS_IMPORTS}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )
}

fn cfg_str<'a>(config: &'a Value, key: &str, default: &'a str) -> &'a str {
    config.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn load_previous(config: &Value) -> String {
    let input = cfg_str(config, "input_file", "previous_stage.parquet");
    format!(
        "# load the previous stage's output\ndata = pd.read_parquet(\"{input}\")\nprint(f\"loaded: {{data.shape}}\")\n"
    )
}

fn save_footer(config: &Value) -> String {
    let output = cfg_str(config, "output_file", "stage_output.parquet");
    format!(
        "\n# persist for the next stage\ndata.to_parquet(\"{output}\", compression=\"zstd\")\nprint(f\"saved: {output}\")\n"
    )
}

fn data_loading_snippet(config: &Value) -> String {
    let path = cfg_str(config, "path", "historical_data/data.csv");
    let start = cfg_str(config, "start_date", "");
    let end = cfg_str(config, "end_date", "");

    let mut out = header("DATA LOADING");
    let _ = write!(
        out,
        r#"
def load_historical_data(file_path, start_date=None, end_date=None):
    if file_path.endswith(".parquet"):
        data = pd.read_parquet(file_path)
    else:
        data = pd.read_csv(file_path, index_col=0, parse_dates=True)
    if start_date:
        data = data[data.index >= pd.to_datetime(start_date)]
    if end_date:
        data = data[data.index <= pd.to_datetime(end_date)]
    print(f"loaded: {{data.shape}} | {{data.index[0]}} .. {{data.index[-1]}}")
    return data

data = load_historical_data(
    file_path="{path}",
    start_date="{start}",
    end_date="{end}",
)
"#
    );
    out.push_str(&save_footer(config));
    out
}

fn resampling_snippet(config: &Value) -> String {
    let timeframes = config
        .get("timeframes")
        .cloned()
        .unwrap_or_else(|| serde_json::json!(["1H", "4H", "1D"]));
    let method = cfg_str(config, "method", "standard");

    let mut out = header("RESAMPLING");
    out.push_str(&load_previous(config));
    let _ = write!(
        out,
        r#"
timeframes = {timeframes}
method = "{method}"

resampled = {{}}
for tf in timeframes:
    agg = {{"open": "first", "high": "max", "low": "min", "close": "last", "volume": "sum"}}
    frame = data.resample(tf).agg(agg)
    if method == "vwap":
        frame["vwap"] = (
            (data["close"] * data["volume"]).resample(tf).sum()
            / data["volume"].resample(tf).sum()
        )
    resampled[tf] = frame.dropna()
    print(f"{{tf}}: {{resampled[tf].shape}}")
"#
    );
    out.push_str(&save_footer(config));
    out
}

fn indicators_snippet(config: &Value) -> String {
    let indicators = config
        .get("indicators")
        .cloned()
        .unwrap_or_else(|| serde_json::json!([]));

    let mut out = header("INDICATORS");
    out.push_str(&load_previous(config));
    let _ = write!(
        out,
        r#"
indicators_config = {config}

for spec in indicators_config:
    name = spec["name"]
    params = spec.get("params", {{}})
    if name == "RSI":
        data["RSI"] = vbt.RSI.run(data["close"], window=params.get("window", 14)).rsi
    elif name == "MACD":
        macd = vbt.MACD.run(
            data["close"],
            fast_window=params.get("fast_window", 12),
            slow_window=params.get("slow_window", 26),
            signal_window=params.get("signal_window", 9),
        )
        data["MACD_macd"] = macd.macd
        data["MACD_signal"] = macd.signal
        data["MACD_histogram"] = macd.histogram
    elif name == "BBANDS":
        bb = vbt.BBANDS.run(data["close"], window=params.get("window", 20), alpha=params.get("alpha", 2))
        data["BBANDS_upper"] = bb.upper
        data["BBANDS_middle"] = bb.middle
        data["BBANDS_lower"] = bb.lower
    else:
        print(f"skipping {{name}}")
"#,
        config = pretty(&indicators)
    );
    out.push_str(&save_footer(config));
    out
}

fn strategy_snippet(config: &Value) -> String {
    let strategy = config
        .get("strategy")
        .cloned()
        .unwrap_or_else(|| config.clone());

    let mut out = header("STRATEGY");
    out.push_str(&load_previous(config));
    let _ = write!(
        out,
        r#"
strategy_config = {strategy}

def build_mask(conditions, logic):
    mask = None
    for cond in conditions:
        column, op, threshold = cond["column"], cond["op"], cond["threshold"]
        if column not in data.columns:
            continue
        series = data[column]
        current = {{
            ">": series > threshold,
            "<": series < threshold,
            ">=": series >= threshold,
            "<=": series <= threshold,
            "==": series == threshold,
        }}[op]
        if mask is None:
            mask = current
        elif logic == "AND":
            mask = mask & current
        else:
            mask = mask | current
    if mask is None:
        mask = pd.Series(False, index=data.index)
    return mask

logic = strategy_config.get("logic", "AND")
entries = build_mask(strategy_config.get("entry_conditions", []), logic)
exits = build_mask(strategy_config.get("exit_conditions", []), logic)
print(f"entries: {{entries.sum()}}, exits: {{exits.sum()}}")
"#,
        strategy = pretty(&strategy)
    );
    out.push_str(&save_footer(config));
    out
}

fn backtest_snippet(config: &Value) -> String {
    let backtest = config
        .get("backtest")
        .cloned()
        .unwrap_or_else(|| config.clone());

    let mut out = header("BACKTESTING");
    out.push_str(PLOTTING_IMPORTS);
    out.push('\n');
    out.push_str(&load_previous(config));
    let _ = write!(
        out,
        r#"
backtest_config = {backtest}

portfolio = vbt.Portfolio.from_signals(
    data["close"],
    entries=entries,
    exits=exits,
    init_cash=backtest_config.get("initial_cash", 10_000),
    fees=backtest_config.get("fees", 0.001),
    slippage=backtest_config.get("slippage", 0.001),
)

print(f"total return: {{portfolio.total_return():.2%}}")
print(f"sharpe ratio: {{portfolio.sharpe_ratio():.2f}}")
print(f"max drawdown: {{portfolio.max_drawdown():.2%}}")
portfolio.plot().show()
"#,
        backtest = pretty(&backtest)
    );
    out
}

fn fallback_snippet(stage: Stage, config: &Value) -> String {
    let mut out = format!("# no snippet generator for stage '{}' yet\n", stage.slug());
    out.push_str("# configuration:\n");
    for line in pretty(config).lines() {
        let _ = writeln!(out, "# {line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_loading_snippet_embeds_the_path() {
        let code = generate(
            Stage::DataLoader,
            &json!({"path": "historical_data/btc.csv", "start_date": "2024-01-01"}),
        );
        assert!(code.contains("historical_data/btc.csv"));
        assert!(code.contains("2024-01-01"));
        assert!(code.contains("import pandas as pd"));
    }

    #[test]
    fn resampling_snippet_lists_timeframes() {
        let code = generate(
            Stage::Resampling,
            &json!({"timeframes": ["1H", "4H"], "method": "vwap"}),
        );
        assert!(code.contains("[\"1H\",\"4H\"]"));
        assert!(code.contains("vwap"));
    }

    #[test]
    fn strategy_snippet_carries_conditions() {
        let code = generate(
            Stage::StrategyBuilder,
            &json!({"strategy": {"entry_conditions": [{"column": "RSI", "op": "<", "threshold": 30.0}], "logic": "AND"}}),
        );
        assert!(code.contains("\"RSI\""));
        assert!(code.contains("build_mask"));
    }

    #[test]
    fn unhandled_stages_fall_back_to_a_comment() {
        let code = generate(Stage::Optimization, &json!({"max_iterations": 50}));
        assert!(code.starts_with("# no snippet generator for stage 'optimization'"));
        assert!(code.contains("max_iterations"));
        // Every line is commented out.
        assert!(code.lines().all(|l| l.is_empty() || l.starts_with('#')));
    }
}
