//! stratlab — staged strategy research over OHLCV market data.
//!
//! Usage:
//!   stratlab pipeline --plan plan.json     — run the staged workflow
//!   stratlab scan                          — list saved snapshots
//!   stratlab inspect <file>                — summarize a snapshot or CSV
//!   stratlab export-csv <file> <out>       — export a snapshot to CSV
//!   stratlab catalog --search rsi          — query the indicator catalog
//!   stratlab codegen --stage resampling    — print a notebook snippet

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::{
    codegen, frame, run_pipeline, DataManager, DatasetInfo, IndicatorCatalog, PipelinePlan, Stage,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stratlab")]
#[command(about = "Staged strategy research over OHLCV market data", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Workspace root (defaults to STRATLAB_ROOT, then the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the staged pipeline described by a JSON plan
    Pipeline {
        /// Path to the pipeline plan
        #[arg(long)]
        plan: PathBuf,
    },
    /// List saved snapshots in the output directory
    Scan,
    /// Print summary information for a snapshot or CSV file
    Inspect { file: PathBuf },
    /// Export a snapshot to CSV for manual inspection
    ExportCsv { file: PathBuf, out: PathBuf },
    /// Query the indicator catalog
    Catalog {
        /// Catalog JSON path (defaults to STRATLAB_CATALOG or catalog.json)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Substring to search for
        #[arg(long)]
        search: Option<String>,
    },
    /// Print the notebook snippet for a stage configuration
    Codegen {
        /// Stage slug (data_loader, resampling, indicators, ...)
        #[arg(long)]
        stage: String,
        /// JSON file with the stage configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,stratlab=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,stratlab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let root = cli
        .root
        .or_else(|| std::env::var("STRATLAB_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Pipeline { plan } => cmd_pipeline(&root, &plan).await?,
        Commands::Scan => cmd_scan(&root)?,
        Commands::Inspect { file } => cmd_inspect(&file)?,
        Commands::ExportCsv { file, out } => cmd_export_csv(&file, &out)?,
        Commands::Catalog { path, search } => cmd_catalog(path, search),
        Commands::Codegen { stage, config } => cmd_codegen(&stage, config.as_deref())?,
    }

    Ok(())
}

async fn cmd_pipeline(root: &Path, plan_path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(plan_path)
        .with_context(|| format!("reading plan {}", plan_path.display()))?;
    let plan: PipelinePlan =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", plan_path.display()))?;

    let mut mgr = DataManager::new(root)?;
    let report = match run_pipeline(&mut mgr, &plan).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "pipeline failed");
            return Err(e.into());
        }
    };

    if !report.segments.is_empty() {
        println!("charts:");
        for segment in &report.segments {
            println!(
                "  #{} {} rows  {} .. {}",
                segment.index + 1,
                segment.rows,
                segment.start.as_deref().unwrap_or("-"),
                segment.end.as_deref().unwrap_or("-"),
            );
        }
    }

    if let Some(signals) = &report.signals {
        println!(
            "signals: {} entries, {} exits",
            signals.entries, signals.exits
        );
    }

    if let Some(backtest) = &report.backtest {
        println!("backtest projection:");
        println!("  total return:  {:>9.2}%", backtest.total_return * 100.0);
        println!("  sharpe ratio:  {:>9.2}", backtest.sharpe_ratio);
        println!("  max drawdown:  {:>9.2}%", backtest.max_drawdown * 100.0);
        println!("  win rate:      {:>9.2}%", backtest.win_rate * 100.0);
        println!("  final value:   {:>12.2}", backtest.final_value);
    }

    if let Some(optimization) = &report.optimization {
        let best = &optimization.best;
        println!(
            "best parameters after {} trials: rsi={} sl={:.1} tp={:.1} (sharpe {:.2}, return {:.2}%, win {:.2}%)",
            optimization.total_iterations,
            best.rsi_period,
            best.stop_loss,
            best.take_profit,
            best.sharpe_ratio,
            best.total_return * 100.0,
            best.win_rate * 100.0,
        );
    }

    for (stage, snippet) in &report.snippets {
        let path = mgr.paths().output.join(format!("{}_snippet.py", stage.slug()));
        std::fs::write(&path, snippet)
            .with_context(|| format!("writing snippet {}", path.display()))?;
        info!(path = %path.display(), "snippet written");
    }

    for path in &report.snapshots {
        println!("snapshot: {}", path.display());
    }
    if let Some(summary) = &report.summary_path {
        println!("summary:  {}", summary.display());
    }

    Ok(())
}

fn cmd_scan(root: &Path) -> anyhow::Result<()> {
    let output = root.join("output");
    let snapshots = persistence::scan_snapshots(&output)?;
    if snapshots.is_empty() {
        println!("no snapshots in {}", output.display());
        return Ok(());
    }

    println!("{:<16} {:>9}  {}", "name", "size", "file");
    for (name, info) in snapshots {
        println!(
            "{:<16} {:>7.2}MB  {}",
            name, info.size_mb, info.file_name
        );
    }
    Ok(())
}

fn cmd_inspect(file: &Path) -> anyhow::Result<()> {
    let (df, metadata) = persistence::load_frame(file)?;
    let df = frame::ensure_time_column(df)?;
    let indicators = frame::indicator_columns(&df);
    let info = DatasetInfo::from_dataset(&engine::Dataset::Single(df));

    println!("rows:     {}", info.rows);
    println!("columns:  {}", info.columns.join(", "));
    println!("memory:   {:.2} MB", info.memory_mb);
    if let Some((start, end)) = &info.time_range {
        println!("range:    {start} .. {end}");
    }
    if indicators.is_empty() {
        println!("indicator columns: none");
    } else {
        println!("indicator columns: {}", indicators.join(", "));
    }
    if let Some(metadata) = metadata {
        println!("metadata: {}", serde_json::to_string_pretty(&metadata)?);
    }
    Ok(())
}

fn cmd_export_csv(file: &Path, out: &Path) -> anyhow::Result<()> {
    let (df, _) = persistence::load_frame(file)?;
    persistence::export_csv(&df, out)?;
    println!("exported {} rows to {}", df.height(), out.display());
    Ok(())
}

fn cmd_catalog(path: Option<PathBuf>, search: Option<String>) {
    let path = path
        .or_else(|| std::env::var("STRATLAB_CATALOG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("catalog.json"));
    let catalog = IndicatorCatalog::load(&path);

    match search {
        Some(query) => {
            for name in catalog.search(&query) {
                let description = catalog
                    .get(name)
                    .map(|entry| entry.description.as_str())
                    .unwrap_or("");
                println!("{name} - {description}");
            }
        }
        None => {
            println!("{} indicators available", catalog.len());
            for name in catalog.names() {
                let description = catalog
                    .get(name)
                    .map(|entry| entry.description.as_str())
                    .unwrap_or("");
                println!("{name} - {description}");
            }
        }
    }
}

fn cmd_codegen(stage: &str, config: Option<&Path>) -> anyhow::Result<()> {
    let stage: Stage = stage
        .parse()
        .with_context(|| format!("unknown stage '{stage}'"))?;
    let config = match config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => serde_json::Value::Object(serde_json::Map::new()),
    };

    println!("{}", codegen::generate(stage, &config));
    Ok(())
}
