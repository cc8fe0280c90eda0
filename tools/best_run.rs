//! Best run lookup
//!
//! Prints the run id the serving side would pick for an experiment, so
//! deploy scripts can pin it with `--run-id`.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tabular_risk_pipeline::{
    config::AppConfig,
    registry::{MetricOrder, RunRegistry},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for MetricOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => MetricOrder::Ascending,
            Order::Desc => MetricOrder::Descending,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "best-run", about = "Print the best run id of an experiment")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "TRP_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Experiment name (configured experiment when omitted)
    #[arg(long)]
    experiment: Option<String>,

    /// Metric to rank runs by (configured selection metric when omitted)
    #[arg(long)]
    metric: Option<String>,

    /// Ranking direction (configured selection order when omitted)
    #[arg(long, value_enum)]
    order: Option<Order>,

    /// Print the full run record as JSON instead of the id
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config
        .logging
        .init_tracing(&["tabular_risk_pipeline", "best_run"])?;

    let registry = RunRegistry::new(&config.artifacts.root);
    let experiment = cli
        .experiment
        .unwrap_or_else(|| config.artifacts.experiment.clone());
    let order = cli
        .order
        .map(MetricOrder::from)
        .unwrap_or(config.artifacts.selection_order);

    let run = match cli.metric.or(config.artifacts.selection_metric.clone()) {
        Some(metric) => registry.best_run(&experiment, &metric, order),
        None => registry.latest_run(&experiment),
    }
    .with_context(|| format!("No run found for experiment '{}'", experiment))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!("{}", run.run_id);
    }
    Ok(())
}
