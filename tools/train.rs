//! Training run
//!
//! Reads the configured CSV, fits the feature contract, vectorizer and
//! model, evaluates on the holdout split and stores the bundle plus its
//! run metadata under the artifacts root.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tabular_risk_pipeline::{
    config::AppConfig,
    registry::RunRegistry,
    store::FsArtifactStore,
    training::Trainer,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train a model and store its artifact bundle")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "TRP_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Override the configured dataset path
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Override the configured artifacts root
    #[arg(long, env = "TRP_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    /// Override the configured experiment name
    #[arg(long)]
    experiment: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(dataset) = cli.dataset {
        config.training.dataset = dataset;
    }
    if let Some(root) = cli.artifacts {
        config.artifacts.root = root;
    }
    if let Some(experiment) = cli.experiment {
        config.artifacts.experiment = experiment;
    }

    config
        .logging
        .init_tracing(&["tabular_risk_pipeline", "train"])?;

    info!(
        dataset = %config.training.dataset.display(),
        experiment = %config.artifacts.experiment,
        model = ?config.training.model,
        "Starting training run"
    );

    let store = FsArtifactStore::new(&config.artifacts.root);
    let registry = RunRegistry::new(&config.artifacts.root);
    let trainer = Trainer::new(
        config.training.clone(),
        config.artifacts.experiment.clone(),
        config.detection.threshold,
    );

    let outcome = trainer
        .run(&store, &registry)
        .context("Training run failed")?;

    info!(
        run_id = %outcome.run.run_id,
        path = %store.bundle_path(&outcome.run.run_id)?.display(),
        metrics = ?outcome.run.metrics,
        "Training complete"
    );
    println!("{}", outcome.run.run_id);
    Ok(())
}
