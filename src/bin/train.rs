//! Crowd predictor - offline training
//!
//! Generates the synthetic dataset, trains the classifier, writes the
//! checkpoint the server loads, and logs a validation report.
//!
//! Usage:
//!   crowd-train                               # defaults from config/dev.toml
//!   crowd-train --epochs 10 --samples 3000    # quick run
//!   crowd-train --output /tmp/model.json

use clap::Parser;
use crowd_predictor::domain::types::FeatureVector;
use crowd_predictor::infra::config::{resolve_checkpoint_path, ConfigArgs};
use crowd_predictor::infra::logging;
use crowd_predictor::services::trainer::{self, TrainingPlan, REFERENCE_SCENARIOS};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Train the crowd-level classifier on synthetic data
#[derive(Parser, Debug)]
#[command(name = "crowd-train", version, about)]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    /// Number of training epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Number of synthetic examples to generate
    #[arg(short, long)]
    samples: Option<usize>,

    /// Seed for data generation, initialization and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Checkpoint output path (defaults to the configured checkpoint path)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    logging::init();
    info!(git_hash = %logging::GIT_HASH, "crowd-train starting");

    let args = Args::parse();
    let config = args.config.load();

    let mut plan = TrainingPlan::from_config(&config);
    if let Some(epochs) = args.epochs {
        plan.options.epochs = epochs;
    }
    if let Some(samples) = args.samples {
        plan.samples = samples;
    }
    if let Some(seed) = args.seed {
        plan.seed = seed;
    }
    let output = match args.output {
        Some(path) if path.is_absolute() => path,
        Some(path) => std::env::current_dir()?.join(path),
        None => resolve_checkpoint_path(config.checkpoint_path_raw()),
    };

    info!(
        config_file = %config.config_file(),
        samples = %plan.samples,
        epochs = %plan.options.epochs,
        batch_size = %plan.options.batch_size,
        seed = %plan.seed,
        output = %output.display(),
        "training_plan"
    );

    let started = Instant::now();
    let report = trainer::run(&plan, &output)?;

    report.validation.confusion.log();
    for raw in &REFERENCE_SCENARIOS {
        let prediction = report.classifier.predict(&FeatureVector::from(raw))?;
        info!(
            hour = %raw.hour,
            day_of_week = %raw.day_of_week,
            weekend = %raw.is_weekend,
            holiday = %raw.is_holiday,
            weather = %raw.weather_score,
            route = %raw.route_name(),
            label = %prediction.label,
            confidence = format!("{:.2}%", prediction.confidence * 100.0),
            "reference_prediction"
        );
    }

    info!(
        epochs = %report.history.epochs(),
        final_val_loss = ?report.history.val_loss.last(),
        final_val_acc = ?report.history.val_acc.last(),
        checkpoint = %report.checkpoint_path.display(),
        elapsed_secs = format!("{:.1}", started.elapsed().as_secs_f64()),
        "training_complete"
    );
    Ok(())
}
