//! Supervised training loop
//!
//! Mean cross-entropy, Adam, learning rate halved every 20 epochs. Each
//! epoch reshuffles the training indices, runs the training path over
//! batches of 64, then scores the validation set in fixed order on the
//! inference path. There is no early stopping and no NaN detection: a
//! diverging run ends up in the history and the checkpoint as-is.

use crate::domain::features::to_batch;
use crate::domain::types::{CrowdLabel, FeatureVector, RawFeatures, TrainingExample, TrainingHistory};
use crate::infra::config::Config;
use crate::io::checkpoint::{self, Checkpoint};
use crate::services::classifier::{argmax, softmax_rows, ClassifierError, CrowdClassifier, MIN_TRAIN_BATCH};
use crate::services::evaluation::ConfusionMatrix;
use crate::services::optimizer::{Adam, StepLr};
use crate::services::synthetic;
use anyhow::Context;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("validation set is empty")]
    EmptyValidationSet,
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Optimization settings for [`train`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Epochs between learning-rate decays
    pub lr_step_size: usize,
    /// Decay factor applied every `lr_step_size` epochs
    pub lr_gamma: f32,
    /// Progress log interval in epochs (0 disables)
    pub log_every: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 64,
            learning_rate: 0.001,
            lr_step_size: 20,
            lr_gamma: 0.5,
            log_every: 10,
        }
    }
}

/// Scenarios predicted after training as a sanity check
pub const REFERENCE_SCENARIOS: [RawFeatures; 5] = [
    // Weekday morning peak, metro
    RawFeatures { hour: 9, day_of_week: 1, is_weekend: false, is_holiday: false, weather_score: 0.2, route_type: 0 },
    // Weekday evening peak, metro
    RawFeatures { hour: 18, day_of_week: 2, is_weekend: false, is_holiday: false, weather_score: 0.1, route_type: 0 },
    // Weekend afternoon, bus
    RawFeatures { hour: 14, day_of_week: 6, is_weekend: true, is_holiday: false, weather_score: 0.3, route_type: 1 },
    // Holiday morning peak, metro
    RawFeatures { hour: 10, day_of_week: 3, is_weekend: false, is_holiday: true, weather_score: 0.2, route_type: 0 },
    // Late night, train
    RawFeatures { hour: 23, day_of_week: 4, is_weekend: false, is_holiday: false, weather_score: 0.1, route_type: 2 },
];

/// Everything a full training run needs, including data generation
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub samples: usize,
    pub train_fraction: f64,
    pub seed: u64,
    pub options: TrainOptions,
}

impl Default for TrainingPlan {
    fn default() -> Self {
        Self { samples: 15_000, train_fraction: 0.8, seed: 42, options: TrainOptions::default() }
    }
}

impl TrainingPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            samples: config.training_samples(),
            train_fraction: config.training_train_fraction(),
            seed: config.training_seed(),
            options: TrainOptions {
                epochs: config.training_epochs(),
                batch_size: config.training_batch_size(),
                learning_rate: config.training_learning_rate(),
                lr_step_size: config.training_lr_step_size(),
                lr_gamma: config.training_lr_gamma(),
                log_every: config.training_log_every(),
            },
        }
    }
}

/// Loss and accuracy of one validation sweep
#[derive(Debug, Clone)]
pub struct Validation {
    pub loss: f32,
    pub accuracy: f32,
    pub confusion: ConfusionMatrix,
}

/// Outcome of [`run`]
#[derive(Debug)]
pub struct TrainingReport {
    pub classifier: CrowdClassifier,
    pub history: TrainingHistory,
    pub class_distribution: [usize; 3],
    pub validation: Validation,
    pub checkpoint_path: PathBuf,
}

/// Contiguous prefix/suffix split, no reshuffle
pub fn split(examples: &[TrainingExample], train_fraction: f64) -> (&[TrainingExample], &[TrainingExample]) {
    let at = ((train_fraction.clamp(0.0, 1.0) * examples.len() as f64).floor() as usize).min(examples.len());
    examples.split_at(at)
}

/// Mean softmax cross-entropy and its gradient w.r.t. the logits
pub fn cross_entropy(logits: &Array2<f32>, labels: &[CrowdLabel]) -> (f32, Array2<f32>) {
    let n = logits.nrows().max(1) as f32;
    let mut grad = softmax_rows(logits);
    let mut total = 0.0f32;
    for ((row, mut probs), label) in logits.rows().into_iter().zip(grad.rows_mut()).zip(labels) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = max + row.iter().map(|&z| (z - max).exp()).sum::<f32>().ln();
        total += log_sum - row[label.index()];
        probs[label.index()] -= 1.0;
    }
    (total / n, grad / n)
}

fn gather(examples: &[TrainingExample], indices: impl Iterator<Item = usize>) -> (Array2<f32>, Vec<CrowdLabel>) {
    let (rows, labels): (Vec<FeatureVector>, Vec<CrowdLabel>) =
        indices.map(|i| (examples[i].features, examples[i].label)).unzip();
    (to_batch(&rows), labels)
}

/// Train `model` in place and return the per-epoch history
pub fn train<R: Rng>(
    model: &mut CrowdClassifier,
    train_set: &[TrainingExample],
    val_set: &[TrainingExample],
    options: &TrainOptions,
    rng: &mut R,
) -> Result<TrainingHistory, TrainError> {
    if train_set.is_empty() {
        return Err(TrainError::EmptyTrainingSet);
    }
    if val_set.is_empty() {
        return Err(TrainError::EmptyValidationSet);
    }

    let batch_size = options.batch_size.max(MIN_TRAIN_BATCH);
    let schedule = StepLr::new(options.learning_rate, options.lr_step_size, options.lr_gamma);
    let mut adam = Adam::new(model.parameters_mut(), options.learning_rate);
    let mut indices: Vec<usize> = (0..train_set.len()).collect();
    let mut history = TrainingHistory::default();

    if train_set.len() % batch_size == 1 {
        warn!(
            train_examples = %train_set.len(),
            batch_size = %batch_size,
            "trailing_single_row_batch_skipped"
        );
    }

    for epoch in 0..options.epochs {
        let started = Instant::now();
        adam.set_learning_rate(schedule.rate_at(epoch));
        indices.shuffle(rng);

        let mut loss_sum = 0.0f32;
        let mut batches = 0usize;
        for chunk in indices.chunks(batch_size) {
            // Batch-norm cannot compute a variance from a single row
            if chunk.len() < MIN_TRAIN_BATCH {
                continue;
            }
            let (batch, labels) = gather(train_set, chunk.iter().copied());
            let pass = model.forward_train(&batch, rng)?;
            let (loss, grad_logits) = cross_entropy(pass.logits(), &labels);
            let grads = model.backward(&pass, &grad_logits);
            adam.step(model.parameters_mut(), &grads);

            loss_sum += loss;
            batches += 1;
        }
        let train_loss = if batches > 0 { loss_sum / batches as f32 } else { f32::NAN };

        let validation = validate(model, val_set, batch_size)?;
        history.record(train_loss, validation.loss, validation.accuracy);

        debug!(
            epoch = %(epoch + 1),
            lr = %adam.learning_rate(),
            train_loss = %train_loss,
            val_loss = %validation.loss,
            val_acc = %validation.accuracy,
            elapsed_ms = %started.elapsed().as_millis(),
            "epoch_complete"
        );
        if options.log_every > 0 && (epoch + 1) % options.log_every == 0 {
            info!(
                epoch = %(epoch + 1),
                epochs = %options.epochs,
                train_loss = format!("{:.4}", train_loss),
                val_loss = format!("{:.4}", validation.loss),
                val_acc = format!("{:.4}", validation.accuracy),
                "training_progress"
            );
        }
    }

    Ok(history)
}

/// Score `examples` on the inference path in fixed-order batches
pub fn validate(
    model: &CrowdClassifier,
    examples: &[TrainingExample],
    batch_size: usize,
) -> Result<Validation, ClassifierError> {
    let mut loss_sum = 0.0f32;
    let mut batches = 0usize;
    let mut confusion = ConfusionMatrix::new();

    for start in (0..examples.len()).step_by(batch_size.max(1)) {
        let end = (start + batch_size.max(1)).min(examples.len());
        let (batch, labels) = gather(examples, start..end);
        let logits = model.forward(&batch)?;
        let (loss, _) = cross_entropy(&logits, &labels);
        loss_sum += loss;
        batches += 1;

        for (row, &truth) in logits.rows().into_iter().zip(&labels) {
            let predicted = CrowdLabel::from_index(argmax(row)).unwrap_or(CrowdLabel::Low);
            confusion.add(truth, predicted);
        }
    }

    let loss = if batches > 0 { loss_sum / batches as f32 } else { f32::NAN };
    Ok(Validation { loss, accuracy: confusion.accuracy(), confusion })
}

/// Generate data, train, and persist the checkpoint at `output`
pub fn run(plan: &TrainingPlan, output: &Path) -> anyhow::Result<TrainingReport> {
    let mut rng = StdRng::seed_from_u64(plan.seed);

    let examples = synthetic::generate(plan.samples, &mut rng);
    let class_distribution = synthetic::class_distribution(&examples);
    info!(
        samples = %examples.len(),
        low = %class_distribution[0],
        medium = %class_distribution[1],
        high = %class_distribution[2],
        seed = %plan.seed,
        "synthetic_data_generated"
    );

    let (train_set, val_set) = split(&examples, plan.train_fraction);
    let mut classifier = CrowdClassifier::new(&mut rng);
    info!(
        parameters = %classifier.parameter_count(),
        train_examples = %train_set.len(),
        val_examples = %val_set.len(),
        epochs = %plan.options.epochs,
        learning_rate = %plan.options.learning_rate,
        "training_started"
    );

    let history = train(&mut classifier, train_set, val_set, &plan.options, &mut rng)?;
    let validation = validate(&classifier, val_set, plan.options.batch_size)?;

    let checkpoint = Checkpoint::new(classifier.parameters().clone(), history.clone());
    checkpoint::save(output, &checkpoint)
        .with_context(|| format!("Failed to persist checkpoint {}", output.display()))?;
    info!(path = %output.display(), "checkpoint_saved");

    Ok(TrainingReport {
        classifier,
        history,
        class_distribution,
        validation,
        checkpoint_path: output.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_options(epochs: usize) -> TrainOptions {
        TrainOptions { epochs, learning_rate: 0.01, log_every: 0, ..TrainOptions::default() }
    }

    #[test]
    fn test_split_is_contiguous() {
        let examples = synthetic::generate(10, &mut StdRng::seed_from_u64(1));
        let (train_set, val_set) = split(&examples, 0.8);
        assert_eq!(train_set.len(), 8);
        assert_eq!(val_set.len(), 2);
        assert_eq!(train_set, &examples[..8]);
        assert_eq!(val_set, &examples[8..]);

        let (all, none) = split(&examples, 1.0);
        assert_eq!((all.len(), none.len()), (10, 0));
    }

    #[test]
    fn test_default_split_sizes() {
        let examples = vec![
            TrainingExample { features: FeatureVector([0.0; 7]), label: CrowdLabel::Low };
            15_000
        ];
        let (train_set, val_set) = split(&examples, TrainingPlan::default().train_fraction);
        assert_eq!(train_set.len(), 12_000);
        assert_eq!(val_set.len(), 3_000);
    }

    #[test]
    fn test_cross_entropy_uniform_logits() {
        let logits = Array2::zeros((2, 3));
        let (loss, grad) = cross_entropy(&logits, &[CrowdLabel::Low, CrowdLabel::High]);
        assert!((loss - 3.0f32.ln()).abs() < 1e-6);

        let third = 1.0 / 3.0;
        assert!((grad[[0, 0]] - (third - 1.0) / 2.0).abs() < 1e-6);
        assert!((grad[[0, 1]] - third / 2.0).abs() < 1e-6);
        assert!((grad[[1, 2]] - (third - 1.0) / 2.0).abs() < 1e-6);
        // Each row of d loss / d logits sums to zero
        assert!(grad.sum().abs() < 1e-6);
    }

    #[test]
    fn test_cross_entropy_is_stable_for_large_logits() {
        let logits = array![[1000.0f32, 0.0, 0.0]];
        let (loss, _) = cross_entropy(&logits, &[CrowdLabel::Medium]);
        assert!((loss - 1000.0).abs() < 1e-2);
        assert!(loss.is_finite());
    }

    #[test]
    fn test_train_records_every_epoch_and_learns() {
        let mut rng = StdRng::seed_from_u64(42);
        let examples = synthetic::generate(1280, &mut rng);
        let (train_set, val_set) = split(&examples, 0.8);
        let mut model = CrowdClassifier::new(&mut rng);

        let history = train(&mut model, train_set, val_set, &small_options(12), &mut rng).unwrap();
        assert_eq!(history.epochs(), 12);
        assert_eq!(history.val_loss.len(), 12);
        assert_eq!(history.val_acc.len(), 12);
        assert!(history.val_acc.iter().all(|a| (0.0..=1.0).contains(a)));

        let first = history.train_loss[0];
        let last = history.train_loss[11];
        assert!(last < first, "train loss {first} -> {last}");
        assert!(history.val_loss[11] < 3.0f32.ln(), "val loss {}", history.val_loss[11]);
    }

    #[test]
    fn test_train_is_reproducible_with_seed() {
        let run_once = || {
            let mut rng = StdRng::seed_from_u64(5);
            let examples = synthetic::generate(300, &mut rng);
            let (train_set, val_set) = split(&examples, 0.8);
            let mut model = CrowdClassifier::new(&mut rng);
            let history = train(&mut model, train_set, val_set, &small_options(2), &mut rng).unwrap();
            (model, history)
        };
        let (model_a, history_a) = run_once();
        let (model_b, history_b) = run_once();
        assert_eq!(history_a, history_b);
        assert_eq!(model_a, model_b);
    }

    #[test]
    fn test_trailing_single_row_batch_is_skipped() {
        let mut rng = StdRng::seed_from_u64(6);
        // 65 training rows with batch 64 leaves a final batch of one
        let examples = synthetic::generate(85, &mut rng);
        let (train_set, val_set) = examples.split_at(65);

        let mut model = CrowdClassifier::new(&mut rng);
        let history = train(&mut model, train_set, val_set, &small_options(1), &mut rng).unwrap();
        assert!(history.train_loss[0].is_finite());
    }

    #[test]
    fn test_train_rejects_empty_sets() {
        let mut rng = StdRng::seed_from_u64(7);
        let examples = synthetic::generate(10, &mut rng);
        let mut model = CrowdClassifier::new(&mut rng);

        let err = train(&mut model, &[], &examples, &small_options(1), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::EmptyTrainingSet));
        let err = train(&mut model, &examples, &[], &small_options(1), &mut rng).unwrap_err();
        assert!(matches!(err, TrainError::EmptyValidationSet));
    }

    #[test]
    fn test_reference_scenarios_encode_and_predict() {
        let model = CrowdClassifier::new(&mut StdRng::seed_from_u64(9));
        for raw in &REFERENCE_SCENARIOS {
            let prediction = model.predict(&FeatureVector::from(raw)).unwrap();
            assert!((prediction.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        // Scenario 1 encoding
        let first = FeatureVector::from(&REFERENCE_SCENARIOS[0]).0;
        assert!((first[0] - 9.0 / 23.0).abs() < 1e-6);
        assert_eq!(first[4], 1.0);
    }

    #[test]
    fn test_validate_counts_every_example() {
        let mut rng = StdRng::seed_from_u64(8);
        let examples = synthetic::generate(130, &mut rng);
        let model = CrowdClassifier::new(&mut rng);
        let validation = validate(&model, &examples, 64).unwrap();
        assert_eq!(validation.confusion.total(), 130);
        assert!(validation.loss.is_finite());
        assert_eq!(validation.accuracy, validation.confusion.accuracy());
    }
}
