//! Crowd-level classifier
//!
//! Three fully connected layers:
//! `7 → 32 (batch-norm, ReLU, dropout) → 32 (batch-norm, ReLU, dropout) → 3 logits`.
//!
//! There is no hidden train/eval flag. [`CrowdClassifier::forward`] is the
//! inference path (frozen statistics, no dropout, `&self`);
//! [`CrowdClassifier::forward_train`] is the training path and needs at least
//! two rows because batch-norm normalizes with batch statistics.

mod layers;
mod tensor_serde;

pub use layers::{BatchNorm, BatchNormGrad, Linear, LinearGrad};

use crate::domain::features::to_batch;
use crate::domain::types::{CrowdLabel, FeatureVector, Prediction, CLASS_COUNT, FEATURE_COUNT};
use layers::{dropout_mask, relu, relu_backward, BatchNormCache};
use ndarray::{Array2, ArrayView1, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HIDDEN_SIZE: usize = 32;
pub const DROPOUT_RATE: f32 = 0.2;

/// Smallest batch the training path accepts
pub const MIN_TRAIN_BATCH: usize = 2;

#[derive(Debug, Error, PartialEq)]
pub enum ClassifierError {
    #[error("batch is empty")]
    EmptyBatch,
    #[error("expected {expected} features per row, got {got}")]
    InputWidth { expected: usize, got: usize },
    #[error("training batch needs at least 2 rows for batch statistics, got {rows}")]
    BatchTooSmall { rows: usize },
    #[error("parameter {tensor} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch { tensor: &'static str, expected: Vec<usize>, got: Vec<usize> },
}

/// Learned state of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub fc1: Linear,
    pub bn1: BatchNorm,
    pub fc2: Linear,
    pub bn2: BatchNorm,
    pub fc3: Linear,
}

impl ModelParameters {
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self {
            fc1: Linear::new(FEATURE_COUNT, HIDDEN_SIZE, rng),
            bn1: BatchNorm::new(HIDDEN_SIZE),
            fc2: Linear::new(HIDDEN_SIZE, HIDDEN_SIZE, rng),
            bn2: BatchNorm::new(HIDDEN_SIZE),
            fc3: Linear::new(HIDDEN_SIZE, CLASS_COUNT, rng),
        }
    }

    /// Trainable tensors, in the same order as [`Gradients::tensors`]
    pub fn trainable_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.fc1.weight.view_mut().into_dyn(),
            self.fc1.bias.view_mut().into_dyn(),
            self.bn1.gamma.view_mut().into_dyn(),
            self.bn1.beta.view_mut().into_dyn(),
            self.fc2.weight.view_mut().into_dyn(),
            self.fc2.bias.view_mut().into_dyn(),
            self.bn2.gamma.view_mut().into_dyn(),
            self.bn2.beta.view_mut().into_dyn(),
            self.fc3.weight.view_mut().into_dyn(),
            self.fc3.bias.view_mut().into_dyn(),
        ]
    }

    pub fn parameter_count(&self) -> usize {
        self.fc1.parameter_count()
            + self.bn1.parameter_count()
            + self.fc2.parameter_count()
            + self.bn2.parameter_count()
            + self.fc3.parameter_count()
    }

    /// Check every tensor against the fixed architecture
    pub fn validate(&self) -> Result<(), ClassifierError> {
        check_shape("fc1.weight", self.fc1.weight.shape(), &[FEATURE_COUNT, HIDDEN_SIZE])?;
        check_shape("fc1.bias", self.fc1.bias.shape(), &[HIDDEN_SIZE])?;
        check_batch_norm(["bn1.gamma", "bn1.beta", "bn1.running_mean", "bn1.running_var"], &self.bn1)?;
        check_shape("fc2.weight", self.fc2.weight.shape(), &[HIDDEN_SIZE, HIDDEN_SIZE])?;
        check_shape("fc2.bias", self.fc2.bias.shape(), &[HIDDEN_SIZE])?;
        check_batch_norm(["bn2.gamma", "bn2.beta", "bn2.running_mean", "bn2.running_var"], &self.bn2)?;
        check_shape("fc3.weight", self.fc3.weight.shape(), &[HIDDEN_SIZE, CLASS_COUNT])?;
        check_shape("fc3.bias", self.fc3.bias.shape(), &[CLASS_COUNT])?;
        Ok(())
    }
}

fn check_shape(tensor: &'static str, got: &[usize], expected: &[usize]) -> Result<(), ClassifierError> {
    if got == expected {
        Ok(())
    } else {
        Err(ClassifierError::ShapeMismatch { tensor, expected: expected.to_vec(), got: got.to_vec() })
    }
}

/// `names` follows the field order gamma, beta, running_mean, running_var
fn check_batch_norm(names: [&'static str; 4], bn: &BatchNorm) -> Result<(), ClassifierError> {
    let expected = [HIDDEN_SIZE];
    for (name, got) in names.into_iter().zip([&bn.gamma, &bn.beta, &bn.running_mean, &bn.running_var]) {
        check_shape(name, got.shape(), &expected)?;
    }
    Ok(())
}

/// Gradients of the trainable tensors for one batch
#[derive(Debug, Clone)]
pub struct Gradients {
    pub fc1: LinearGrad,
    pub bn1: BatchNormGrad,
    pub fc2: LinearGrad,
    pub bn2: BatchNormGrad,
    pub fc3: LinearGrad,
}

impl Gradients {
    pub fn tensors(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.fc1.weight.view().into_dyn(),
            self.fc1.bias.view().into_dyn(),
            self.bn1.gamma.view().into_dyn(),
            self.bn1.beta.view().into_dyn(),
            self.fc2.weight.view().into_dyn(),
            self.fc2.bias.view().into_dyn(),
            self.bn2.gamma.view().into_dyn(),
            self.bn2.beta.view().into_dyn(),
            self.fc3.weight.view().into_dyn(),
            self.fc3.bias.view().into_dyn(),
        ]
    }
}

/// Activations kept from a training forward pass
#[derive(Debug, Clone)]
pub struct TrainForward {
    input: Array2<f32>,
    bn1: BatchNormCache,
    norm1: Array2<f32>,
    mask1: Array2<f32>,
    hidden1: Array2<f32>,
    bn2: BatchNormCache,
    norm2: Array2<f32>,
    mask2: Array2<f32>,
    hidden2: Array2<f32>,
    logits: Array2<f32>,
}

impl TrainForward {
    pub fn logits(&self) -> &Array2<f32> {
        &self.logits
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrowdClassifier {
    params: ModelParameters,
    dropout: f32,
}

impl CrowdClassifier {
    /// Fresh network with random weights
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self { params: ModelParameters::new(rng), dropout: DROPOUT_RATE }
    }

    /// Wrap loaded parameters after checking their shapes
    pub fn from_parameters(params: ModelParameters) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self { params, dropout: DROPOUT_RATE })
    }

    /// Override the dropout rate of the training path
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout = rate.clamp(0.0, 0.9);
        self
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut ModelParameters {
        &mut self.params
    }

    pub fn into_parameters(self) -> ModelParameters {
        self.params
    }

    pub fn parameter_count(&self) -> usize {
        self.params.parameter_count()
    }

    /// Inference path: logits for an `(n, 7)` batch
    pub fn forward(&self, batch: &Array2<f32>) -> Result<Array2<f32>, ClassifierError> {
        check_input(batch)?;
        let p = &self.params;
        let hidden1 = relu(&p.bn1.forward(&p.fc1.forward(batch)));
        let hidden2 = relu(&p.bn2.forward(&p.fc2.forward(&hidden1)));
        Ok(p.fc3.forward(&hidden2))
    }

    /// Training path: batch statistics, dropout, running-stat update
    pub fn forward_train<R: Rng>(
        &mut self,
        batch: &Array2<f32>,
        rng: &mut R,
    ) -> Result<TrainForward, ClassifierError> {
        check_input(batch)?;
        if batch.nrows() < MIN_TRAIN_BATCH {
            return Err(ClassifierError::BatchTooSmall { rows: batch.nrows() });
        }
        let rate = self.dropout;
        let p = &mut self.params;

        let (norm1, bn1) = p.bn1.forward_train(&p.fc1.forward(batch));
        let mask1 = dropout_mask(norm1.dim(), rate, rng);
        let hidden1 = relu(&norm1) * &mask1;

        let (norm2, bn2) = p.bn2.forward_train(&p.fc2.forward(&hidden1));
        let mask2 = dropout_mask(norm2.dim(), rate, rng);
        let hidden2 = relu(&norm2) * &mask2;

        let logits = p.fc3.forward(&hidden2);

        Ok(TrainForward {
            input: batch.clone(),
            bn1,
            norm1,
            mask1,
            hidden1,
            bn2,
            norm2,
            mask2,
            hidden2,
            logits,
        })
    }

    /// Backpropagate `grad_logits` (d loss / d logits) through a training pass
    pub fn backward(&self, pass: &TrainForward, grad_logits: &Array2<f32>) -> Gradients {
        let p = &self.params;

        let (grad_hidden2, fc3) = p.fc3.backward(&pass.hidden2, grad_logits);
        let grad_norm2 = relu_backward(&(grad_hidden2 * &pass.mask2), &pass.norm2);
        let (grad_pre2, bn2) = p.bn2.backward(&pass.bn2, &grad_norm2);

        let (grad_hidden1, fc2) = p.fc2.backward(&pass.hidden1, &grad_pre2);
        let grad_norm1 = relu_backward(&(grad_hidden1 * &pass.mask1), &pass.norm1);
        let (grad_pre1, bn1) = p.bn1.backward(&pass.bn1, &grad_norm1);

        let (_, fc1) = p.fc1.backward(&pass.input, &grad_pre1);

        Gradients { fc1, bn1, fc2, bn2, fc3 }
    }

    /// Class, confidence and probabilities for one encoded row
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        let logits = self.forward(&to_batch(std::slice::from_ref(features)))?;
        Ok(prediction_from_logits(logits.row(0)))
    }

    pub fn predict_batch(&self, batch: &Array2<f32>) -> Result<Vec<Prediction>, ClassifierError> {
        let logits = self.forward(batch)?;
        Ok(logits.rows().into_iter().map(prediction_from_logits).collect())
    }
}

fn check_input(batch: &Array2<f32>) -> Result<(), ClassifierError> {
    if batch.ncols() != FEATURE_COUNT {
        return Err(ClassifierError::InputWidth { expected: FEATURE_COUNT, got: batch.ncols() });
    }
    if batch.nrows() == 0 {
        return Err(ClassifierError::EmptyBatch);
    }
    Ok(())
}

/// Numerically stable softmax of one logit row
pub fn softmax(logits: ArrayView1<'_, f32>) -> [f32; CLASS_COUNT] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out = [0.0f32; CLASS_COUNT];
    let mut sum = 0.0f32;
    for (o, &z) in out.iter_mut().zip(logits.iter()) {
        *o = (z - max).exp();
        sum += *o;
    }
    if sum > 0.0 {
        for o in &mut out {
            *o /= sum;
        }
    }
    out
}

/// Softmax over every row of a logit batch
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
    probs
}

/// Index of the largest value, first one on ties
pub fn argmax(values: ArrayView1<'_, f32>) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = idx;
        }
    }
    best
}

fn prediction_from_logits(logits: ArrayView1<'_, f32>) -> Prediction {
    let probabilities = softmax(logits);
    let class = argmax(ArrayView1::from(&probabilities[..]));
    let label = CrowdLabel::from_index(class).unwrap_or(CrowdLabel::Low);
    Prediction { label, confidence: probabilities[label.index()], probabilities }
}
