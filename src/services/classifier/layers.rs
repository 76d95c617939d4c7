//! Building blocks of the classifier: linear, batch-norm, ReLU and dropout
//!
//! Every layer has an inference path taking `&self` and a training path that
//! returns whatever the backward pass needs.

use super::tensor_serde;
use ndarray::{Array1, Array2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fully connected layer, `y = x·W + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Shape `(inputs, outputs)`
    #[serde(with = "tensor_serde")]
    pub weight: Array2<f32>,
    #[serde(with = "tensor_serde")]
    pub bias: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct LinearGrad {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    /// Weights and biases drawn uniformly from ±1/sqrt(inputs)
    pub fn new<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (inputs as f32).sqrt();
        let weight = Array2::from_shape_fn((inputs, outputs), |_| rng.random_range(-bound..bound));
        let bias = Array1::from_shape_fn(outputs, |_| rng.random_range(-bound..bound));
        Self { weight, bias }
    }

    pub fn inputs(&self) -> usize {
        self.weight.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn parameter_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    pub fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        input.dot(&self.weight) + &self.bias
    }

    /// Returns the gradient w.r.t. the input plus the parameter gradients
    pub fn backward(&self, input: &Array2<f32>, grad_out: &Array2<f32>) -> (Array2<f32>, LinearGrad) {
        let weight = input.t().dot(grad_out);
        let bias = grad_out.sum_axis(Axis(0));
        let grad_input = grad_out.dot(&self.weight.t());
        (grad_input, LinearGrad { weight, bias })
    }
}

pub const BATCH_NORM_EPS: f32 = 1e-5;
pub const BATCH_NORM_MOMENTUM: f32 = 0.1;

/// Per-feature normalization over the batch
///
/// Training normalizes with the batch mean and biased variance and folds the
/// unbiased variance into the running estimate. Inference uses the running
/// estimates only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNorm {
    #[serde(with = "tensor_serde")]
    pub gamma: Array1<f32>,
    #[serde(with = "tensor_serde")]
    pub beta: Array1<f32>,
    #[serde(with = "tensor_serde")]
    pub running_mean: Array1<f32>,
    #[serde(with = "tensor_serde")]
    pub running_var: Array1<f32>,
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default = "default_eps")]
    pub eps: f32,
}

fn default_momentum() -> f32 {
    BATCH_NORM_MOMENTUM
}

fn default_eps() -> f32 {
    BATCH_NORM_EPS
}

#[derive(Debug, Clone)]
pub struct BatchNormCache {
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct BatchNormGrad {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
}

impl BatchNorm {
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            momentum: BATCH_NORM_MOMENTUM,
            eps: BATCH_NORM_EPS,
        }
    }

    pub fn features(&self) -> usize {
        self.gamma.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    pub fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let eps = self.eps;
        let inv_std = self.running_var.mapv(|v| 1.0 / (v + eps).sqrt());
        (input - &self.running_mean) * &inv_std * &self.gamma + &self.beta
    }

    /// Caller guarantees at least two rows
    pub fn forward_train(&mut self, input: &Array2<f32>) -> (Array2<f32>, BatchNormCache) {
        let n = input.nrows() as f32;
        let mean = input.sum_axis(Axis(0)) / n;
        let centered = input - &mean;
        let var = (&centered * &centered).sum_axis(Axis(0)) / n;

        let eps = self.eps;
        let inv_std = var.mapv(|v| 1.0 / (v + eps).sqrt());
        let x_hat = &centered * &inv_std;
        let output = &x_hat * &self.gamma + &self.beta;

        let m = self.momentum;
        let unbiased = &var * (n / (n - 1.0));
        self.running_mean = &self.running_mean * (1.0 - m) + &mean * m;
        self.running_var = &self.running_var * (1.0 - m) + &unbiased * m;

        (output, BatchNormCache { x_hat, inv_std })
    }

    pub fn backward(
        &self,
        cache: &BatchNormCache,
        grad_out: &Array2<f32>,
    ) -> (Array2<f32>, BatchNormGrad) {
        let n = grad_out.nrows() as f32;
        let gamma = (grad_out * &cache.x_hat).sum_axis(Axis(0));
        let beta = grad_out.sum_axis(Axis(0));

        let grad_x_hat = grad_out * &self.gamma;
        let sum_grad = grad_x_hat.sum_axis(Axis(0));
        let sum_grad_x_hat = (&grad_x_hat * &cache.x_hat).sum_axis(Axis(0));
        let grad_input = (&grad_x_hat * n - &sum_grad - &cache.x_hat * &sum_grad_x_hat)
            * &(&cache.inv_std / n);

        (grad_input, BatchNormGrad { gamma, beta })
    }
}

pub fn relu(input: &Array2<f32>) -> Array2<f32> {
    input.mapv(|v| v.max(0.0))
}

/// Gradient of ReLU given the pre-activation values
pub fn relu_backward(grad_out: &Array2<f32>, pre_activation: &Array2<f32>) -> Array2<f32> {
    Zip::from(grad_out)
        .and(pre_activation)
        .map_collect(|&g, &p| if p > 0.0 { g } else { 0.0 })
}

/// Inverted-dropout mask: kept units are scaled by `1 / (1 - rate)`
pub fn dropout_mask<R: Rng>(shape: (usize, usize), rate: f32, rng: &mut R) -> Array2<f32> {
    if rate <= 0.0 {
        return Array2::ones(shape);
    }
    let keep = 1.0 - rate;
    let scale = 1.0 / keep;
    Array2::from_shape_fn(shape, |_| if rng.random::<f32>() < keep { scale } else { 0.0 })
}
