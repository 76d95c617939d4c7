//! Adam optimizer and step learning-rate schedule

use crate::services::classifier::{Gradients, ModelParameters};
use ndarray::{ArrayD, Zip};

/// Adam with bias-corrected first and second moments
///
/// One moment pair per trainable tensor, matched by position with
/// [`ModelParameters::trainable_mut`].
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: i32,
    first: Vec<ArrayD<f32>>,
    second: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(params: &mut ModelParameters, learning_rate: f32) -> Self {
        let shapes: Vec<_> = params.trainable_mut().iter().map(|t| t.raw_dim()).collect();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            first: shapes.iter().map(|s| ArrayD::zeros(s.clone())).collect(),
            second: shapes.into_iter().map(ArrayD::zeros).collect(),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    pub fn steps(&self) -> i32 {
        self.step
    }

    pub fn step(&mut self, params: &mut ModelParameters, grads: &Gradients) {
        self.step = self.step.saturating_add(1);
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);
        let bias1 = 1.0 - beta1.powi(self.step);
        let bias2_sqrt = (1.0 - beta2.powi(self.step)).sqrt();
        let step_size = self.learning_rate / bias1;

        let moments = self.first.iter_mut().zip(self.second.iter_mut());
        for ((param, grad), (m, v)) in params.trainable_mut().into_iter().zip(grads.tensors()).zip(moments)
        {
            Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                *p -= step_size * *m / (v.sqrt() / bias2_sqrt + eps);
            });
        }
    }
}

/// Multiplies the learning rate by `gamma` every `step_size` epochs
#[derive(Debug, Clone, Copy)]
pub struct StepLr {
    base_rate: f32,
    step_size: usize,
    gamma: f32,
}

impl StepLr {
    pub fn new(base_rate: f32, step_size: usize, gamma: f32) -> Self {
        Self { base_rate, step_size: step_size.max(1), gamma }
    }

    /// Learning rate in effect during `epoch` (0-based)
    pub fn rate_at(&self, epoch: usize) -> f32 {
        let decays = (epoch / self.step_size) as i32;
        self.base_rate * self.gamma.powi(decays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::CrowdClassifier;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constant_grads(params: &ModelParameters, value: f32) -> Gradients {
        use crate::services::classifier::{BatchNormGrad, LinearGrad};
        let linear = |l: &crate::services::classifier::Linear| LinearGrad {
            weight: l.weight.mapv(|_| value),
            bias: l.bias.mapv(|_| value),
        };
        let bn = |b: &crate::services::classifier::BatchNorm| BatchNormGrad {
            gamma: b.gamma.mapv(|_| value),
            beta: b.beta.mapv(|_| value),
        };
        Gradients {
            fc1: linear(&params.fc1),
            bn1: bn(&params.bn1),
            fc2: linear(&params.fc2),
            bn2: bn(&params.bn2),
            fc3: linear(&params.fc3),
        }
    }

    #[test]
    fn test_step_lr_halves_every_20_epochs() {
        let schedule = StepLr::new(0.001, 20, 0.5);
        assert_eq!(schedule.rate_at(0), 0.001);
        assert_eq!(schedule.rate_at(19), 0.001);
        assert!((schedule.rate_at(20) - 0.0005).abs() < 1e-9);
        assert!((schedule.rate_at(39) - 0.0005).abs() < 1e-9);
        assert!((schedule.rate_at(40) - 0.00025).abs() < 1e-9);
    }

    #[test]
    fn test_first_adam_step_moves_by_learning_rate() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut params = CrowdClassifier::new(&mut rng).into_parameters();
        let before = params.clone();
        let grads = constant_grads(&params, 0.5);

        let mut adam = Adam::new(&mut params, 0.01);
        adam.step(&mut params, &grads);
        assert_eq!(adam.steps(), 1);

        // Bias correction makes the first update ~lr * sign(grad)
        for (new, old) in params.fc1.weight.iter().zip(before.fc1.weight.iter()) {
            assert!((old - new - 0.01).abs() < 1e-5);
        }
        for (new, old) in params.bn2.gamma.iter().zip(before.bn2.gamma.iter()) {
            assert!((old - new - 0.01).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_gradient_leaves_parameters() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut params = CrowdClassifier::new(&mut rng).into_parameters();
        let before = params.clone();
        let grads = constant_grads(&params, 0.0);

        let mut adam = Adam::new(&mut params, 0.01);
        adam.step(&mut params, &grads);
        assert_eq!(params, before);
    }
}
