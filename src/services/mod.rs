//! Services - model, training and inference
//!
//! - `classifier` - the feed-forward network, training and inference paths
//! - `optimizer` - Adam and the step learning-rate schedule
//! - `synthetic` - rule-based labeled data generator
//! - `trainer` - training loop, validation, checkpoint-producing `run`
//! - `evaluation` - confusion matrix and per-class precision/recall
//! - `request` - loose JSON decoding for `/predict`
//! - `predictor` - inference service shared by the HTTP layer

pub mod classifier;
pub mod evaluation;
pub mod optimizer;
pub mod predictor;
pub mod request;
pub mod synthetic;
pub mod trainer;

pub use classifier::{ClassifierError, CrowdClassifier, ModelParameters};
pub use predictor::{CrowdPredictor, HealthStatus, ModelSource};
pub use request::PredictError;
pub use trainer::{TrainError, TrainOptions, TrainingPlan, TrainingReport};
