//! Inference service backing the HTTP endpoints
//!
//! One `CrowdPredictor` is built in `main` before the listener binds and
//! shared read-only behind an `Arc`.

use crate::domain::types::{FeatureVector, Prediction, RawFeatures};
use crate::io::checkpoint;
use crate::services::classifier::CrowdClassifier;
use crate::services::request::{parse_request, PredictError};
use anyhow::Context;
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where the serving weights came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Checkpoint(PathBuf),
    /// No checkpoint on disk; predictions are untrained
    RandomInit,
}

impl ModelSource {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Checkpoint(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

#[derive(Debug, Clone)]
pub struct CrowdPredictor {
    classifier: CrowdClassifier,
    source: ModelSource,
}

impl CrowdPredictor {
    pub fn new(classifier: CrowdClassifier, source: ModelSource) -> Self {
        Self { classifier, source }
    }

    /// Load weights from `path`, or fall back to random ones if it is missing
    ///
    /// A checkpoint that exists but cannot be read or decoded is an error.
    pub fn load_or_init<R: Rng>(path: &Path, rng: &mut R) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "checkpoint_missing_using_random_weights");
            return Ok(Self::new(CrowdClassifier::new(rng), ModelSource::RandomInit));
        }

        let checkpoint = checkpoint::load(path)?;
        let epochs = checkpoint.history.epochs();
        let final_val_acc = checkpoint.history.val_acc.last().copied();
        let classifier = CrowdClassifier::from_parameters(checkpoint.model_state_dict)
            .with_context(|| format!("Checkpoint {} does not match the model", path.display()))?;

        info!(
            path = %path.display(),
            parameters = %classifier.parameter_count(),
            epochs = %epochs,
            final_val_acc = ?final_val_acc,
            "checkpoint_loaded"
        );
        Ok(Self::new(classifier, ModelSource::Checkpoint(path.to_path_buf())))
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn classifier(&self) -> &CrowdClassifier {
        &self.classifier
    }

    /// Liveness only; does not depend on model state
    pub fn health(&self) -> HealthStatus {
        HealthStatus { status: "ok" }
    }

    pub fn predict(&self, raw: &RawFeatures) -> Result<Prediction, PredictError> {
        Ok(self.classifier.predict(&FeatureVector::from(raw))?)
    }

    /// Decode a `/predict` body and run inference on it
    pub fn predict_json(&self, body: &[u8]) -> Result<Prediction, PredictError> {
        let raw = parse_request(body)?;
        self.predict(&raw)
    }
}
