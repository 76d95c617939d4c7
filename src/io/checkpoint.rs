//! Model checkpoint persistence
//!
//! A checkpoint is one JSON document:
//!
//! ```json
//! { "model_state_dict": { "fc1": {...}, "bn1": {...}, ... },
//!   "history": { "train_loss": [...], "val_loss": [...], "val_acc": [...] } }
//! ```
//!
//! Only `model_state_dict` is needed to serve. Its tensors keep non-finite
//! values (written as `"NaN"`, `"inf"`, `"-inf"`), so a diverged run reloads
//! exactly as it was saved. `history` is informational; a missing or
//! unreadable history (serde_json writes NaN losses as `null`) loads as empty.

use crate::domain::types::TrainingHistory;
use crate::services::classifier::ModelParameters;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub model_state_dict: ModelParameters,
    pub history: TrainingHistory,
}

impl Checkpoint {
    pub fn new(model_state_dict: ModelParameters, history: TrainingHistory) -> Self {
        Self { model_state_dict, history }
    }
}

/// On-disk layout; `history` stays untyped until the weights decode
#[derive(Deserialize)]
struct StoredCheckpoint {
    model_state_dict: ModelParameters,
    #[serde(default)]
    history: serde_json::Value,
}

/// Write `checkpoint` to `path`, creating parent directories
pub fn save(path: &Path, checkpoint: &Checkpoint) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create checkpoint directory {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec(checkpoint).context("Failed to serialize checkpoint")?;
    fs::write(path, bytes).with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> anyhow::Result<Checkpoint> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let stored: StoredCheckpoint = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;

    let history = if stored.history.is_null() {
        TrainingHistory::default()
    } else {
        serde_json::from_value(stored.history).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "checkpoint_history_unreadable");
            TrainingHistory::default()
        })
    };

    Ok(Checkpoint { model_state_dict: stored.model_state_dict, history })
}
