//! Domain models - prediction inputs, labels and feature encoding
//!
//! - `types` - `RawFeatures`, `CrowdLabel`, `FeatureVector`, `TrainingHistory`
//! - `features` - the encoding contract shared by training and inference

pub mod features;
pub mod types;

pub use features::encode;
pub use types::{
    CrowdLabel, FeatureVector, Prediction, RawFeatures, RouteType, TrainingExample,
    TrainingHistory, CLASS_COUNT, FEATURE_COUNT,
};
