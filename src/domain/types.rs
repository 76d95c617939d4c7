//! Shared types for the crowd predictor

use serde::{Deserialize, Serialize};

/// Number of entries in an encoded feature row
pub const FEATURE_COUNT: usize = 7;

/// Number of crowd classes the classifier distinguishes
pub const CLASS_COUNT: usize = 3;

/// Untransformed prediction inputs
///
/// Integer fields are kept wide so out-of-range values reach the encoder
/// unchanged. `day_of_week` uses Monday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub hour: i64,
    pub day_of_week: i64,
    pub is_weekend: bool,
    pub is_holiday: bool,
    /// 0.0 = clear, 1.0 = severe
    pub weather_score: f64,
    /// See [`RouteType`]
    pub route_type: i64,
}

impl Default for RawFeatures {
    fn default() -> Self {
        Self {
            hour: 12,
            day_of_week: 0,
            is_weekend: false,
            is_holiday: false,
            weather_score: 0.0,
            route_type: 0,
        }
    }
}

impl RawFeatures {
    /// Route name for logs; codes outside the known set read `unknown`
    pub fn route_name(&self) -> &'static str {
        RouteType::from_code(self.route_type).map_or("unknown", |route| route.as_str())
    }
}

/// Transit mode codes carried in `route_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    Metro = 0,
    Bus = 1,
    Train = 2,
    Tram = 3,
}

impl RouteType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Metro),
            1 => Some(Self::Bus),
            2 => Some(Self::Train),
            3 => Some(Self::Tram),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metro => "metro",
            Self::Bus => "bus",
            Self::Train => "train",
            Self::Tram => "tram",
        }
    }
}

/// Crowd level, ordered by increasing intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CrowdLabel {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl CrowdLabel {
    pub const ALL: [CrowdLabel; CLASS_COUNT] = [Self::Low, Self::Medium, Self::High];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl std::fmt::Display for CrowdLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded feature row, see [`crate::domain::features`] for the layout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeatureVector(pub [f32; FEATURE_COUNT]);

impl FeatureVector {
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// One labeled row used during training
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingExample {
    pub features: FeatureVector,
    pub label: CrowdLabel,
}

/// Classifier output for a single row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: CrowdLabel,
    /// Probability of `label`
    pub confidence: f32,
    /// Softmax probabilities indexed by class
    pub probabilities: [f32; CLASS_COUNT],
}

/// Per-epoch training curves, stored alongside the weights
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_acc: Vec<f32>,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    pub fn record(&mut self, train_loss: f32, val_loss: f32, val_acc: f32) {
        self.train_loss.push(train_loss);
        self.val_loss.push(val_loss);
        self.val_acc.push(val_acc);
    }
}
