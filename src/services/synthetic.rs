//! Synthetic labeled data for training
//!
//! The rule engine below is the ground truth the classifier learns. The
//! thresholds, additive weights, draw order and clamp must stay exactly as
//! they are or models trained before and after the change stop being
//! comparable.
//!
//! All randomness comes from the caller's RNG, so a seeded `StdRng`
//! reproduces the same example sequence.

use crate::domain::features::{is_peak_hour, is_weekend_day};
use crate::domain::types::{
    CrowdLabel, FeatureVector, RawFeatures, RouteType, TrainingExample, CLASS_COUNT,
};
use rand::Rng;

pub const HOLIDAY_PROBABILITY: f64 = 0.05;
pub const NOISE_AMPLITUDE: f64 = 0.1;

const BASE_SCORE: f64 = 0.5;
const WEEKDAY_PEAK_BONUS: f64 = 0.35;
const OTHER_PEAK_BONUS: f64 = 0.15;
const WEEKEND_PENALTY: f64 = 0.15;
const HOLIDAY_PENALTY: f64 = 0.25;
const LATE_NIGHT_PENALTY: f64 = 0.3;
const SEVERE_WEATHER_THRESHOLD: f64 = 0.7;
const SEVERE_WEATHER_BONUS: f64 = 0.15;
const POOR_WEATHER_THRESHOLD: f64 = 0.4;
const POOR_WEATHER_BONUS: f64 = 0.05;
const METRO_BONUS: f64 = 0.05;
const TRAIN_BONUS: f64 = 0.08;

/// Scores below this are Low
pub const LOW_UPPER: f64 = 0.35;
/// Scores below this (and not Low) are Medium
pub const MEDIUM_UPPER: f64 = 0.65;

/// 22:00 through 05:59
#[inline]
pub fn is_late_night(hour: i64) -> bool {
    hour >= 22 || hour <= 5
}

/// Crowd score before noise and clamping
pub fn base_score(raw: &RawFeatures) -> f64 {
    let peak = is_peak_hour(raw.hour);
    let mut score = BASE_SCORE;

    if peak && !raw.is_weekend && !raw.is_holiday {
        score += WEEKDAY_PEAK_BONUS;
    } else if peak {
        score += OTHER_PEAK_BONUS;
    }

    if raw.is_weekend {
        score -= WEEKEND_PENALTY;
    }
    if raw.is_holiday {
        score -= HOLIDAY_PENALTY;
    }
    if is_late_night(raw.hour) {
        score -= LATE_NIGHT_PENALTY;
    }

    if raw.weather_score > SEVERE_WEATHER_THRESHOLD {
        score += SEVERE_WEATHER_BONUS;
    } else if raw.weather_score > POOR_WEATHER_THRESHOLD {
        score += POOR_WEATHER_BONUS;
    }

    match RouteType::from_code(raw.route_type) {
        Some(RouteType::Metro) => score += METRO_BONUS,
        Some(RouteType::Train) => score += TRAIN_BONUS,
        _ => {}
    }

    score
}

/// Map a clamped score onto a crowd level
pub fn label_for_score(score: f64) -> CrowdLabel {
    if score < LOW_UPPER {
        CrowdLabel::Low
    } else if score < MEDIUM_UPPER {
        CrowdLabel::Medium
    } else {
        CrowdLabel::High
    }
}

/// Draw the raw inputs of one example
fn sample_raw<R: Rng>(rng: &mut R) -> RawFeatures {
    let hour = rng.random_range(0..=23);
    let day_of_week = rng.random_range(0..=6);
    let is_holiday = rng.random::<f64>() < HOLIDAY_PROBABILITY;
    let weather_score = rng.random::<f64>();
    let route_type = rng.random_range(0..=3);

    RawFeatures {
        hour,
        day_of_week,
        is_weekend: is_weekend_day(day_of_week),
        is_holiday,
        weather_score,
        route_type,
    }
}

/// One labeled example
pub fn sample<R: Rng>(rng: &mut R) -> (RawFeatures, CrowdLabel) {
    let raw = sample_raw(rng);
    let noise = -NOISE_AMPLITUDE + 2.0 * NOISE_AMPLITUDE * rng.random::<f64>();
    let score = (base_score(&raw) + noise).clamp(0.0, 1.0);
    (raw, label_for_score(score))
}

/// `n` labeled examples, encoded with the shared feature encoder
pub fn generate<R: Rng>(n: usize, rng: &mut R) -> Vec<TrainingExample> {
    (0..n)
        .map(|_| {
            let (raw, label) = sample(rng);
            TrainingExample { features: FeatureVector::from(&raw), label }
        })
        .collect()
}

/// Example count per class, indexed by `CrowdLabel::index`
pub fn class_distribution(examples: &[TrainingExample]) -> [usize; CLASS_COUNT] {
    let mut counts = [0usize; CLASS_COUNT];
    for example in examples {
        counts[example.label.index()] += 1;
    }
    counts
}
