//! Feature encoding shared by training and inference
//!
//! Row layout (index: value):
//! - 0: hour / 23
//! - 1: day_of_week / 6
//! - 2: is_weekend (0 or 1)
//! - 3: is_holiday (0 or 1)
//! - 4: is_peak_hour (0 or 1, derived from hour)
//! - 5: weather_score, unchanged
//! - 6: route_type / 3
//!
//! Order and divisors are part of the checkpoint format. Changing either
//! invalidates every trained model.
//!
//! Inputs are not validated or clamped: hour = 99 encodes to 99 / 23.

use super::types::{FeatureVector, RawFeatures, FEATURE_COUNT};
use ndarray::Array2;

pub const HOUR_DIVISOR: f32 = 23.0;
pub const DAY_DIVISOR: f32 = 6.0;
pub const ROUTE_TYPE_DIVISOR: f32 = 3.0;

/// First day index counted as weekend (Saturday, with Monday = 0)
pub const FIRST_WEEKEND_DAY: i64 = 5;

/// Peak hours: 08-11 and 17-21 inclusive
#[inline]
pub fn is_peak_hour(hour: i64) -> bool {
    (8..=11).contains(&hour) || (17..=21).contains(&hour)
}

#[inline]
pub fn is_weekend_day(day_of_week: i64) -> bool {
    day_of_week >= FIRST_WEEKEND_DAY
}

#[inline]
fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl From<&RawFeatures> for FeatureVector {
    fn from(raw: &RawFeatures) -> Self {
        FeatureVector([
            raw.hour as f32 / HOUR_DIVISOR,
            raw.day_of_week as f32 / DAY_DIVISOR,
            flag(raw.is_weekend),
            flag(raw.is_holiday),
            flag(is_peak_hour(raw.hour)),
            raw.weather_score as f32,
            raw.route_type as f32 / ROUTE_TYPE_DIVISOR,
        ])
    }
}

/// Encode one request into a `(1, 7)` batch
pub fn encode(raw: &RawFeatures) -> Array2<f32> {
    to_batch(&[FeatureVector::from(raw)])
}

/// Stack rows into an `(n, 7)` batch
pub fn to_batch(rows: &[FeatureVector]) -> Array2<f32> {
    let mut batch = Array2::zeros((rows.len(), FEATURE_COUNT));
    for (mut dst, row) in batch.rows_mut().into_iter().zip(rows) {
        for (d, &v) in dst.iter_mut().zip(row.0.iter()) {
            *d = v;
        }
    }
    batch
}
