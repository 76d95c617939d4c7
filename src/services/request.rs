//! Decoding of `/predict` request bodies
//!
//! Bodies are loosely typed. Missing fields take the [`RawFeatures`]
//! defaults, numbers may arrive as strings, booleans are truthy/falsy, and
//! anything that cannot be coerced is rejected with the field name.

use crate::domain::types::RawFeatures;
use crate::services::classifier::ClassifierError;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Parse a request body into raw features
pub fn parse_request(body: &[u8]) -> Result<RawFeatures, PredictError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(fields) => features_from_object(&fields),
        _ => Err(PredictError::NotAnObject),
    }
}

pub fn features_from_object(fields: &Map<String, Value>) -> Result<RawFeatures, PredictError> {
    let defaults = RawFeatures::default();
    Ok(RawFeatures {
        hour: field(fields, "hour", defaults.hour, coerce_int)?,
        day_of_week: field(fields, "day_of_week", defaults.day_of_week, coerce_int)?,
        is_weekend: fields.get("is_weekend").map_or(defaults.is_weekend, truthy),
        is_holiday: fields.get("is_holiday").map_or(defaults.is_holiday, truthy),
        weather_score: field(fields, "weather_score", defaults.weather_score, coerce_float)?,
        route_type: field(fields, "route_type", defaults.route_type, coerce_int)?,
    })
}

fn field<T>(
    fields: &Map<String, Value>,
    name: &'static str,
    default: T,
    coerce: fn(&Value) -> Result<T, String>,
) -> Result<T, PredictError> {
    match fields.get(name) {
        None => Ok(default),
        Some(value) => coerce(value).map_err(|reason| PredictError::InvalidField { field: name, reason }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Integers pass through, floats truncate toward zero, booleans are 0/1
fn coerce_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| format!("cannot convert {n} to an integer")),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid literal for integer: {s:?}")),
        other => Err(format!("expected an integer, got {}", type_name(other))),
    }
}

fn coerce_float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("cannot convert {n} to a float")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("could not convert string to float: {s:?}")),
        other => Err(format!("expected a number, got {}", type_name(other))),
    }
}

/// null, false, 0, "", [] and {} are false
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
