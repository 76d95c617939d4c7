//! Serde encoding for parameter tensors
//!
//! Same document shape as ndarray's own encoding
//! (`{"v": 1, "dim": [..], "data": [..]}`), except that non-finite elements
//! are written as the strings `"NaN"`, `"inf"` and `"-inf"` so they survive a
//! JSON round trip. On read, `null` is taken as NaN.

use ndarray::{Array, ArrayD, Dimension, IxDyn};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy)]
struct Element(f32);

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_finite() {
            serializer.serialize_f32(value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ElementVisitor;

        impl<'de> Visitor<'de> for ElementVisitor {
            type Value = Element;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a number, null, or one of \"NaN\", \"inf\", \"-inf\"")
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Element, E> {
                Ok(Element(value as f32))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Element, E> {
                Ok(Element(value as f32))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Element, E> {
                Ok(Element(value as f32))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Element, E> {
                Ok(Element(f32::NAN))
            }

            fn visit_none<E: de::Error>(self) -> Result<Element, E> {
                Ok(Element(f32::NAN))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Element, E> {
                // f32's parser accepts nan, inf and infinity in any case
                value
                    .trim()
                    .parse::<f32>()
                    .map(Element)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(ElementVisitor)
    }
}

#[derive(Serialize)]
struct TensorRef<'a> {
    v: u8,
    dim: &'a [usize],
    data: Vec<Element>,
}

#[derive(Deserialize)]
struct StoredTensor {
    dim: Vec<usize>,
    data: Vec<Element>,
}

pub fn serialize<D, S>(array: &Array<f32, D>, serializer: S) -> Result<S::Ok, S::Error>
where
    D: Dimension,
    S: Serializer,
{
    TensorRef {
        v: FORMAT_VERSION,
        dim: array.shape(),
        data: array.iter().copied().map(Element).collect(),
    }
    .serialize(serializer)
}

pub fn deserialize<'de, D, De>(deserializer: De) -> Result<Array<f32, D>, De::Error>
where
    D: Dimension,
    De: Deserializer<'de>,
{
    let stored = StoredTensor::deserialize(deserializer)?;
    let data = stored.data.into_iter().map(|e| e.0).collect();
    ArrayD::from_shape_vec(IxDyn(&stored.dim), data)
        .map_err(de::Error::custom)?
        .into_dimensionality::<D>()
        .map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use crate::services::classifier::Linear;
    use ndarray::{array, Array1, Array2};

    fn layer(weight: Array2<f32>, bias: Array1<f32>) -> Linear {
        Linear { weight, bias }
    }

    #[test]
    fn test_layout_matches_ndarray_encoding() {
        let value = serde_json::to_value(layer(array![[1.0, 2.0], [3.0, 4.0]], array![0.5, -0.5])).unwrap();
        assert_eq!(value["weight"], serde_json::json!({"v": 1, "dim": [2, 2], "data": [1.0, 2.0, 3.0, 4.0]}));
        assert_eq!(value["bias"]["dim"], serde_json::json!([2]));
    }

    #[test]
    fn test_non_finite_elements_survive_json() {
        let original = layer(array![[f32::NAN, 1.5], [f32::INFINITY, f32::NEG_INFINITY]], array![0.0, f32::NAN]);
        let text = serde_json::to_string(&original).unwrap();
        assert!(text.contains("\"NaN\""));
        assert!(!text.contains("null"));

        let back: Linear = serde_json::from_str(&text).unwrap();
        assert!(back.weight[[0, 0]].is_nan());
        assert_eq!(back.weight[[0, 1]], 1.5);
        assert_eq!(back.weight[[1, 0]], f32::INFINITY);
        assert_eq!(back.weight[[1, 1]], f32::NEG_INFINITY);
        assert!(back.bias[1].is_nan());
    }

    #[test]
    fn test_null_and_integer_elements_accepted() {
        let text = r#"{"weight": {"v": 1, "dim": [1, 2], "data": [null, 2]},
                       "bias": {"dim": [2], "data": ["Infinity", 0]}}"#;
        let back: Linear = serde_json::from_str(text).unwrap();
        assert!(back.weight[[0, 0]].is_nan());
        assert_eq!(back.weight[[0, 1]], 2.0);
        assert_eq!(back.bias[0], f32::INFINITY);
    }

    #[test]
    fn test_bad_shapes_and_elements_rejected() {
        // 3 values cannot fill a 2x2 tensor
        let short = r#"{"weight": {"dim": [2, 2], "data": [1, 2, 3]}, "bias": {"dim": [2], "data": [0, 0]}}"#;
        assert!(serde_json::from_str::<Linear>(short).is_err());
        // A vector where a matrix belongs
        let rank = r#"{"weight": {"dim": [4], "data": [1, 2, 3, 4]}, "bias": {"dim": [2], "data": [0, 0]}}"#;
        assert!(serde_json::from_str::<Linear>(rank).is_err());
        let word = r#"{"weight": {"dim": [1, 1], "data": ["heavy"]}, "bias": {"dim": [1], "data": [0]}}"#;
        assert!(serde_json::from_str::<Linear>(word).is_err());
    }
}
