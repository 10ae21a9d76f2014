use std::collections::BTreeMap;
use std::iter::FromIterator;

use ofs_core::errors::{ErrorInfo, OfsError};
use serde::{de::DeserializeOwned, Serialize, Serializer};
use serde_json::{Map, Value};

fn serde_error(code: &str, err: impl ToString) -> OfsError {
    OfsError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic key ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, OfsError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json-serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical).map_err(|err| serde_error("json-write", err))?;
    Ok(bytes)
}

/// Serializes a value as pretty-printed JSON.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, OfsError> {
    serde_json::to_string_pretty(value).map_err(|err| serde_error("json-serialize", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, OfsError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json-deserialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, OfsError> {
    serde_yaml::from_slice(data).map_err(|err| serde_error("yaml-deserialize", err))
}

/// Converts any serializable value into a JSON tree.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, OfsError> {
    serde_json::to_value(value).map_err(|err| serde_error("json-serialize", err))
}

/// Serializes a metric so that non-finite values survive JSON encoding.
///
/// JSON has no infinity literal; `+inf` is written as the string `"Infinity"`
/// (and NaN as `"NaN"`) instead of collapsing to `null`.
pub(crate) fn metric<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if *value > 0.0 {
        serializer.serialize_str("Infinity")
    } else {
        serializer.serialize_str("-Infinity")
    }
}

/// Inverse of [`metric`]: accepts a number or one of the non-finite tags.
pub(crate) fn metric_from<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Tag(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Tag(tag) => match tag.as_str() {
            "Infinity" | "inf" => Ok(f64::INFINITY),
            "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
            "NaN" => Ok(f64::NAN),
            other => Err(serde::de::Error::custom(format!(
                "unexpected metric tag `{other}`"
            ))),
        },
    }
}
