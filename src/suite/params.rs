//! Sparse suite parameters.
//!
//! Suite `params` are a loose YAML mapping handed to a handler. Handlers turn
//! them into typed override structs whose fields are all optional; a key that
//! is missing, `null` or blank falls back to the handler's default.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

use crate::error::StepError;

/// Handler parameters as written in the suite file
pub type Params = serde_yaml::Mapping;

/// Deserialize an optional override, treating `null` and blank strings as absent.
pub fn sparse<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => serde_yaml::from_value(value).map(Some).map_err(D::Error::custom),
    }
}

/// Parse `params` into a typed override struct.
pub fn parse<T: DeserializeOwned>(params: &Params) -> Result<T, StepError> {
    serde_yaml::from_value(Value::Mapping(params.clone()))
        .map_err(|e| StepError::Config(format!("bad params: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Overrides {
        #[serde(default, deserialize_with = "sparse")]
        name: Option<String>,
        #[serde(default, deserialize_with = "sparse")]
        memory: Option<u32>,
    }

    fn params(yaml: &str) -> Params {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_missing_null_and_blank_are_absent() {
        let o: Overrides = parse(&params("name: ''\nmemory: ~")).unwrap();
        assert!(o.name.is_none());
        assert!(o.memory.is_none());

        let o: Overrides = parse(&Params::new()).unwrap();
        assert!(o.name.is_none());
    }

    #[test]
    fn test_present_values_are_kept() {
        let o: Overrides = parse(&params("name: vm1\nmemory: 2048\nunrelated: true")).unwrap();
        assert_eq!(o.name.as_deref(), Some("vm1"));
        assert_eq!(o.memory, Some(2048));
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let err = parse::<Overrides>(&params("memory: lots")).unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
    }
}
