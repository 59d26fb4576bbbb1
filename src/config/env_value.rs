// ABOUTME: Environment variable value types with interpolation support.
// ABOUTME: Handles literal values and references to environment variables.

use crate::config::error::{ConfigMissingError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| ConfigMissingError::MissingEnvVar(var.clone())),
            },
        }
    }
}

pub fn resolve_env_map(map: &BTreeMap<String, EnvValue>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_resolves_to_itself() {
        assert_eq!(EnvValue::Literal("x".into()).resolve().unwrap(), "x");
    }

    #[test]
    fn from_env_falls_back_to_default() {
        let value = EnvValue::FromEnv {
            var: "PELEKA_ENGINE_TEST_UNSET_VAR".to_string(),
            default: Some("fallback".to_string()),
        };
        assert_eq!(value.resolve().unwrap(), "fallback");
    }

    #[test]
    fn from_env_without_default_fails_when_unset() {
        let value = EnvValue::FromEnv {
            var: "PELEKA_ENGINE_TEST_UNSET_VAR".to_string(),
            default: None,
        };
        assert!(value.resolve().is_err());
    }
}
