//! Indirect credential references.
//!
//! The manifest may only name where a secret lives (`env:OPENAI_API_KEY`);
//! literal values are rejected at parse time and resolved values are never
//! serialized.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const ENV_PREFIX: &str = "env:";

#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    var: String,
}

impl Secret {
    pub fn parse(reference: &str) -> Result<Self> {
        let var = reference
            .strip_prefix(ENV_PREFIX)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::config(
                    "credentials must be referenced indirectly as \"env:VAR_NAME\"",
                )
            })?;
        Ok(Self {
            var: var.to_string(),
        })
    }

    /// Environment variable holding the secret
    pub fn var(&self) -> &str {
        &self.var
    }

    /// Read the secret value from the environment.
    pub fn resolve(&self) -> Result<String> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::config(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({ENV_PREFIX}{})", self.var)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{ENV_PREFIX}{}", self.var))
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Secret::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_reference() {
        let secret = Secret::parse("env:MY_KEY").unwrap();
        assert_eq!(secret.var(), "MY_KEY");
        assert_eq!(format!("{secret:?}"), "Secret(env:MY_KEY)");
    }

    #[test]
    fn test_rejects_literal() {
        assert!(Secret::parse("sk-123").is_err());
        assert!(Secret::parse("env:").is_err());
    }

    #[test]
    fn test_serializes_reference_only() {
        let secret = Secret::parse("env:SEMINDEX_TEST_SECRET_SER").unwrap();
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"env:SEMINDEX_TEST_SECRET_SER\"");
    }

    #[test]
    fn test_resolve_missing_var() {
        let secret = Secret::parse("env:SEMINDEX_TEST_SECRET_DEFINITELY_UNSET").unwrap();
        assert!(matches!(secret.resolve(), Err(Error::Configuration(_))));
    }
}
