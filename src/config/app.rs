//! Application configuration reader
//!
//! App config files are TOML documents. Each file becomes one
//! [`ConfigPayload`]; a [`ConfigReader`] merges the payloads in order and
//! answers dotted-key lookups such as `app.baseUrl`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ConfigError;

/// One loaded app config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Where the data came from, usually the file name
    pub context: String,

    /// Parsed config tree
    pub data: Value,
}

impl ConfigPayload {
    /// Parse a payload from TOML source
    pub fn from_toml_str(context: impl Into<String>, content: &str) -> Result<Self, ConfigError> {
        let context = context.into();
        let data: Value = toml::from_str(content).map_err(|source| ConfigError::Parse {
            context: context.clone(),
            source,
        })?;

        Ok(Self { context, data })
    }

    /// Load a payload from a TOML file on disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let context = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Self::from_toml_str(context, &content)
    }
}

/// Typed view over the merged app config
#[derive(Debug, Clone, Default)]
pub struct ConfigReader {
    merged: Value,
}

impl ConfigReader {
    /// Merge payloads, later payloads overriding earlier ones
    pub fn from_payloads(payloads: &[ConfigPayload]) -> Self {
        let mut merged = Value::Object(Map::new());
        for payload in payloads {
            merge_into(&mut merged, &payload.data);
        }
        Self { merged }
    }

    /// Look up a dotted key
    pub fn get(&self, key: &str) -> Option<&Value> {
        key.split('.')
            .try_fold(&self.merged, |node, part| node.as_object()?.get(part))
    }

    /// Read a required string value
    pub fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        self.get_optional_string(key)?
            .ok_or_else(|| ConfigError::Missing { key: key.to_string() })
    }

    /// Read an optional string value
    pub fn get_optional_string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    /// Read an optional port number
    pub fn get_optional_u16(&self, key: &str) -> Result<Option<u16>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| ConfigError::WrongType {
                    key: key.to_string(),
                    expected: "port number",
                }),
        }
    }
}

fn merge_into(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
