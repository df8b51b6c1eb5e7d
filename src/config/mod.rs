//! Configuration handling
//!
//! Two kinds of configuration are read here: the tool settings file
//! (`backend-dev.toml`) and the application config files whose values are
//! consumed by the build configuration.

mod app;
mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use app::{ConfigPayload, ConfigReader};
pub use schema::*;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required config value at '{key}'")]
    Missing { key: String },

    #[error("Invalid type at '{key}', expected {expected}")]
    WrongType { key: String, expected: &'static str },
}

/// Tool settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bundler: BundlerSettings,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub workspace: WorkspaceSettings,

    #[serde(default)]
    pub watch: WatchSettings,
}

impl Settings {
    /// Load settings from a file, falling back to defaults when it is absent
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            context: path.display().to_string(),
            source,
        })
    }
}

/// Load every app config file in order
pub fn load_app_configs(paths: &[PathBuf]) -> Result<Vec<ConfigPayload>, ConfigError> {
    paths.iter().map(|path| ConfigPayload::load(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("backend-dev.toml")).unwrap();

        assert!(settings.bundler.command.is_empty());
        assert_eq!(settings.node.binary, "node");
        assert_eq!(settings.workspace.namespace, "@backstage");
        assert_eq!(settings.watch.debounce_ms, 100);
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend-dev.toml");
        fs::write(
            &path,
            r#"
            [bundler]
            command = ["node", "scripts/watch.js"]

            [workspace]
            namespace = "@acme"
            "#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.bundler.command, vec!["node", "scripts/watch.js"]);
        assert_eq!(settings.workspace.namespace, "@acme");
        assert_eq!(settings.node.binary, "node");
    }

    #[test]
    fn test_load_app_configs_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_app_configs(&[dir.path().join("app-config.toml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
