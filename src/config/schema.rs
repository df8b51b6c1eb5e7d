//! Settings schema definitions

use serde::{Deserialize, Serialize};

/// External bundler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundlerSettings {
    /// Watch-mode bundler command; the generated config path is appended
    #[serde(default)]
    pub command: Vec<String>,
}

/// Node runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Node executable
    #[serde(default = "default_node_binary")]
    pub binary: String,

    /// Module preloaded to transpile TypeScript sources on the fly
    #[serde(default = "default_transform")]
    pub transform: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            binary: default_node_binary(),
            transform: default_transform(),
        }
    }
}

fn default_node_binary() -> String {
    "node".to_string()
}

fn default_transform() -> String {
    "@backstage/cli/config/nodeTransform.cjs".to_string()
}

/// Workspace conventions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Package namespace that is always bundled and watched
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    "@backstage".to_string()
}

/// Source watching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Debounce window for file change events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    100
}
