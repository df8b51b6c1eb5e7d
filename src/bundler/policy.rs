//! Per-target build policy
//!
//! Everything that differs between a browser bundle and a server bundle is
//! expressed here as data, so the configuration builder has a single code
//! path for both targets.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use super::BuildTarget;

/// Node built-ins that have no place in a browser bundle
const BROWSER_DISABLED_BUILTINS: &[&str] = &[
    "child_process",
    "dgram",
    "dns",
    "fs",
    "http2",
    "module",
    "net",
    "tls",
];

/// Node globals kept with their real runtime semantics on the server
const SERVER_PRESERVED_GLOBALS: &[&str] = &["__dirname", "__filename", "global"];

/// Import of a Node built-in from a bundle that cannot provide it
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Module '{request}' is a Node built-in and is not available in browser bundles")]
pub struct UnsupportedBuiltin {
    pub request: String,
}

/// How Node built-ins and globals are treated by the bundle
///
/// `false` entries are built-ins that get no shim at all, `true` entries are
/// globals passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodePolicy {
    entries: BTreeMap<&'static str, bool>,
}

impl NodePolicy {
    pub fn for_target(target: BuildTarget) -> Self {
        let entries = match target {
            BuildTarget::Browser => BROWSER_DISABLED_BUILTINS
                .iter()
                .map(|name| (*name, false))
                .collect(),
            BuildTarget::Server => SERVER_PRESERVED_GLOBALS
                .iter()
                .map(|name| (*name, true))
                .collect(),
        };
        Self { entries }
    }

    /// Fail when `request` names a built-in this target does not shim.
    ///
    /// Describes how the bundler treats such an import; the check runs there, not here.
    pub fn check_builtin(&self, request: &str) -> Result<(), UnsupportedBuiltin> {
        let name = request.strip_prefix("node:").unwrap_or(request);
        let name = name.split('/').next().unwrap_or(name);

        match self.entries.get(name) {
            Some(false) => Err(UnsupportedBuiltin {
                request: request.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries.get(name).copied()
    }
}

/// Output file naming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputNaming {
    /// `[name].js`, easy to follow during development
    Readable,
    /// `[name].[hash:8].js`, for long-term caching
    ContentHashed,
}

impl OutputNaming {
    pub fn for_mode(is_dev: bool) -> Self {
        if is_dev {
            OutputNaming::Readable
        } else {
            OutputNaming::ContentHashed
        }
    }

    pub fn filename(&self) -> &'static str {
        match self {
            OutputNaming::Readable => "[name].js",
            OutputNaming::ContentHashed => "[name].[hash:8].js",
        }
    }

    pub fn chunk_filename(&self) -> &'static str {
        match self {
            OutputNaming::Readable => "[name].chunk.js",
            OutputNaming::ContentHashed => "[name].[chunkhash:8].chunk.js",
        }
    }
}

/// Target-specific choices consumed by the configuration builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPolicy {
    /// Hot reload client prepended to the entry list
    pub hot_client: &'static str,

    /// Installed packages are left to the runtime instead of bundled
    pub externalize_node_modules: bool,

    /// Resolve from the target and root node_modules explicitly
    pub explicit_module_roots: bool,

    /// Emit a public path derived from `app.baseUrl`
    pub public_path: bool,

    /// Append the plugin run file to the entry list
    pub include_run_file: bool,

    /// Keep the bundler in watch mode during development
    pub watch_in_dev: bool,

    pub node: NodePolicy,
}

impl TargetPolicy {
    pub fn for_target(target: BuildTarget) -> Self {
        match target {
            BuildTarget::Browser => Self {
                hot_client: "react-hot-loader/patch",
                externalize_node_modules: false,
                explicit_module_roots: false,
                public_path: true,
                include_run_file: false,
                watch_in_dev: false,
                node: NodePolicy::for_target(target),
            },
            BuildTarget::Server => Self {
                hot_client: HOT_POLL_CLIENT,
                externalize_node_modules: true,
                explicit_module_roots: true,
                public_path: false,
                include_run_file: true,
                watch_in_dev: true,
                node: NodePolicy::for_target(target),
            },
        }
    }
}

/// Server-side hot update client polling every 100ms
pub const HOT_POLL_CLIENT: &str = "webpack/hot/poll?100";
