//! Bundler plugin descriptors
//!
//! The external bundler owns the actual plugin implementations; the build
//! configuration only describes which ones to enable and with what options.
//! Descriptors are collected with [`PluginList`], which never mutates a list
//! once it has been handed out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;

/// Report patterns for static checks; `!` marks an exclusion
pub const CHECK_REPORT_FILES: &[&str] = &[
    "**",
    "!**/__tests__/**",
    "!**/*.{spec,test}.*",
    "!**/{spec,test}.*",
];

/// Type checking and linting integration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCheckOptions {
    pub tsconfig: PathBuf,
    pub eslint: bool,
    pub tsconfig_root_dir: PathBuf,
    pub report_files: Vec<String>,

    #[serde(skip)]
    include: GlobSet,
    #[serde(skip)]
    exclude: GlobSet,
}

impl TypeCheckOptions {
    /// Checks scoped to the project at `root_dir`, reporting only source files
    pub fn for_project(tsconfig: PathBuf, root_dir: PathBuf) -> Result<Self, globset::Error> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();

        for pattern in CHECK_REPORT_FILES {
            match pattern.strip_prefix('!') {
                Some(negated) => exclude.add(Glob::new(negated)?),
                None => include.add(Glob::new(pattern)?),
            };
        }

        Ok(Self {
            tsconfig,
            eslint: true,
            tsconfig_root_dir: root_dir,
            report_files: CHECK_REPORT_FILES.iter().map(|p| p.to_string()).collect(),
            include: include.build()?,
            exclude: exclude.build()?,
        })
    }

    /// Whether the type checker reports diagnostics for `path` under these options
    pub fn reports(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.tsconfig_root_dir) else {
            return false;
        };
        self.include.is_match(rel) && !self.exclude.is_match(rel)
    }
}

/// Values interpolated into the HTML shell template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameters {
    pub public_path: String,
    pub app: AppParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppParameters {
    pub title: String,
    pub base_url: String,
}

/// A plugin the bundler should enable
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum PluginDescriptor {
    /// Type check and lint in a separate process
    TypeCheck(TypeCheckOptions),

    /// Build-time constants exposed as `process.env.*`
    Environment { variables: BTreeMap<String, Value> },

    /// Generate `index.html` from a template
    #[serde(rename_all = "camelCase")]
    HtmlShell {
        template: PathBuf,
        template_parameters: TemplateParameters,
    },

    /// Names the server bundle and the node arguments it is run with.
    ///
    /// Informational for the bundler: the supervisor launches the bundle
    /// itself after the first successful compile, so a bundler must never
    /// start a process for this descriptor.
    #[serde(rename_all = "camelCase")]
    StartServer { name: String, node_args: Vec<String> },

    /// Swap updated modules into the running bundle
    HotModuleReplacement,
}

/// Ordered, append-only collection of plugin descriptors
#[derive(Debug, Clone, Default)]
pub struct PluginList {
    plugins: Vec<PluginDescriptor>,
}

impl PluginList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: PluginDescriptor) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_optional(self, plugin: Option<PluginDescriptor>) -> Self {
        match plugin {
            Some(plugin) => self.with(plugin),
            None => self,
        }
    }

    pub fn build(self) -> Vec<PluginDescriptor> {
        self.plugins
    }
}
