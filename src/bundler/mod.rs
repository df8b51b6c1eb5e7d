//! Build configuration
//!
//! Produces the configuration handed to the external bundler. Browser and
//! server bundles go through the same construction path; what differs
//! between them lives in [`TargetPolicy`].

mod compiler;
mod externals;
mod policy;
mod scope;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{ConfigError, ConfigPayload, ConfigReader};
use crate::paths::BundlingPaths;
use crate::plugins::{
    AppParameters, PluginDescriptor, PluginList, TemplateParameters, TypeCheckOptions,
};
use crate::supervisor::process::{node_args, InspectOptions};
use crate::utils::to_slash;

pub use compiler::{CompileEvent, Compiler, CompilerError, ExternalCompiler, WatchSession};
pub use externals::{namespace_allowlist, package_name, AllowEntry, NodeExternals};
pub use policy::{NodePolicy, OutputNaming, TargetPolicy, UnsupportedBuiltin, HOT_POLL_CLIENT};
pub use scope::{ModuleScope, ScopeViolation};

/// Base that relative `app.baseUrl` values are resolved against
pub const PLACEHOLDER_BASE_URL: &str = "https://backstage-app.dev";

/// Module extensions resolved without being spelled out
pub const RESOLVE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mjs", ".js", ".jsx"];

/// package.json fields consulted in order; `main:src` points at sources
pub const MAIN_FIELDS: &[&str] = &["main:src", "browser", "module", "main"];

/// Name of the emitted server entry bundle
pub const SERVER_BUNDLE: &str = "main.js";

#[derive(Debug, Error)]
pub enum BuildConfigError {
    #[error("Invalid app.baseUrl '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid package namespace: {0}")]
    Namespace(#[from] regex::Error),

    #[error("Invalid check report patterns: {0}")]
    ReportFilter(#[from] globset::Error),

    #[error("Failed to embed app config: {0}")]
    AppConfig(#[from] serde_json::Error),
}

/// Runtime a bundle is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum BuildTarget {
    #[serde(rename = "web")]
    Browser,
    #[serde(rename = "node")]
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Development,
    Production,
}

/// Inputs of a single configuration build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub checks_enabled: bool,
    pub is_dev: bool,
    pub config: ConfigReader,
    pub app_configs: Vec<ConfigPayload>,
    pub inspect: InspectOptions,
    pub require: Option<String>,
    pub import: Option<String>,
    /// Package namespace that is always bundled and watched
    pub namespace: String,
}

impl BuildOptions {
    /// Development options for the given app config payloads
    pub fn development(app_configs: Vec<ConfigPayload>, namespace: impl Into<String>) -> Self {
        Self {
            checks_enabled: false,
            is_dev: true,
            config: ConfigReader::from_payloads(&app_configs),
            app_configs,
            inspect: InspectOptions::Disabled,
            require: None,
            import: None,
            namespace: namespace.into(),
        }
    }

    /// Node arguments for the launched server process
    pub fn node_args(&self) -> Vec<String> {
        node_args(&self.inspect, self.require.as_deref(), self.import.as_deref())
    }
}

/// Which paths the bundler's watcher skips
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchOptions {
    /// Patterns in the bundler's own syntax
    pub ignored: Vec<String>,

    #[serde(skip)]
    namespace: String,
}

impl WatchOptions {
    /// Ignore third-party dependencies except the project namespace
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            ignored: vec![format!("node_modules/(?!{})", regex::escape(namespace))],
            namespace: namespace.to_string(),
        }
    }

    pub fn is_ignored(&self, path: &std::path::Path) -> bool {
        let parts: Vec<String> = path
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let scope = self.namespace.split('/').next().unwrap_or(&self.namespace);

        parts.iter().enumerate().any(|(idx, part)| {
            part == "node_modules" && parts.get(idx + 1).map(String::as_str) != Some(scope)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOptions {
    pub extensions: Vec<String>,
    pub main_fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<PathBuf>,
    pub scope: ModuleScope,
    pub alias: BTreeMap<String, String>,
}

impl ResolveOptions {
    /// The package.json field the bundler resolves a package through under these options
    pub fn main_entry<'a>(&self, package_json: &'a serde_json::Value) -> Option<&'a str> {
        self.main_fields
            .iter()
            .find_map(|field| package_json.get(field.as_str())?.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,
    pub filename: String,
    pub chunk_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Performance {
    pub hints: bool,
}

/// Configuration handed to the external bundler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    pub mode: BuildMode,
    pub target: BuildTarget,
    pub profile: bool,
    pub bail: bool,
    pub watch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_options: Option<WatchOptions>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub externals: Vec<NodeExternals>,
    pub node: NodePolicy,
    pub performance: Performance,
    pub devtool: String,
    pub context: PathBuf,
    pub entry: Vec<String>,
    pub resolve: ResolveOptions,
    pub output: OutputOptions,
    pub plugins: Vec<PluginDescriptor>,
}

impl BuildConfiguration {
    /// Whether the bundler leaves a bare request to node_modules at runtime.
    ///
    /// Evaluates the configured externals; the decision itself is made by the bundler.
    pub fn is_external(&self, request: &str) -> bool {
        self.externals.iter().any(|ext| ext.is_external(request))
    }

    pub fn start_server(&self) -> Option<(&str, &[String])> {
        self.plugins.iter().find_map(|plugin| match plugin {
            PluginDescriptor::StartServer { name, node_args } => {
                Some((name.as_str(), node_args.as_slice()))
            }
            _ => None,
        })
    }
}

/// Parse `app.baseUrl`, resolving path-only values against a placeholder origin
pub fn resolve_base_url(config: &ConfigReader) -> Result<Url, BuildConfigError> {
    let value = config.get_string("app.baseUrl")?;
    let invalid = |source| BuildConfigError::InvalidBaseUrl {
        value: value.clone(),
        source,
    };

    match Url::parse(&value) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) if value.starts_with('/') => {
            Url::parse(PLACEHOLDER_BASE_URL)
                .and_then(|base| base.join(&value))
                .map_err(invalid)
        }
        Err(source) => Err(invalid(source)),
    }
}

/// Assemble the bundler configuration for a target
pub fn build_config(
    paths: &BundlingPaths,
    target: BuildTarget,
    options: &BuildOptions,
) -> Result<BuildConfiguration, BuildConfigError> {
    let base_url = resolve_base_url(&options.config)?;
    let policy = TargetPolicy::for_target(target);
    let naming = OutputNaming::for_mode(options.is_dev);

    debug!("Building {:?} configuration for {}", target, paths.target_entry.display());

    let checks = if options.checks_enabled {
        Some(PluginDescriptor::TypeCheck(TypeCheckOptions::for_project(
            paths.target_tsconfig.clone(),
            paths.target_path.clone(),
        )?))
    } else {
        None
    };

    let plugins = match target {
        BuildTarget::Browser => PluginList::new()
            .with_optional(checks)
            .with(PluginDescriptor::Environment {
                variables: BTreeMap::from([(
                    "APP_CONFIG".to_string(),
                    serde_json::to_value(&options.app_configs)?,
                )]),
            })
            .with(PluginDescriptor::HtmlShell {
                template: paths.target_html.clone(),
                template_parameters: TemplateParameters {
                    public_path: trim_trailing_slash(base_url.path()).to_string(),
                    app: AppParameters {
                        title: options.config.get_string("app.title")?,
                        base_url: base_url.as_str().to_string(),
                    },
                },
            }),
        BuildTarget::Server => PluginList::new()
            .with(PluginDescriptor::StartServer {
                name: SERVER_BUNDLE.to_string(),
                node_args: options.node_args(),
            })
            .with(PluginDescriptor::HotModuleReplacement)
            .with_optional(checks),
    }
    .build();

    let externals = if policy.externalize_node_modules {
        vec![
            NodeExternals::new(
                paths.root_node_modules.clone(),
                namespace_allowlist(&options.namespace)?,
            ),
            NodeExternals::new(
                paths.target_node_modules.clone(),
                namespace_allowlist(&options.namespace)?,
            ),
        ]
    } else {
        Vec::new()
    };

    let watch = options.is_dev && policy.watch_in_dev;

    let mut entry = vec![policy.hot_client.to_string(), to_slash(&paths.target_entry)];
    if policy.include_run_file {
        entry.extend(paths.target_run_file.as_deref().map(to_slash));
    }

    let modules = if policy.explicit_module_roots {
        vec![paths.target_node_modules.clone(), paths.root_node_modules.clone()]
    } else {
        Vec::new()
    };

    Ok(BuildConfiguration {
        mode: if options.is_dev {
            BuildMode::Development
        } else {
            BuildMode::Production
        },
        target,
        profile: false,
        bail: false,
        watch,
        watch_options: watch.then(|| WatchOptions::for_namespace(&options.namespace)),
        externals,
        node: policy.node,
        performance: Performance { hints: false },
        devtool: if options.is_dev {
            "cheap-module-eval-source-map"
        } else {
            "source-map"
        }
        .to_string(),
        context: paths.target_path.clone(),
        entry,
        resolve: ResolveOptions {
            extensions: RESOLVE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            main_fields: MAIN_FIELDS.iter().map(|s| s.to_string()).collect(),
            modules,
            scope: ModuleScope::new(
                vec![paths.target_src.clone(), paths.target_dev.clone()],
                vec![paths.target_package_json.clone()],
            ),
            alias: BTreeMap::from([(
                "react-dom".to_string(),
                "@hot-loader/react-dom".to_string(),
            )]),
        },
        output: OutputOptions {
            path: paths.target_dist.clone(),
            public_path: policy.public_path.then(|| base_url.path().to_string()),
            filename: naming.filename().to_string(),
            chunk_filename: naming.chunk_filename().to_string(),
        },
        plugins,
    })
}

fn trim_trailing_slash(path: &str) -> &str {
    path.strip_suffix('/').unwrap_or(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::paths::Paths;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;

    pub(crate) fn app_config(base_url: &str) -> Vec<ConfigPayload> {
        vec![ConfigPayload::from_toml_str(
            "app-config.toml",
            &format!("[app]\nbaseUrl = \"{}\"\ntitle = \"Dev Portal\"\n", base_url),
        )
        .unwrap()]
    }

    pub(crate) fn server_config(root: &Path) -> BuildConfiguration {
        let paths = BundlingPaths::for_entry(&Paths::new(root, root), "src/index");
        let options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");
        build_config(&paths, BuildTarget::Server, &options).unwrap()
    }

    fn fixture() -> (tempfile::TempDir, BundlingPaths) {
        let dir = tempfile::tempdir().unwrap();
        for file in ["src/index.ts", "src/run.ts"] {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "").unwrap();
        }
        let paths = BundlingPaths::for_entry(&Paths::new(dir.path(), dir.path()), "src/index");
        (dir, paths)
    }

    #[test]
    fn test_invalid_base_url_fails_for_both_targets() {
        let (_dir, paths) = fixture();
        let options = BuildOptions::development(app_config("not a url"), "@backstage");

        for target in [BuildTarget::Browser, BuildTarget::Server] {
            let err = build_config(&paths, target, &options).unwrap_err();
            match err {
                BuildConfigError::InvalidBaseUrl { value, source } => {
                    assert_eq!(value, "not a url");
                    assert_eq!(source, url::ParseError::RelativeUrlWithoutBase);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_missing_base_url_is_a_config_error() {
        let (_dir, paths) = fixture();
        let options = BuildOptions::development(Vec::new(), "@backstage");

        let err = build_config(&paths, BuildTarget::Server, &options).unwrap_err();
        assert!(matches!(err, BuildConfigError::Config(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_path_only_base_url() {
        let reader = ConfigReader::from_payloads(&app_config("/portal/"));
        let url = resolve_base_url(&reader).unwrap();
        assert_eq!(url.as_str(), "https://backstage-app.dev/portal/");
    }

    #[test]
    fn test_browser_public_path_and_template() {
        let (_dir, paths) = fixture();
        let options = BuildOptions::development(app_config("https://example.com/app/"), "@backstage");

        let config = build_config(&paths, BuildTarget::Browser, &options).unwrap();

        assert_eq!(config.output.public_path.as_deref(), Some("/app/"));
        let html = config
            .plugins
            .iter()
            .find_map(|p| match p {
                PluginDescriptor::HtmlShell {
                    template_parameters,
                    ..
                } => Some(template_parameters.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(html.public_path, "/app");
        assert_eq!(html.app.base_url, "https://example.com/app/");
        assert_eq!(html.app.title, "Dev Portal");
        assert!(!html.public_path.contains("//"));
    }

    #[test]
    fn test_browser_embeds_app_config_payloads() {
        let (_dir, paths) = fixture();
        let options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");

        let config = build_config(&paths, BuildTarget::Browser, &options).unwrap();

        let embedded = config
            .plugins
            .iter()
            .find_map(|p| match p {
                PluginDescriptor::Environment { variables } => variables.get("APP_CONFIG").cloned(),
                _ => None,
            })
            .unwrap();
        assert_eq!(embedded, serde_json::to_value(&options.app_configs).unwrap());
        assert_eq!(embedded[0]["context"], "app-config.toml");
        assert_eq!(embedded[0]["data"]["app"]["baseUrl"], "http://localhost:3000");
    }

    #[test]
    fn test_browser_config_shape() {
        let (_dir, paths) = fixture();
        let mut options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");
        options.is_dev = false;

        let config = build_config(&paths, BuildTarget::Browser, &options).unwrap();

        assert_eq!(config.mode, BuildMode::Production);
        assert!(config.externals.is_empty());
        assert!(!config.watch);
        assert_eq!(config.entry[0], "react-hot-loader/patch");
        assert_eq!(config.entry.len(), 2);
        assert_eq!(config.output.filename, "[name].[hash:8].js");
        assert!(config.node.check_builtin("fs").is_err());
        assert!(config.resolve.modules.is_empty());
        assert!(config
            .plugins
            .iter()
            .any(|p| matches!(p, PluginDescriptor::Environment { variables } if variables.contains_key("APP_CONFIG"))));
        assert!(config.start_server().is_none());
    }

    #[test]
    fn test_server_config_shape() {
        let (dir, paths) = fixture();
        let mut options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");
        options.inspect = InspectOptions::Attach { address: None };
        options.require = Some("./instrumentation.js".to_string());

        let config = build_config(&paths, BuildTarget::Server, &options).unwrap();

        assert_eq!(config.mode, BuildMode::Development);
        assert!(config.watch);
        assert_eq!(
            config.entry,
            vec![
                HOT_POLL_CLIENT.to_string(),
                to_slash(&dir.path().join("src/index.ts")),
                to_slash(&dir.path().join("src/run.ts")),
            ]
        );
        assert_eq!(config.externals.len(), 2);
        assert_eq!(config.node.get("__dirname"), Some(true));
        assert_eq!(config.output.public_path, None);
        assert_eq!(config.output.filename, "[name].js");
        assert_eq!(
            config.resolve.modules,
            vec![dir.path().join("node_modules"), dir.path().join("node_modules")]
        );
        assert_eq!(
            config.start_server(),
            Some((
                "main.js",
                &["--inspect".to_string(), "--require".to_string(), "./instrumentation.js".to_string()][..]
            ))
        );
        assert!(config
            .plugins
            .iter()
            .any(|p| matches!(p, PluginDescriptor::HotModuleReplacement)));
    }

    #[test]
    fn test_checks_attach_type_check_plugin() {
        let (dir, paths) = fixture();
        let mut options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");

        let without = build_config(&paths, BuildTarget::Server, &options).unwrap();
        assert!(!without.plugins.iter().any(|p| matches!(p, PluginDescriptor::TypeCheck(_))));

        options.checks_enabled = true;
        for target in [BuildTarget::Browser, BuildTarget::Server] {
            let config = build_config(&paths, target, &options).unwrap();
            let checks = config
                .plugins
                .iter()
                .find_map(|p| match p {
                    PluginDescriptor::TypeCheck(checks) => Some(checks),
                    _ => None,
                })
                .unwrap();
            assert_eq!(checks.tsconfig_root_dir, dir.path());
            assert!(checks.reports(&dir.path().join("src/index.ts")));
            assert!(!checks.reports(&dir.path().join("src/index.test.ts")));
        }
    }

    #[test]
    fn test_server_externals_respect_namespace() {
        let (dir, paths) = fixture();
        for pkg in ["express", "winston", "@backstage/backend-common", "@backstage/config"] {
            fs::create_dir_all(dir.path().join("node_modules").join(pkg)).unwrap();
        }
        let options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");

        let config = build_config(&paths, BuildTarget::Server, &options).unwrap();

        assert!(config.is_external("express"));
        assert!(config.is_external("winston/lib/logger"));
        assert!(!config.is_external("@backstage/backend-common"));
        assert!(!config.is_external("@backstage/config"));
        assert!(!config.is_external("./router"));
    }

    #[test]
    fn test_watch_options_skip_third_party_dependencies() {
        let watch = WatchOptions::for_namespace("@backstage");

        assert!(watch.is_ignored(Path::new("/repo/node_modules/express/index.js")));
        assert!(!watch.is_ignored(Path::new("/repo/node_modules/@backstage/config/src/index.ts")));
        assert!(!watch.is_ignored(Path::new("/repo/plugins/catalog/src/index.ts")));
        assert_eq!(watch.ignored, vec!["node_modules/(?!@backstage)".to_string()]);
    }

    #[test]
    fn test_main_fields_prefer_sources() {
        let (_dir, paths) = fixture();
        let options = BuildOptions::development(app_config("http://localhost:3000"), "@backstage");
        let config = build_config(&paths, BuildTarget::Server, &options).unwrap();

        let package_json = serde_json::json!({
            "main": "dist/index.cjs.js",
            "module": "dist/index.esm.js",
            "main:src": "src/index.ts"
        });
        assert_eq!(config.resolve.main_entry(&package_json), Some("src/index.ts"));

        let published = serde_json::json!({ "main": "dist/index.cjs.js" });
        assert_eq!(config.resolve.main_entry(&published), Some("dist/index.cjs.js"));
        assert_eq!(config.resolve.extensions, vec![".ts", ".tsx", ".mjs", ".js", ".jsx"]);
    }

    #[test]
    fn test_configuration_serializes_for_bundler() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_value(server_config(dir.path())).unwrap();

        assert_eq!(json["target"], "node");
        assert_eq!(json["mode"], "development");
        assert_eq!(json["node"]["__dirname"], true);
        assert_eq!(json["externals"][0]["allowlist"][0], HOT_POLL_CLIENT);
        assert_eq!(json["externals"][0]["allowlist"][1]["regex"], "^@backstage/.*");
        assert_eq!(json["watchOptions"]["ignored"][0], "node_modules/(?!@backstage)");
        assert_eq!(json["plugins"][0]["plugin"], "start-server");
        assert_eq!(json["resolve"]["mainFields"][0], "main:src");
    }
}
