//! Target and workspace path resolution
//!
//! The target is the package being started; the root is the monorepo that
//! contains it. Everything the build needs to know about the filesystem
//! layout is collected into [`BundlingPaths`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Extensions tried, in order, when probing an extension-less module path
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

/// Target package and workspace root directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub target_dir: PathBuf,
    pub root_dir: PathBuf,
}

impl Paths {
    pub fn new(target_dir: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            root_dir: root_dir.into(),
        }
    }

    /// Use `target_dir` as the target and search upwards for the workspace root
    pub fn discover(target_dir: &Path) -> Self {
        let root_dir = find_workspace_root(target_dir).unwrap_or_else(|| target_dir.to_path_buf());
        debug!(
            "Target {} in workspace {}",
            target_dir.display(),
            root_dir.display()
        );
        Self::new(target_dir, root_dir)
    }

    /// Resolve path segments against the target package
    pub fn resolve_target<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        join_all(&self.target_dir, segments)
    }

    /// Resolve path segments against the workspace root
    pub fn resolve_root<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        join_all(&self.root_dir, segments)
    }
}

fn join_all<I, S>(base: &Path, segments: I) -> PathBuf
where
    I: IntoIterator<Item = S>,
    S: AsRef<Path>,
{
    segments
        .into_iter()
        .fold(base.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Walk up from `start` to the nearest package.json that declares workspaces
fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.parent();

    while let Some(dir) = current {
        let package_json = dir.join("package.json");
        if package_json.is_file() && declares_workspaces(&package_json) {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }

    None
}

fn declares_workspaces(package_json: &Path) -> bool {
    fs::read_to_string(package_json)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .map(|pkg| pkg.get("workspaces").is_some())
        .unwrap_or(false)
}

/// Find a module file, trying the bare path and then each source extension
pub fn probe_file(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    SOURCE_EXTENSIONS.iter().find_map(|ext| {
        let mut candidate = base.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then_some(candidate)
    })
}

/// Every path the build configuration refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlingPaths {
    pub target_path: PathBuf,
    pub target_src: PathBuf,
    pub target_dev: PathBuf,
    pub target_dist: PathBuf,
    pub target_entry: PathBuf,
    pub target_run_file: Option<PathBuf>,
    pub target_html: PathBuf,
    pub target_tsconfig: PathBuf,
    pub target_package_json: PathBuf,
    pub target_node_modules: PathBuf,
    pub root_node_modules: PathBuf,
}

impl BundlingPaths {
    /// Compute paths for an extension-less entry such as `src/index`
    pub fn for_entry(paths: &Paths, entry: &str) -> Self {
        let entry_base = paths.resolve_target([entry]);
        let target_entry = probe_file(&entry_base).unwrap_or_else(|| with_ts_extension(&entry_base));
        Self::for_entry_file(paths, target_entry)
    }

    /// Compute paths for an entry file that has already been located
    pub fn for_entry_file(paths: &Paths, target_entry: PathBuf) -> Self {
        let target_run_file =
            probe_file(&paths.resolve_target(["src", "run"])).filter(|run| *run != target_entry);

        let target_tsconfig = Some(paths.resolve_target(["tsconfig.json"]))
            .filter(|p| p.is_file())
            .unwrap_or_else(|| paths.resolve_root(["tsconfig.json"]));

        Self {
            target_path: paths.target_dir.clone(),
            target_src: paths.resolve_target(["src"]),
            target_dev: paths.resolve_target(["dev"]),
            target_dist: paths.resolve_target(["dist"]),
            target_entry,
            target_run_file,
            target_html: paths.resolve_target(["public", "index.html"]),
            target_tsconfig,
            target_package_json: paths.resolve_target(["package.json"]),
            target_node_modules: paths.resolve_target(["node_modules"]),
            root_node_modules: paths.resolve_root(["node_modules"]),
        }
    }
}

fn with_ts_extension(base: &Path) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".ts");
    PathBuf::from(path)
}
