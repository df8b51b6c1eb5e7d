//! Externals for server bundles
//!
//! Installed packages are loaded from node_modules at runtime rather than
//! bundled. Requests matching the allowlist are bundled anyway, which is
//! how packages from the project's own namespace pick up local changes
//! without a reinstall.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use walkdir::WalkDir;

use super::policy::HOT_POLL_CLIENT;

/// A request that is always bundled
#[derive(Debug, Clone)]
pub enum AllowEntry {
    Exact(String),
    Pattern(Regex),
}

impl AllowEntry {
    pub fn matches(&self, request: &str) -> bool {
        match self {
            AllowEntry::Exact(exact) => exact == request,
            AllowEntry::Pattern(pattern) => pattern.is_match(request),
        }
    }
}

impl Serialize for AllowEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AllowEntry::Exact(exact) => serializer.serialize_str(exact),
            AllowEntry::Pattern(pattern) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("regex", pattern.as_str())?;
                map.end()
            }
        }
    }
}

/// Allowlist for a namespace: the hot poll client plus every `<namespace>/*` package
pub fn namespace_allowlist(namespace: &str) -> Result<Vec<AllowEntry>, regex::Error> {
    let pattern = Regex::new(&format!("^{}/.*", regex::escape(namespace)))?;
    Ok(vec![
        AllowEntry::Exact(HOT_POLL_CLIENT.to_string()),
        AllowEntry::Pattern(pattern),
    ])
}

/// Externalize the packages installed in one node_modules directory
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExternals {
    pub modules_dir: PathBuf,
    pub allowlist: Vec<AllowEntry>,
}

impl NodeExternals {
    pub fn new(modules_dir: impl Into<PathBuf>, allowlist: Vec<AllowEntry>) -> Self {
        Self {
            modules_dir: modules_dir.into(),
            allowlist,
        }
    }

    /// Package names installed in `modules_dir`, including scoped packages
    pub fn installed_packages(&self) -> BTreeSet<String> {
        list_installed_packages(&self.modules_dir)
    }

    /// Whether `request` is left to the runtime, judged against the packages on disk.
    ///
    /// Mirrors the decision the bundler makes from this entry; nothing here enforces it.
    pub fn is_external(&self, request: &str) -> bool {
        self.is_external_among(request, &self.installed_packages())
    }

    /// Whether `request` is left to the runtime, given the installed packages
    pub fn is_external_among(&self, request: &str, installed: &BTreeSet<String>) -> bool {
        let Some(name) = package_name(request) else {
            return false;
        };

        installed.contains(name) && !self.allowlist.iter().any(|entry| entry.matches(request))
    }
}

/// Package name of a bare request, `None` for relative and absolute requests
pub fn package_name(request: &str) -> Option<&str> {
    if request.is_empty() || request.starts_with('.') || request.starts_with('/') {
        return None;
    }

    let request = request.split('?').next().unwrap_or(request);
    let mut boundaries = request.match_indices('/').map(|(idx, _)| idx);

    let end = if request.starts_with('@') {
        boundaries.nth(1)
    } else {
        boundaries.next()
    };

    Some(&request[..end.unwrap_or(request.len())])
}

fn list_installed_packages(modules_dir: &Path) -> BTreeSet<String> {
    WalkDir::new(modules_dir)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir() || entry.path_is_symlink())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(modules_dir).ok()?;
            let parts: Vec<_> = rel.iter().map(|p| p.to_string_lossy().to_string()).collect();
            match parts.as_slice() {
                [name] if !name.starts_with('.') && !name.starts_with('@') => Some(name.clone()),
                [scope, name] if scope.starts_with('@') => Some(format!("{}/{}", scope, name)),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn installed(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("express"), Some("express"));
        assert_eq!(package_name("express/lib/router"), Some("express"));
        assert_eq!(package_name("@backstage/backend-common"), Some("@backstage/backend-common"));
        assert_eq!(package_name("@backstage/config/schema"), Some("@backstage/config"));
        assert_eq!(package_name("webpack/hot/poll?100"), Some("webpack"));
        assert_eq!(package_name("./local"), None);
        assert_eq!(package_name("/abs/path"), None);
    }

    #[test]
    fn test_namespace_packages_are_bundled() {
        let externals = NodeExternals::new("/repo/node_modules", namespace_allowlist("@backstage").unwrap());
        let packages = installed(&["express", "webpack", "@backstage/config", "@types/node"]);

        assert!(!externals.is_external_among("@backstage/config", &packages));
        assert!(!externals.is_external_among(HOT_POLL_CLIENT, &packages));
        assert!(externals.is_external_among("express", &packages));
        assert!(externals.is_external_among("express/lib/router", &packages));
        assert!(externals.is_external_among("@types/node", &packages));
        assert!(externals.is_external_among("webpack", &packages));
    }

    #[test]
    fn test_uninstalled_and_relative_requests_are_bundled() {
        let externals = NodeExternals::new("/repo/node_modules", namespace_allowlist("@backstage").unwrap());
        let packages = installed(&["express"]);

        assert!(!externals.is_external_among("lodash", &packages));
        assert!(!externals.is_external_among("./service", &packages));
    }

    #[test]
    fn test_namespace_is_escaped() {
        let allowlist = namespace_allowlist("@acme.io").unwrap();
        assert!(allowlist[1].matches("@acme.io/plugin"));
        assert!(!allowlist[1].matches("@acmexio/plugin"));
    }

    #[test]
    fn test_installed_packages_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        for pkg in ["express", "@backstage/config", "@backstage/types", ".bin"] {
            fs::create_dir_all(dir.path().join(pkg)).unwrap();
        }

        let externals = NodeExternals::new(dir.path(), namespace_allowlist("@backstage").unwrap());
        assert_eq!(
            externals.installed_packages(),
            installed(&["@backstage/config", "@backstage/types", "express"])
        );
        assert!(externals.is_external("express"));
        assert!(!externals.is_external("@backstage/types"));
    }
}
