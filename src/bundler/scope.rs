//! Module scope restriction
//!
//! Source files of a package may only import relative modules that live in
//! the package's own source directories. Packages are still imported by
//! name, which keeps independently developed plugins isolated from each
//! other's internals.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::utils::is_within;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("You attempted to import {request} which falls outside of the package source directories ({importer})")]
pub struct ScopeViolation {
    pub request: String,
    pub importer: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleScope {
    /// Directories whose files are subject to the restriction
    pub app_src: Vec<PathBuf>,

    /// Individual files outside `app_src` that may still be imported
    pub allowed_files: Vec<PathBuf>,
}

impl ModuleScope {
    pub fn new(app_src: Vec<PathBuf>, allowed_files: Vec<PathBuf>) -> Self {
        Self {
            app_src,
            allowed_files,
        }
    }

    /// Check an import of `request` from `importer` that resolved to `resolved`.
    ///
    /// Models the restriction the bundler applies with this scope during resolution.
    pub fn check(&self, importer: &Path, request: &str, resolved: &Path) -> Result<(), ScopeViolation> {
        let is_relative = request.starts_with('.') || request.starts_with('/');
        let from_source = self.app_src.iter().any(|dir| is_within(importer, dir));

        if !is_relative || !from_source {
            return Ok(());
        }

        let resolved = normalize(resolved);
        let in_package_deps = resolved.components().any(|c| c.as_os_str() == "node_modules");
        let in_scope = self.app_src.iter().any(|dir| is_within(&resolved, dir));
        let allowed = self.allowed_files.iter().any(|file| *file == resolved);

        if in_package_deps || in_scope || allowed {
            Ok(())
        } else {
            Err(ScopeViolation {
                request: request.to_string(),
                importer: importer.to_path_buf(),
            })
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
