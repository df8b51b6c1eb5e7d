//! Entry point resolution
//!
//! Decides which source file a backend or backend plugin is started from.
//! Plugins migrated to the current layout start from `dev/index`, legacy
//! plugins from `src/run`, and full backends always from `src/index`.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::paths::{probe_file, Paths};

/// Which layout conventions are in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryMode {
    /// Historical single-entry layout, built through the bundler
    Legacy,
    /// Current plugin layout, run directly with a source transform
    Current,
}

impl EntryMode {
    /// Map the legacy toggle to a mode
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            EntryMode::Legacy
        } else {
            EntryMode::Current
        }
    }
}

/// What kind of package is being started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageRole {
    Backend,
    Plugin,
}

/// Well-known entry file locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    DevIndex,
    SrcRun,
    SrcIndex,
}

impl CandidateKind {
    /// Extension-less path relative to the target package
    pub fn relative_path(&self) -> &'static str {
        match self {
            CandidateKind::DevIndex => "dev/index",
            CandidateKind::SrcRun => "src/run",
            CandidateKind::SrcIndex => "src/index",
        }
    }
}

/// A probed entry location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCandidate {
    /// Resolved file when it exists, otherwise the extension-less base path
    pub path: PathBuf,
    pub kind: CandidateKind,
    pub exists: bool,
}

/// Why no entry could be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEntry {
    /// `src/run` exists but `dev/index` does not
    NotMigrated,
    /// Neither `dev/index` nor `src/run` exists
    NoDevIndex,
    /// Legacy mode without `src/run`
    NoLegacyRun,
    /// Backend package without `src/index`
    NoBackendIndex,
}

impl fmt::Display for MissingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingEntry::NotMigrated => write!(
                f,
                "The 'dev' directory is missing. The plugin might not be updated for the new backend system. To run, use \"LEGACY_BACKEND_START=1 yarn start\"."
            ),
            MissingEntry::NoDevIndex => write!(
                f,
                "The 'dev' directory is missing. Please create a proper dev/index.ts in order to start the plugin."
            ),
            MissingEntry::NoLegacyRun => write!(
                f,
                "src/run.ts is missing. Please create the file or run the command without LEGACY_BACKEND_START"
            ),
            MissingEntry::NoBackendIndex => write!(
                f,
                "src/index.ts is missing. Please create the file in order to start the backend."
            ),
        }
    }
}

/// Outcome of entry resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedEntry {
    Found {
        /// Extension-less entry relative to the target, e.g. `dev/index`
        entry_path: String,
        /// The concrete file that was found
        file: PathBuf,
        mode: EntryMode,
    },
    NotFound(MissingEntry),
}

/// Probes the target package for entry files
pub struct EntryResolver {
    paths: Paths,
}

impl EntryResolver {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// Candidate locations in probe order
    pub fn candidates(&self, role: PackageRole, mode: EntryMode) -> Vec<EntryCandidate> {
        let kinds: &[CandidateKind] = match (role, mode) {
            (PackageRole::Backend, _) => &[CandidateKind::SrcIndex],
            (PackageRole::Plugin, EntryMode::Current) => {
                &[CandidateKind::DevIndex, CandidateKind::SrcRun]
            }
            (PackageRole::Plugin, EntryMode::Legacy) => &[CandidateKind::SrcRun],
        };

        kinds.iter().map(|&kind| self.probe(kind)).collect()
    }

    fn probe(&self, kind: CandidateKind) -> EntryCandidate {
        let base = self.paths.resolve_target([kind.relative_path()]);
        match probe_file(&base) {
            Some(path) => EntryCandidate {
                path,
                kind,
                exists: true,
            },
            None => EntryCandidate {
                path: base,
                kind,
                exists: false,
            },
        }
    }

    /// Pick the entry for a package in the given mode
    pub fn resolve_entry(&self, role: PackageRole, mode: EntryMode) -> ResolvedEntry {
        let candidates = self.candidates(role, mode);
        let present = |kind: CandidateKind| candidates.iter().find(|c| c.kind == kind && c.exists);

        let chosen = match (role, mode) {
            (PackageRole::Backend, _) => {
                present(CandidateKind::SrcIndex).ok_or(MissingEntry::NoBackendIndex)
            }
            (PackageRole::Plugin, EntryMode::Current) => match present(CandidateKind::DevIndex) {
                Some(candidate) => Ok(candidate),
                None if present(CandidateKind::SrcRun).is_some() => Err(MissingEntry::NotMigrated),
                None => Err(MissingEntry::NoDevIndex),
            },
            (PackageRole::Plugin, EntryMode::Legacy) => {
                present(CandidateKind::SrcRun).ok_or(MissingEntry::NoLegacyRun)
            }
        };

        match chosen {
            Ok(candidate) => {
                debug!("Resolved entry {}", candidate.path.display());
                ResolvedEntry::Found {
                    entry_path: candidate.kind.relative_path().to_string(),
                    file: candidate.path.clone(),
                    mode,
                }
            }
            Err(missing) => ResolvedEntry::NotFound(missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn fixture(files: &[&str]) -> (tempfile::TempDir, EntryResolver) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "export {};").unwrap();
        }
        let resolver = EntryResolver::new(Paths::new(dir.path(), dir.path()));
        (dir, resolver)
    }

    fn found(entry: &ResolvedEntry) -> (&str, &Path) {
        match entry {
            ResolvedEntry::Found { entry_path, file, .. } => (entry_path.as_str(), file.as_path()),
            ResolvedEntry::NotFound(missing) => panic!("expected an entry, got {missing:?}"),
        }
    }

    #[test]
    fn test_current_mode_with_dev_index() {
        let (dir, resolver) = fixture(&["dev/index.ts", "src/run.ts"]);
        let entry = resolver.resolve_entry(PackageRole::Plugin, EntryMode::Current);

        let (entry_path, file) = found(&entry);
        assert_eq!(entry_path, "dev/index");
        assert_eq!(file, dir.path().join("dev/index.ts"));
    }

    #[test]
    fn test_current_mode_not_migrated() {
        let (_dir, resolver) = fixture(&["src/run.ts"]);
        let entry = resolver.resolve_entry(PackageRole::Plugin, EntryMode::Current);

        assert_eq!(entry, ResolvedEntry::NotFound(MissingEntry::NotMigrated));
        assert!(MissingEntry::NotMigrated
            .to_string()
            .contains("might not be updated"));
    }

    #[test]
    fn test_current_mode_without_any_entry() {
        let (_dir, resolver) = fixture(&[]);
        let entry = resolver.resolve_entry(PackageRole::Plugin, EntryMode::Current);

        assert_eq!(entry, ResolvedEntry::NotFound(MissingEntry::NoDevIndex));
        assert!(MissingEntry::NoDevIndex
            .to_string()
            .contains("create a proper dev/index.ts"));
    }

    #[test]
    fn test_legacy_mode_with_run_file() {
        let (dir, resolver) = fixture(&["src/run.ts"]);
        let entry = resolver.resolve_entry(PackageRole::Plugin, EntryMode::Legacy);

        let (entry_path, file) = found(&entry);
        assert_eq!(entry_path, "src/run");
        assert_eq!(file, dir.path().join("src/run.ts"));
    }

    #[test]
    fn test_legacy_mode_ignores_dev_index() {
        let (_dir, resolver) = fixture(&["dev/index.ts"]);
        let entry = resolver.resolve_entry(PackageRole::Plugin, EntryMode::Legacy);

        assert_eq!(entry, ResolvedEntry::NotFound(MissingEntry::NoLegacyRun));
        assert!(MissingEntry::NoLegacyRun
            .to_string()
            .contains("without LEGACY_BACKEND_START"));
    }

    #[test]
    fn test_backend_entry() {
        let (_dir, resolver) = fixture(&["src/index.ts"]);
        for mode in [EntryMode::Legacy, EntryMode::Current] {
            let entry = resolver.resolve_entry(PackageRole::Backend, mode);
            assert_eq!(found(&entry).0, "src/index");
        }

        let (_dir, resolver) = fixture(&[]);
        assert_eq!(
            resolver.resolve_entry(PackageRole::Backend, EntryMode::Current),
            ResolvedEntry::NotFound(MissingEntry::NoBackendIndex)
        );
    }

    #[test]
    fn test_candidate_order() {
        let (_dir, resolver) = fixture(&[]);
        let kinds: Vec<_> = resolver
            .candidates(PackageRole::Plugin, EntryMode::Current)
            .into_iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(kinds, vec![CandidateKind::DevIndex, CandidateKind::SrcRun]);
    }
}
