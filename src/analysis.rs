//! The analyzer seam.
//!
//! Deriving manifest and lock data from a source tree is the business of the
//! tool embedding this crate, not of source management itself. Tools inject a
//! `ProjectAnalyzer`; the manager invokes it against freshly-exported trees
//! and carries its output opaquely.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{ProjectIdentifier, ProjectRoot, Version};

/// Identity of an analyzer, used to version any cached analyzer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerInfo {
    pub name: String,
    pub version: u32,
}

/// Analyzes a source tree for manifest and lock information.
///
/// Implementations must be safe to call from multiple threads; the manager
/// runs analyses concurrently across sources.
pub trait ProjectAnalyzer: Send + Sync {
    /// Analyze the filesystem tree rooted at `path`, whose root import path
    /// is `import_root`, and produce the project's declared constraints and
    /// locked selections.
    fn derive_manifest_and_lock(
        &self,
        path: &Path,
        import_root: &ProjectRoot,
    ) -> anyhow::Result<(Manifest, Lock)>;

    /// The name and version of this analyzer.
    fn info(&self) -> AnalyzerInfo;
}

/// Declared constraint data for a project at some version.
///
/// The manager never interprets this beyond carrying it to the caller;
/// constraint strings use whatever syntax the analyzer's ecosystem defines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Constraints on dependencies, keyed by project root.
    pub constraints: BTreeMap<String, String>,
    /// Constraints applied only when running the project's tests.
    pub test_constraints: BTreeMap<String, String>,
    /// Import paths the project excludes from analysis.
    pub ignored: BTreeSet<String>,
}

/// A dependency selection recorded in a project's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedProject {
    pub ident: ProjectIdentifier,
    pub version: Version,
}

/// Locked dependency selections for a project at some version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub projects: Vec<LockedProject>,
}
