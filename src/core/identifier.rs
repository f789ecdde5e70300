//! Project identity - WHERE a project lives in import-path space, and where
//! its source is actually fetched from.
//!
//! A `ProjectRoot` is the canonical import-path prefix under which exactly
//! one source lives; it is the primary map key throughout the crate. A
//! `ProjectIdentifier` couples a root with an optional network override.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The canonical import-path prefix that corresponds to exactly one source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectRoot(String);

impl ProjectRoot {
    /// Create a project root from an import path, normalizing it.
    ///
    /// Normalization trims surrounding whitespace and any trailing slashes;
    /// the empty path stays empty.
    pub fn new(path: impl AsRef<str>) -> Self {
        ProjectRoot(normalize_import_path(path.as_ref()))
    }

    /// The root as a normalized import-path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `path` is this root or one of its descendants.
    pub fn contains(&self, path: &str) -> bool {
        let path = normalize_import_path(path);
        path == self.0 || path.starts_with(&format!("{}/", self.0))
    }
}

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectRoot {
    fn from(s: &str) -> Self {
        ProjectRoot::new(s)
    }
}

/// Normalize an import path: trim whitespace and trailing slashes.
pub(crate) fn normalize_import_path(path: &str) -> String {
    path.trim().trim_end_matches('/').to_string()
}

/// Identifies a project and, optionally, where its source is fetched from.
///
/// Two identifiers are source-equivalent when their effective network names
/// deduce to the same underlying repository; the source coordinator collapses
/// such aliases onto one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectIdentifier {
    project_root: ProjectRoot,
    network_name: Option<String>,
}

impl ProjectIdentifier {
    /// Identify a project by its root alone; the source is fetched from
    /// wherever the root deduces to.
    pub fn new(project_root: ProjectRoot) -> Self {
        ProjectIdentifier {
            project_root,
            network_name: None,
        }
    }

    /// Identify a project whose source is fetched from somewhere other than
    /// its root. The network name may be an import path or a full URL.
    pub fn with_network_name(project_root: ProjectRoot, network_name: impl Into<String>) -> Self {
        ProjectIdentifier {
            project_root,
            network_name: Some(network_name.into()),
        }
    }

    /// The canonical import-path prefix of the project.
    pub fn project_root(&self) -> &ProjectRoot {
        &self.project_root
    }

    /// The network override, if one was given.
    pub fn network_name(&self) -> Option<&str> {
        self.network_name.as_deref()
    }

    /// The name the source is actually fetched under: the override when
    /// present, the project root otherwise.
    pub fn effective_network_name(&self) -> &str {
        match &self.network_name {
            Some(name) => name,
            None => self.project_root.as_str(),
        }
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.network_name {
            Some(name) if name != self.project_root.as_str() => {
                write!(f, "{} (from {})", self.project_root, name)
            }
            _ => write!(f, "{}", self.project_root),
        }
    }
}

impl From<&str> for ProjectIdentifier {
    fn from(s: &str) -> Self {
        ProjectIdentifier::new(ProjectRoot::new(s))
    }
}
