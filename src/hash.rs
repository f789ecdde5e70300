//! Digests over solve inputs.
//!
//! A solver run is a pure function of the root project's constraints, the
//! package tree, the ignore and override sets, and the analyzer that produced
//! the manifests. Hashing those inputs gives a digest suitable for
//! memoization: when the digest matches the one recorded alongside a previous
//! solution, the solution is still valid and the solve can be skipped.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::analysis::AnalyzerInfo;
use crate::core::{PackageOrErr, PackageTree, ProjectIdentifier};

/// One constraint row: a dependency and the constraint placed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConstraint {
    pub ident: ProjectIdentifier,
    /// The constraint, rendered in the ecosystem's constraint syntax.
    pub constraint: String,
}

/// Everything that feeds a solve run.
pub struct SolveInputs<'a> {
    /// Dependency constraints declared by the root project, overrides
    /// already applied.
    pub constraints: &'a [ProjectConstraint],
    /// The override set itself.
    pub overrides: &'a [ProjectConstraint],
    /// Import paths excluded from analysis.
    pub ignored: &'a BTreeSet<String>,
    /// The root project's package tree.
    pub tree: &'a PackageTree,
    /// Identity of the analyzer that derived the manifests.
    pub analyzer: AnalyzerInfo,
}

/// Compute the digest of a solve run's inputs, as a hex string.
///
/// Constraint rows are hashed through their rendered constraint string. That
/// rendering is not injective: a branch and a tag sharing a name render
/// identically, so in rare cases a real change produces no digest change.
/// Callers comparing digests inherit this limitation.
pub fn inputs_digest(inputs: &SolveInputs<'_>) -> String {
    let mut hasher = Sha256::new();

    let mut constraints: Vec<&ProjectConstraint> = inputs.constraints.iter().collect();
    constraints.sort_by_key(|pc| pc.ident.project_root().clone());
    for pc in constraints {
        write_constraint(&mut hasher, pc);
    }

    for (path, entry) in &inputs.tree.packages {
        match entry {
            PackageOrErr::Package(p) => {
                hasher.update(p.name.as_bytes());
                if let Some(comment) = &p.comment_path {
                    hasher.update(comment.as_bytes());
                }
                hasher.update(p.import_path.as_bytes());
                for imp in &p.imports {
                    hasher.update(imp.as_bytes());
                }
                for imp in &p.test_imports {
                    hasher.update(imp.as_bytes());
                }
            }
            PackageOrErr::Err(e) => {
                hasher.update(path.as_bytes());
                hasher.update(e.as_bytes());
            }
        }
    }

    for ignored in inputs.ignored {
        hasher.update(ignored.as_bytes());
    }

    let mut overrides: Vec<&ProjectConstraint> = inputs.overrides.iter().collect();
    overrides.sort_by_key(|pc| pc.ident.project_root().clone());
    for pc in overrides {
        write_constraint(&mut hasher, pc);
    }

    hasher.update(inputs.analyzer.name.as_bytes());
    hasher.update(inputs.analyzer.version.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

fn write_constraint(hasher: &mut Sha256, pc: &ProjectConstraint) {
    hasher.update(pc.ident.project_root().as_str().as_bytes());
    if let Some(network) = pc.ident.network_name() {
        hasher.update(network.as_bytes());
    }
    hasher.update(pc.constraint.as_bytes());
}
