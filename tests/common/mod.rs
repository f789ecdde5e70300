//! Shared fixtures for integration tests.
//!
//! Builds real git repositories on disk so the full clone/fetch/export path
//! runs without touching the network, plus a TOML-backed analyzer fixture.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use git2::{IndexAddOption, Repository, Signature};
use tempfile::TempDir;
use url::Url;

use moorage::{Lock, Manifest, ProjectAnalyzer, ProjectIdentifier, ProjectRoot, Revision};

/// The import root every fixture project lives under.
pub const FIXTURE_ROOT: &str = "example.com/widget";

/// An upstream repository with two commits, two branches, and a tag.
///
/// - `rev1`: initial commit, tagged `v1.0.0`
/// - `rev2`: second commit, tip of branches `trunk` (default) and `dev`
pub struct UpstreamRepo {
    pub dir: TempDir,
    pub rev1: Revision,
    pub rev2: Revision,
}

impl UpstreamRepo {
    pub fn url(&self) -> String {
        Url::from_file_path(self.dir.path()).unwrap().to_string()
    }

    pub fn identifier(&self) -> ProjectIdentifier {
        ProjectIdentifier::with_network_name(ProjectRoot::new(FIXTURE_ROOT), self.url())
    }
}

pub fn upstream_fixture() -> UpstreamRepo {
    let dir = TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    // Pin the default branch name so assertions don't depend on host git
    // configuration.
    repo.set_head("refs/heads/trunk").unwrap();

    write(
        dir.path(),
        "main.go",
        "package widget // import \"example.com/widget\"\n\nimport (\n\t\"fmt\"\n\t\"example.com/dep\"\n)\n",
    );
    write(dir.path(), "sub/util.go", "package util\n\nimport \"fmt\"\n");
    write(
        dir.path(),
        "project.toml",
        "[constraints]\n\"example.com/dep\" = \"^1.0.0\"\n",
    );
    let oid1 = commit_all(&repo, "initial");
    let sig = Signature::now("tester", "tester@example.com").unwrap();
    let commit1 = repo.find_commit(oid1).unwrap();
    repo.tag("v1.0.0", commit1.as_object(), &sig, "release 1.0.0", false)
        .unwrap();

    write(
        dir.path(),
        "project.toml",
        "[constraints]\n\"example.com/dep\" = \"^1.1.0\"\n",
    );
    let oid2 = commit_all(&repo, "bump constraint");
    let commit2 = repo.find_commit(oid2).unwrap();
    repo.branch("dev", &commit2, false).unwrap();

    UpstreamRepo {
        dir,
        rev1: Revision::new(oid1.to_string()),
        rev2: Revision::new(oid2.to_string()),
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn commit_all(repo: &Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = Signature::now("tester", "tester@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Analyzer fixture that reads `[constraints]` out of `project.toml`.
pub struct TomlAnalyzer;

impl ProjectAnalyzer for TomlAnalyzer {
    fn derive_manifest_and_lock(
        &self,
        path: &Path,
        _import_root: &ProjectRoot,
    ) -> anyhow::Result<(Manifest, Lock)> {
        let raw = fs::read_to_string(path.join("project.toml"))?;
        let value: toml::Value = toml::from_str(&raw)?;

        let mut constraints = BTreeMap::new();
        if let Some(table) = value.get("constraints").and_then(|v| v.as_table()) {
            for (dep, constraint) in table {
                let constraint = constraint
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("constraint for {} is not a string", dep))?;
                constraints.insert(dep.clone(), constraint.to_string());
            }
        }

        Ok((
            Manifest {
                constraints,
                ..Manifest::default()
            },
            Lock::default(),
        ))
    }

    fn info(&self) -> moorage::AnalyzerInfo {
        moorage::AnalyzerInfo {
            name: "toml-fixture".to_string(),
            version: 1,
        }
    }
}
