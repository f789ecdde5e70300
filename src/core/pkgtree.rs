//! Package tree scanning.
//!
//! A package tree is the set of packages found at or below a project root in
//! an exported source tree, keyed by sub-import-path. Each entry is either
//! parsed package metadata or the error encountered while parsing that
//! subpath; a broken package never fails the whole scan.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Result, SourceError};

/// Parsed metadata for one package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// The declared package name.
    pub name: String,
    /// The import path of the package within the tree.
    pub import_path: String,
    /// The canonical import path declared in an import comment, if any.
    pub comment_path: Option<String>,
    /// Import paths of the package's non-test files.
    pub imports: Vec<String>,
    /// Import paths appearing only in test files.
    pub test_imports: Vec<String>,
}

/// A package, or the reason a directory could not be parsed as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageOrErr {
    Package(PackageInfo),
    Err(String),
}

/// The packages at and below a project root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTree {
    /// The import path the tree is rooted at.
    pub import_root: String,
    /// Per-subpath results, keyed by import path.
    pub packages: BTreeMap<String, PackageOrErr>,
}

static PACKAGE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^package\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?://\s*import\s+"([^"]+)")?"#)
        .unwrap()
});

static IMPORT_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^import\s+(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?"([^"]+)""#).unwrap()
});

static IMPORT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^import\s*\((.*?)\)").unwrap());

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?"([^"]+)""#).unwrap()
});

/// Scan the filesystem tree rooted at `dir` and list the packages under
/// `import_root`.
///
/// Directories whose name starts with `.` or `_` are skipped, as is any VCS
/// metadata. Directories with no source files are not packages and produce no
/// entry.
pub fn list_packages(dir: &Path, import_root: &str) -> Result<PackageTree> {
    if !dir.is_dir() {
        return Err(SourceError::BadInput(format!(
            "cannot list packages: {} is not a directory",
            dir.display()
        )));
    }

    let mut tree = PackageTree {
        import_root: import_root.to_string(),
        packages: BTreeMap::new(),
    };

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = entry
            .map_err(|e| SourceError::SourceFailure(format!("walking {}: {}", dir.display(), e)))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("walked entries live under the walk root");
        let import_path = if rel.as_os_str().is_empty() {
            import_root.to_string()
        } else {
            format!("{}/{}", import_root, rel.to_string_lossy().replace('\\', "/"))
        };

        match scan_package_dir(entry.path(), &import_path) {
            Ok(Some(info)) => {
                tree.packages.insert(import_path, PackageOrErr::Package(info));
            }
            Ok(None) => {}
            Err(msg) => {
                tree.packages.insert(import_path, PackageOrErr::Err(msg));
            }
        }
    }

    Ok(tree)
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() || entry.depth() == 0 {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || name.starts_with('_'))
        .unwrap_or(false)
}

/// Parse one directory. `Ok(None)` means the directory holds no source files
/// and is not a package; `Err` carries the per-subpath parse failure.
fn scan_package_dir(
    dir: &Path,
    import_path: &str,
) -> std::result::Result<Option<PackageInfo>, String> {
    let entries = fs::read_dir(dir).map_err(|e| format!("reading {}: {}", dir.display(), e))?;

    let mut name: Option<String> = None;
    let mut comment_path: Option<String> = None;
    let mut imports = BTreeSet::new();
    let mut test_imports = BTreeSet::new();
    let mut saw_source = false;

    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file() && p.extension().map(|ext| ext == "go").unwrap_or(false)
        })
        .collect();
    files.sort();

    for file in files {
        let contents =
            fs::read_to_string(&file).map_err(|e| format!("reading {}: {}", file.display(), e))?;
        let is_test = file
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with("_test.go"))
            .unwrap_or(false);

        let clause = match PACKAGE_CLAUSE.captures(&contents) {
            Some(c) => c,
            None => {
                return Err(format!(
                    "{} has no package clause",
                    file.file_name().unwrap_or_default().to_string_lossy()
                ))
            }
        };
        saw_source = true;

        let file_pkg = clause[1].to_string();
        if !is_test {
            match &name {
                None => name = Some(file_pkg),
                Some(existing) if *existing != file_pkg => {
                    return Err(format!(
                        "multiple packages in one directory: {} and {}",
                        existing, file_pkg
                    ));
                }
                Some(_) => {}
            }
            if let Some(cp) = clause.get(2) {
                comment_path = Some(cp.as_str().to_string());
            }
        }

        let sink = if is_test { &mut test_imports } else { &mut imports };
        collect_imports(&contents, sink);
    }

    if !saw_source {
        return Ok(None);
    }

    // Imports already satisfied by non-test files are not test imports.
    let test_only: Vec<String> = test_imports.difference(&imports).cloned().collect();

    Ok(Some(PackageInfo {
        name: name.unwrap_or_else(|| "main".to_string()),
        import_path: import_path.to_string(),
        comment_path,
        imports: imports.into_iter().collect(),
        test_imports: test_only,
    }))
}

fn collect_imports(contents: &str, sink: &mut BTreeSet<String>) {
    for cap in IMPORT_SINGLE.captures_iter(contents) {
        sink.insert(cap[1].to_string());
    }
    for block in IMPORT_BLOCK.captures_iter(contents) {
        for line in IMPORT_LINE.captures_iter(&block[1]) {
            sink.insert(line[1].to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_single_package() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "main.go",
            "package widget // import \"example.com/widget\"\n\nimport (\n\t\"fmt\"\n\t\"example.com/dep\"\n)\n",
        );

        let tree = list_packages(tmp.path(), "example.com/widget").unwrap();
        assert_eq!(tree.packages.len(), 1);
        match &tree.packages["example.com/widget"] {
            PackageOrErr::Package(p) => {
                assert_eq!(p.name, "widget");
                assert_eq!(p.comment_path.as_deref(), Some("example.com/widget"));
                assert_eq!(p.imports, vec!["example.com/dep", "fmt"]);
                assert!(p.test_imports.is_empty());
            }
            PackageOrErr::Err(e) => panic!("unexpected parse error: {}", e),
        }
    }

    #[test]
    fn test_nested_packages_and_test_imports() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "root.go", "package root\n\nimport \"fmt\"\n");
        write(
            tmp.path(),
            "sub/sub.go",
            "package sub\n\nimport \"example.com/root\"\n",
        );
        write(
            tmp.path(),
            "sub/sub_test.go",
            "package sub\n\nimport (\n\t\"testing\"\n\t\"example.com/root\"\n)\n",
        );

        let tree = list_packages(tmp.path(), "example.com/root").unwrap();
        assert_eq!(tree.packages.len(), 2);

        match &tree.packages["example.com/root/sub"] {
            PackageOrErr::Package(p) => {
                assert_eq!(p.imports, vec!["example.com/root"]);
                // root import also appears in non-test files, so only the
                // test-only import remains.
                assert_eq!(p.test_imports, vec!["testing"]);
            }
            PackageOrErr::Err(e) => panic!("unexpected parse error: {}", e),
        }
    }

    #[test]
    fn test_parse_error_is_per_subpath() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "ok.go", "package ok\n");
        write(tmp.path(), "bad/one.go", "package one\n");
        write(tmp.path(), "bad/two.go", "package two\n");

        let tree = list_packages(tmp.path(), "example.com/p").unwrap();
        assert!(matches!(
            tree.packages["example.com/p"],
            PackageOrErr::Package(_)
        ));
        match &tree.packages["example.com/p/bad"] {
            PackageOrErr::Err(msg) => assert!(msg.contains("multiple packages")),
            PackageOrErr::Package(_) => panic!("expected a parse error"),
        }
    }

    #[test]
    fn test_hidden_and_sourceless_dirs_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.go", "package a\n");
        write(tmp.path(), ".git/config", "[core]\n");
        write(tmp.path(), "_build/gen.go", "package gen\n");
        write(tmp.path(), "docs/readme.txt", "hello\n");

        let tree = list_packages(tmp.path(), "example.com/a").unwrap();
        assert_eq!(tree.packages.len(), 1);
        assert!(tree.packages.contains_key("example.com/a"));
    }

    #[test]
    fn test_missing_dir_is_bad_input() {
        let err = list_packages(Path::new("/nonexistent/tree"), "x").unwrap_err();
        assert!(matches!(err, SourceError::BadInput(_)));
    }
}
