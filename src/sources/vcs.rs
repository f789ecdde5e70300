//! VCS adapter - the seam between source gateways and version control.
//!
//! Gateways drive all repository work through this trait so that the cache
//! logic stays independent of any particular VCS. Every method takes a
//! cancellation token and must honour it promptly.

use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{AutotagOption, Direction, FetchOptions, Oid, RemoteCallbacks, Repository};
use url::Url;

use crate::core::Revision;
use crate::error::{Result, SourceError};
use crate::util::CancelToken;

/// Operations a gateway needs from a version control system.
pub trait VcsAdapter: Send + Sync {
    /// Clone `remote` into `local`, which must not yet exist.
    fn clone_into(&self, token: &CancelToken, remote: &Url, local: &Path) -> Result<()>;

    /// Bring an existing clone at `local` up to date with its remote.
    fn fetch(&self, token: &CancelToken, local: &Path) -> Result<()>;

    /// List refs in the clone as `(ref name, revision)` pairs, in the order
    /// the VCS reports them.
    fn list_refs(&self, token: &CancelToken, local: &Path) -> Result<Vec<(String, Revision)>>;

    /// Whether the clone's history contains `rev`.
    fn contains(&self, token: &CancelToken, local: &Path, rev: &Revision) -> Result<bool>;

    /// Materialize the tree at `rev` into `dst`, without VCS metadata.
    fn export(&self, token: &CancelToken, local: &Path, rev: &Revision, dst: &Path) -> Result<()>;

    /// Whether the remote answers at all.
    fn is_reachable(&self, token: &CancelToken, remote: &Url) -> Result<bool>;
}

/// The git implementation of the adapter.
pub struct GitAdapter;

impl GitAdapter {
    fn open(local: &Path) -> Result<Repository> {
        // An unopenable cache directory is corruption, not a VCS failure;
        // the gateway reacts by healing.
        Repository::open(local).map_err(|e| {
            SourceError::CacheCorrupt(format!("{}: {}", local.display(), e.message()))
        })
    }

    fn fetch_options(token: &CancelToken) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let token = token.clone();
        callbacks.transfer_progress(move |_progress| !token.is_cancelled());

        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options.download_tags(AutotagOption::All);
        options
    }
}

impl VcsAdapter for GitAdapter {
    fn clone_into(&self, token: &CancelToken, remote: &Url, local: &Path) -> Result<()> {
        token.check()?;
        tracing::info!("cloning {}", remote);

        RepoBuilder::new()
            .bare(true)
            .fetch_options(Self::fetch_options(token))
            .clone(remote.as_str(), local)
            .map(|_| ())
            .map_err(|e| classify_git_error(token, "clone", remote.as_str(), e))
    }

    fn fetch(&self, token: &CancelToken, local: &Path) -> Result<()> {
        token.check()?;
        tracing::info!("updating {}", local.display());

        let repo = Self::open(local)?;
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| SourceError::CacheCorrupt(format!("{}: {}", local.display(), e.message())))?;

        remote
            .fetch(
                &["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"],
                Some(&mut Self::fetch_options(token)),
                None,
            )
            .map_err(|e| classify_git_error(token, "fetch", &local.display().to_string(), e))
    }

    fn list_refs(&self, token: &CancelToken, local: &Path) -> Result<Vec<(String, Revision)>> {
        token.check()?;
        let repo = Self::open(local)?;

        let mut refs = Vec::new();
        let iter = repo
            .references()
            .map_err(|e| SourceError::CacheCorrupt(format!("{}: {}", local.display(), e.message())))?;
        for reference in iter {
            let reference = match reference {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("skipping unreadable ref in {}: {}", local.display(), e);
                    continue;
                }
            };
            let name = match reference.name() {
                Some(n) => n.to_string(),
                None => continue,
            };
            match reference.peel_to_commit() {
                Ok(commit) => refs.push((name, Revision::new(commit.id().to_string()))),
                // Refs that don't peel to a commit (e.g. tags of blobs) are
                // not versions.
                Err(_) => continue,
            }
        }
        Ok(refs)
    }

    fn contains(&self, token: &CancelToken, local: &Path, rev: &Revision) -> Result<bool> {
        token.check()?;
        let repo = Self::open(local)?;

        let oid = match Oid::from_str(rev.as_str()) {
            Ok(oid) => oid,
            Err(_) => return Ok(false),
        };
        let odb = repo
            .odb()
            .map_err(|e| SourceError::CacheCorrupt(format!("{}: {}", local.display(), e.message())))?;
        Ok(odb.exists(oid))
    }

    fn export(&self, token: &CancelToken, local: &Path, rev: &Revision, dst: &Path) -> Result<()> {
        token.check()?;
        let repo = Self::open(local)?;

        let oid = Oid::from_str(rev.as_str())
            .map_err(|e| SourceError::SourceFailure(format!("bad revision {}: {}", rev, e)))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| SourceError::SourceFailure(format!("revision {}: {}", rev, e.message())))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.target_dir(dst).force().recreate_missing(true);
        repo.checkout_tree(commit.as_object(), Some(&mut checkout))
            .map_err(|e| {
                SourceError::SourceFailure(format!(
                    "exporting {} to {}: {}",
                    rev,
                    dst.display(),
                    e.message()
                ))
            })
    }

    fn is_reachable(&self, token: &CancelToken, remote: &Url) -> Result<bool> {
        token.check()?;

        let mut detached = git2::Remote::create_detached(remote.as_str())
            .map_err(|e| SourceError::SourceFailure(format!("{}: {}", remote, e.message())))?;
        match detached.connect(Direction::Fetch) {
            Ok(()) => {
                let _ = detached.disconnect();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// Map a git2 failure to the boundary kind it represents.
fn classify_git_error(
    token: &CancelToken,
    op: &str,
    what: &str,
    err: git2::Error,
) -> SourceError {
    use git2::ErrorClass;

    if token.is_cancelled() {
        return SourceError::Cancelled;
    }
    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh => {
            SourceError::Unreachable(format!("{} {}: {}", op, what, err.message()))
        }
        ErrorClass::Odb | ErrorClass::Index | ErrorClass::Repository | ErrorClass::Object => {
            SourceError::CacheCorrupt(format!("{} {}: {}", op, what, err.message()))
        }
        _ => SourceError::SourceFailure(format!("{} {}: {}", op, what, err.message())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Build a real repository with one commit on the default branch and one
    /// tag, and return its path.
    fn fixture_repo(dir: &Path) -> Revision {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("main.go"), "package fixture\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.go")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("fixture", "fixture@example.com").unwrap();
        let commit_id = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();

        let commit = repo.find_commit(commit_id).unwrap();
        repo.tag("v1.0.0", commit.as_object(), &sig, "release", false)
            .unwrap();

        Revision::new(commit_id.to_string())
    }

    fn file_url(path: &Path) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn test_clone_list_refs_and_contains() {
        let upstream = TempDir::new().unwrap();
        let rev = fixture_repo(upstream.path());

        let cache = TempDir::new().unwrap();
        let local = cache.path().join("clone");
        let git = GitAdapter;
        let token = CancelToken::new();

        git.clone_into(&token, &file_url(upstream.path()), &local)
            .unwrap();

        let refs = git.list_refs(&token, &local).unwrap();
        assert!(refs.iter().any(|(name, r)| name.ends_with("v1.0.0") && *r == rev));

        assert!(git.contains(&token, &local, &rev).unwrap());
        assert!(!git
            .contains(&token, &local, &Revision::from("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"))
            .unwrap());
    }

    #[test]
    fn test_export_produces_clean_tree() {
        let upstream = TempDir::new().unwrap();
        let rev = fixture_repo(upstream.path());

        let cache = TempDir::new().unwrap();
        let local = cache.path().join("clone");
        let git = GitAdapter;
        let token = CancelToken::new();
        git.clone_into(&token, &file_url(upstream.path()), &local)
            .unwrap();

        let out = cache.path().join("export");
        fs::create_dir(&out).unwrap();
        git.export(&token, &local, &rev, &out).unwrap();

        assert!(out.join("main.go").exists());
        assert!(!out.join(".git").exists());
    }

    #[test]
    fn test_open_missing_repo_is_cache_corrupt() {
        let tmp = TempDir::new().unwrap();
        let err = GitAdapter
            .list_refs(&CancelToken::new(), &tmp.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, SourceError::CacheCorrupt(_)));
    }

    #[test]
    fn test_cancelled_token_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let err = GitAdapter
            .fetch(&token, Path::new("/nowhere"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Cancelled));
    }
}
