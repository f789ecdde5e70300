//! Per-source gateways.
//!
//! A gateway owns one source's on-disk cache directory and the VCS adapter
//! that populates it. It serves the source-level operations behind the
//! facade, tracks how mature its local cache is, and serializes every
//! mutation of the cache so two operations never race on disk.
//!
//! Cache maturity only moves forward: a request that needs a later state
//! drives the gateway through the missing transitions and the result sticks
//! for the gateway's lifetime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::analysis::{Lock, Manifest, ProjectAnalyzer};
use crate::core::{list_packages, PackageTree, ProjectRoot, Revision, Version};
use crate::error::{Result, SourceError};
use crate::manager::calls::{CallKind, CallManager};
use crate::sources::vcs::VcsAdapter;
use crate::util::{fs as futil, CancelToken};

/// What a presence check is allowed to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceCheck {
    /// Only the local cache directory.
    LocalCache,
    /// Only the upstream remote.
    Upstream,
    /// Either of the two.
    Any,
}

/// How far the local cache has been brought along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Maturity {
    Untouched,
    CheckedLocal,
    CheckedUpstream,
    ListedVersions,
    Synced,
}

struct GatewayState {
    maturity: Maturity,
    local_exists: bool,
    upstream_exists: Option<bool>,
    /// Memoized version list, in VCS-reported order.
    versions: Option<Vec<Version>>,
}

/// The per-source coordinator that owns its on-disk cache.
pub struct SourceGateway {
    /// Canonical remote the cache mirrors.
    remote: Url,
    /// Cache directory for this source.
    local_dir: PathBuf,
    vcs: Box<dyn VcsAdapter>,
    calls: Arc<CallManager>,
    state: Mutex<GatewayState>,
}

impl SourceGateway {
    pub(crate) fn new(
        remote: Url,
        local_dir: PathBuf,
        vcs: Box<dyn VcsAdapter>,
        calls: Arc<CallManager>,
    ) -> Self {
        SourceGateway {
            remote,
            local_dir,
            vcs,
            calls,
            state: Mutex::new(GatewayState {
                maturity: Maturity::Untouched,
                local_exists: false,
                upstream_exists: None,
                versions: None,
            }),
        }
    }

    /// The canonical remote this gateway mirrors.
    pub fn remote(&self) -> &Url {
        &self.remote
    }

    /// Whether the source is present in the consulted location(s).
    ///
    /// Never mutates cache contents; only the outcome of the check is
    /// recorded.
    pub fn check_existence(&self, token: &CancelToken, mode: ExistenceCheck) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        if matches!(mode, ExistenceCheck::LocalCache | ExistenceCheck::Any) {
            self.advance_local_check(&mut state);
            if state.local_exists {
                return Ok(true);
            }
            if mode == ExistenceCheck::LocalCache {
                return Ok(false);
            }
        }

        if state.upstream_exists.is_none() {
            let (ctx, _done) =
                self.calls
                    .setup_call(token, self.remote.as_str(), CallKind::CheckUpstream)?;
            let reachable = self.vcs.is_reachable(&ctx, &self.remote)?;
            state.upstream_exists = Some(reachable);
            state.maturity = state.maturity.max(Maturity::CheckedUpstream);
        }
        Ok(state.upstream_exists.unwrap_or(false))
    }

    /// Bring the local clone fully up to date with upstream.
    ///
    /// Always performs network I/O, so back-to-back syncs each consult
    /// upstream; the second is a no-op only in effect, not in traffic.
    pub fn sync_local(&self, token: &CancelToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (ctx, _done) = self
            .calls
            .setup_call(token, self.remote.as_str(), CallKind::SyncLocal)?;

        self.ensure_cloned(&ctx, &mut state)?;
        self.fetch_with_heal(&ctx, &mut state)?;
        state.maturity = Maturity::Synced;
        // Refs may have moved; drop the memoized list so the next listing
        // reflects the sync.
        state.versions = None;
        Ok(())
    }

    /// The versions the source publishes, in VCS-reported order.
    ///
    /// The first call consults upstream; later calls return the memoized
    /// list.
    pub fn list_versions(&self, token: &CancelToken) -> Result<Vec<Version>> {
        let mut state = self.state.lock().unwrap();
        if let Some(versions) = &state.versions {
            return Ok(versions.clone());
        }

        let (ctx, _done) = self
            .calls
            .setup_call(token, self.remote.as_str(), CallKind::ListVersions)?;

        if state.maturity < Maturity::Synced {
            // Without any cache, upstream is required. With a clone from an
            // earlier run, an unreachable upstream degrades to the cached
            // refs instead of failing.
            self.ensure_cloned(&ctx, &mut state)?;
            match self.fetch_with_heal(&ctx, &mut state) {
                Ok(()) => {}
                Err(SourceError::Unreachable(reason)) => {
                    tracing::warn!(
                        "upstream for {} unreachable ({}); serving cached refs",
                        self.remote,
                        reason
                    );
                }
                Err(other) => return Err(other),
            }
            state.maturity = state.maturity.max(Maturity::ListedVersions);
        }

        let versions = self.versions_from_refs(&ctx)?;
        state.versions = Some(versions.clone());
        Ok(versions)
    }

    /// Whether `rev` is present in the cached history, syncing first if the
    /// cache has never been synced.
    pub fn revision_present_in(&self, token: &CancelToken, rev: &Revision) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let (ctx, _done) =
            self.calls
                .setup_call(token, self.remote.as_str(), CallKind::RevisionPresent)?;

        self.ensure_cloned(&ctx, &mut state)?;
        if self.vcs.contains(&ctx, &self.local_dir, rev)? {
            return Ok(true);
        }

        // Not in the cache; the revision may have landed upstream since the
        // clone. One sync, then the answer is final.
        if state.maturity < Maturity::Synced {
            self.fetch_with_heal(&ctx, &mut state)?;
            state.maturity = Maturity::Synced;
            state.versions = None;
            return self.vcs.contains(&ctx, &self.local_dir, rev);
        }
        Ok(false)
    }

    /// Export the tree at `version` into `dst`, which must not exist or must
    /// be an empty directory.
    pub fn export_version_to(
        &self,
        token: &CancelToken,
        version: &Version,
        dst: &Path,
    ) -> Result<()> {
        if dst.exists() {
            let empty = futil::dir_is_empty(dst).map_err(|e| {
                SourceError::BadInput(format!("destination {}: {}", dst.display(), e))
            })?;
            if !empty {
                return Err(SourceError::BadInput(format!(
                    "export destination {} is not empty",
                    dst.display()
                )));
            }
        }

        let mut state = self.state.lock().unwrap();
        let (ctx, _done) = self
            .calls
            .setup_call(token, self.remote.as_str(), CallKind::Export)?;

        let rev = self.resolve_to_revision(&ctx, &mut state, version)?;
        self.export_revision(&ctx, &rev, dst)
    }

    /// Materialize `rev` into `dst` via a staging directory next to it, so a
    /// failure partway through never leaves a half-written destination.
    fn export_revision(&self, ctx: &CancelToken, rev: &Revision, dst: &Path) -> Result<()> {
        let parent = dst.parent().unwrap_or_else(|| Path::new("."));
        futil::ensure_dir(parent).map_err(|e| SourceError::SourceFailure(format!("{:#}", e)))?;

        let staging = tempfile::Builder::new()
            .prefix(".export-")
            .tempdir_in(parent)
            .map_err(|e| SourceError::SourceFailure(format!("creating staging dir: {}", e)))?;
        let staged_tree = staging.path().join("tree");
        fs::create_dir(&staged_tree)
            .map_err(|e| SourceError::SourceFailure(format!("creating staging dir: {}", e)))?;

        self.vcs.export(ctx, &self.local_dir, rev, &staged_tree)?;
        futil::commit_staged_dir(&staged_tree, dst)
            .map_err(|e| SourceError::SourceFailure(format!("{:#}", e)))
    }

    /// Parse the package tree at `version`.
    pub fn list_packages(
        &self,
        token: &CancelToken,
        root: &ProjectRoot,
        version: &Version,
    ) -> Result<PackageTree> {
        self.with_exported_tree(token, version, CallKind::Export, |tree_dir| {
            list_packages(tree_dir, root.as_str())
        })
    }

    /// Derive manifest and lock data at `version` through the injected
    /// analyzer.
    pub fn manifest_and_lock(
        &self,
        token: &CancelToken,
        root: &ProjectRoot,
        version: &Version,
        analyzer: &dyn ProjectAnalyzer,
    ) -> Result<(Manifest, Lock)> {
        self.with_exported_tree(token, version, CallKind::GetManifestAndLock, |tree_dir| {
            analyzer
                .derive_manifest_and_lock(tree_dir, root)
                .map_err(|e| SourceError::AnalyzerFailure(format!("{}: {:#}", root, e)))
        })
    }

    /// Export `version` into a scratch directory, run `work` against it, and
    /// clean up regardless of the outcome.
    fn with_exported_tree<T>(
        &self,
        token: &CancelToken,
        version: &Version,
        kind: CallKind,
        work: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let (ctx, _done) = self.calls.setup_call(token, self.remote.as_str(), kind)?;

        let rev = self.resolve_to_revision(&ctx, &mut state, version)?;

        let scratch = tempfile::Builder::new()
            .prefix(".tree-")
            .tempdir_in(
                self.local_dir
                    .parent()
                    .unwrap_or_else(|| Path::new(".")),
            )
            .map_err(|e| SourceError::SourceFailure(format!("creating scratch dir: {}", e)))?;

        self.vcs.export(&ctx, &self.local_dir, &rev, scratch.path())?;
        work(scratch.path())
    }

    /// Resolve a version to the revision backing it, driving the cache
    /// forward as needed.
    fn resolve_to_revision(
        &self,
        ctx: &CancelToken,
        state: &mut GatewayState,
        version: &Version,
    ) -> Result<Revision> {
        self.ensure_cloned(ctx, state)?;

        if let Some(rev) = version.underlying_revision() {
            let rev = rev.clone();
            if self.vcs.contains(ctx, &self.local_dir, &rev)? {
                return Ok(rev);
            }
            // One chance for upstream to have it.
            if state.maturity < Maturity::Synced {
                self.fetch_with_heal(ctx, state)?;
                state.maturity = Maturity::Synced;
                state.versions = None;
                if self.vcs.contains(ctx, &self.local_dir, &rev)? {
                    return Ok(rev);
                }
            }
            return Err(self.no_such_version(version));
        }

        // Symbolic version: resolve through the version list.
        if state.versions.is_none() {
            if state.maturity < Maturity::Synced {
                self.fetch_with_heal(ctx, state)?;
                state.maturity = state.maturity.max(Maturity::ListedVersions);
            }
            state.versions = Some(self.versions_from_refs(ctx)?);
        }

        let versions = state.versions.as_ref().expect("versions listed above");
        versions
            .iter()
            .find(|candidate| candidate.unpaired() == version)
            .and_then(|candidate| candidate.underlying_revision().cloned())
            .ok_or_else(|| self.no_such_version(version))
    }

    fn no_such_version(&self, version: &Version) -> SourceError {
        SourceError::NoSuchVersion {
            source_name: self.remote.to_string(),
            version: version.clone(),
        }
    }

    /// Clone the remote if no local cache exists yet. The clone lands in a
    /// staging directory and is committed by rename, so a cancelled or failed
    /// clone leaves no partial cache behind.
    fn ensure_cloned(&self, ctx: &CancelToken, state: &mut GatewayState) -> Result<()> {
        self.advance_local_check(state);
        if state.local_exists {
            return Ok(());
        }

        let parent = self
            .local_dir
            .parent()
            .unwrap_or_else(|| Path::new("."));
        futil::ensure_dir(parent).map_err(|e| SourceError::SourceFailure(format!("{:#}", e)))?;

        let staging = tempfile::Builder::new()
            .prefix(".clone-")
            .tempdir_in(parent)
            .map_err(|e| SourceError::SourceFailure(format!("creating staging dir: {}", e)))?;
        let staged_repo = staging.path().join("repo");

        self.vcs.clone_into(ctx, &self.remote, &staged_repo)?;
        futil::commit_staged_dir(&staged_repo, &self.local_dir)
            .map_err(|e| SourceError::SourceFailure(format!("{:#}", e)))?;

        state.local_exists = true;
        state.maturity = state.maturity.max(Maturity::CheckedLocal);
        Ok(())
    }

    /// Fetch, healing a corrupt cache once by deleting and recloning.
    fn fetch_with_heal(&self, ctx: &CancelToken, state: &mut GatewayState) -> Result<()> {
        match self.vcs.fetch(ctx, &self.local_dir) {
            Err(SourceError::CacheCorrupt(reason)) => {
                tracing::warn!(
                    "cache for {} is corrupt ({}); recloning",
                    self.remote,
                    reason
                );
                futil::remove_dir_all_if_exists(&self.local_dir)
                    .map_err(|e| SourceError::CacheCorrupt(format!("{:#}", e)))?;
                state.local_exists = false;
                state.versions = None;
                self.ensure_cloned(ctx, state)
                    .map_err(|e| match e {
                        SourceError::CacheCorrupt(m) => SourceError::CacheCorrupt(m),
                        other => other,
                    })
            }
            other => other,
        }
    }

    fn versions_from_refs(&self, ctx: &CancelToken) -> Result<Vec<Version>> {
        let refs = self.vcs.list_refs(ctx, &self.local_dir)?;
        Ok(refs
            .into_iter()
            .filter_map(|(name, rev)| version_from_ref(&name, rev))
            .collect())
    }

    /// Record whether a usable local cache exists. Pure disk inspection.
    fn advance_local_check(&self, state: &mut GatewayState) {
        if state.maturity >= Maturity::CheckedLocal {
            return;
        }
        state.local_exists = self.local_dir.is_dir()
            && fs::read_dir(&self.local_dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
        state.maturity = Maturity::CheckedLocal;
    }
}

/// Interpret a VCS ref as a version, paired with the revision it points at.
fn version_from_ref(name: &str, rev: Revision) -> Option<Version> {
    if let Some(branch) = name.strip_prefix("refs/heads/") {
        return Some(Version::Branch(branch.to_string()).pair(rev));
    }
    if let Some(tag) = name.strip_prefix("refs/tags/") {
        return Some(Version::for_tag(tag).pair(rev));
    }
    None
}
