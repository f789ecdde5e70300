//! The source manager facade.
//!
//! `SourceManager` is the thread-safe entry point for everything this crate
//! does: interrogating sources, deducing project roots, and exporting trees.
//! Internally it coordinates the call manager, the deduction coordinator,
//! and the source coordinator over a shared on-disk cache, and guards the
//! whole against concurrent release.

pub(crate) mod calls;
pub(crate) mod lock;
mod signals;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Once, RwLock, RwLockReadGuard};

use crate::analysis::{AnalyzerInfo, Lock, Manifest, ProjectAnalyzer};
use crate::core::{PackageTree, ProjectIdentifier, ProjectRoot, Revision, Version};
use crate::deduce::DeductionCoordinator;
use crate::error::{Result, SourceError};
use crate::sources::{ExistenceCheck, SourceCoordinator};
use crate::util::CancelToken;

use calls::CallManager;
use lock::CacheLock;
use signals::SignalSession;

/// Retrieves, caches, and interrogates source repositories.
///
/// A manager claims exclusive use of its cache directory for as long as it
/// lives, and caches aggressively: tools that need upstream analysis before
/// a solve run should create the manager early and share it, so later work
/// benefits from every cache that is already warm.
///
/// All methods are safe to call concurrently. Each takes a caller-provided
/// [`CancelToken`]; the work also aborts when the manager itself is
/// released.
pub struct SourceManager {
    cachedir: PathBuf,
    cache_lock: Mutex<CacheLock>,
    calls: Arc<CallManager>,
    deducer: Arc<DeductionCoordinator>,
    srcs: SourceCoordinator,
    analyzer: Arc<dyn ProjectAnalyzer>,
    glock: RwLock<()>,
    opcount: AtomicI32,
    releasing: AtomicBool,
    release_once: Once,
    signals: Mutex<Option<SignalSession>>,
}

impl std::fmt::Debug for SourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceManager")
            .field("cachedir", &self.cachedir)
            .finish()
    }
}

impl SourceManager {
    /// Create a manager over `cachedir`, claiming the directory exclusively.
    ///
    /// Fails with [`SourceError::CouldNotCreateLock`] when the cache lock
    /// file already exists or cannot be created.
    pub fn new(analyzer: Arc<dyn ProjectAnalyzer>, cachedir: impl AsRef<Path>) -> Result<Self> {
        let cachedir = cachedir.as_ref().to_path_buf();

        fs::create_dir_all(&cachedir).map_err(|source| SourceError::CouldNotCreateLock {
            path: CacheLock::path_in(&cachedir),
            source,
        })?;
        let cache_lock = CacheLock::acquire(&cachedir)?;

        fs::create_dir_all(cachedir.join("sources"))
            .map_err(|e| SourceError::SourceFailure(format!("creating sources dir: {}", e)))?;

        let calls = Arc::new(CallManager::new());
        let deducer = Arc::new(DeductionCoordinator::new(Arc::clone(&calls)));
        let srcs = SourceCoordinator::new(
            Arc::clone(&calls),
            Arc::clone(&deducer),
            cachedir.clone(),
        );

        Ok(SourceManager {
            cachedir,
            cache_lock: Mutex::new(cache_lock),
            calls,
            deducer,
            srcs,
            analyzer,
            glock: RwLock::new(()),
            opcount: AtomicI32::new(0),
            releasing: AtomicBool::new(false),
            release_once: Once::new(),
            signals: Mutex::new(None),
        })
    }

    /// The platform-default cache directory.
    pub fn default_cache_dir() -> PathBuf {
        crate::util::paths::default_cache_dir()
    }

    /// The cache directory this manager owns.
    pub fn cache_dir(&self) -> &Path {
        &self.cachedir
    }

    /// Whether a repository exists for `id`, in the local cache or upstream.
    pub fn source_exists(&self, token: &CancelToken, id: &ProjectIdentifier) -> Result<bool> {
        let _op = self.begin_op()?;
        let op = "check existence of";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .check_existence(token, ExistenceCheck::Any)
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Bring all local information about `id`'s source fully up to date.
    ///
    /// The primary use case is prefetching.
    pub fn sync_source_for(&self, token: &CancelToken, id: &ProjectIdentifier) -> Result<()> {
        let _op = self.begin_op()?;
        let op = "sync";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway.sync_local(token).map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// The versions `id`'s source publishes.
    ///
    /// The first call consults upstream and later calls return the cached
    /// result. No ordering is guaranteed: the list arrives however the VCS
    /// reported it, and callers that care must sort it themselves.
    pub fn list_versions(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
    ) -> Result<Vec<Version>> {
        let _op = self.begin_op()?;
        let op = "list versions of";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .list_versions(token)
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Whether `rev` is present in `id`'s repository.
    pub fn revision_present_in(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
        rev: &Revision,
    ) -> Result<bool> {
        let _op = self.begin_op()?;
        let op = "check revision in";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .revision_present_in(token, rev)
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Parse the tree of packages at and below `id`'s root, at `version`.
    pub fn list_packages(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
    ) -> Result<PackageTree> {
        let _op = self.begin_op()?;
        let op = "list packages of";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .list_packages(token, id.project_root(), version)
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Derive manifest and lock information for `id` at `version`.
    ///
    /// The work is delegated to the injected [`ProjectAnalyzer`] against a
    /// freshly exported tree. Projects must be rooted at their repository
    /// root for the derivation to be meaningful.
    pub fn get_manifest_and_lock(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
    ) -> Result<(Manifest, Lock)> {
        let _op = self.begin_op()?;
        let op = "derive manifest and lock of";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .manifest_and_lock(token, id.project_root(), version, self.analyzer.as_ref())
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Write the tree of `id` at `version` into `to`, without VCS metadata.
    ///
    /// `to` must not exist or must be an empty directory.
    pub fn export_project(
        &self,
        token: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
        to: &Path,
    ) -> Result<()> {
        let _op = self.begin_op()?;
        let op = "export";
        let gateway = self
            .srcs
            .gateway_for(token, id)
            .map_err(|e| e.for_op(op, &id.to_string()))?;
        gateway
            .export_version_to(token, version, to)
            .map_err(|e| e.for_op(op, &id.to_string()))
    }

    /// Deduce the project root an import path belongs to.
    ///
    /// Well-structured hosts resolve without I/O; other paths may require a
    /// remote metadata probe.
    pub fn deduce_project_root(&self, token: &CancelToken, import_path: &str) -> Result<ProjectRoot> {
        let _op = self.begin_op()?;
        self.deducer
            .deduce_root_path(token, import_path)
            .map(|deduced| deduced.root)
    }

    /// The name and version of the injected analyzer.
    pub fn analyzer_info(&self) -> Result<AnalyzerInfo> {
        let _op = self.begin_op()?;
        Ok(self.analyzer.info())
    }

    /// Release the manager: refuse new operations, wait for in-flight ones,
    /// then tear down physical resources.
    ///
    /// Idempotent, and it blocks until teardown has fully completed even
    /// when teardown was initiated by the signal path.
    pub fn release(&self) {
        // Raise the flag before entering the once so no further calls stack
        // up while teardown waits on in-flight operations.
        self.releasing.store(true, Ordering::SeqCst);
        self.release_once.call_once(|| self.do_release());
    }

    /// Tear down physical resources. Must run exactly once, inside
    /// `release_once`.
    fn do_release(&self) {
        // The exclusive lock is granted only after every in-flight operation
        // has dropped its shared hold.
        let _exclusive = self.glock.write().unwrap();

        self.cache_lock.lock().unwrap().release();
        self.calls.cancel_all();
        self.stop_signal_handling();
    }

    pub(crate) fn releasing_flag(&self) -> bool {
        self.releasing.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_release(&self) -> bool {
        !self.releasing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn in_flight_ops(&self) -> i32 {
        self.opcount.load(Ordering::SeqCst)
    }

    pub(crate) fn run_release_once(&self) {
        self.release_once.call_once(|| self.do_release());
    }

    fn begin_op(&self) -> Result<OpGuard<'_>> {
        if self.releasing.load(Ordering::SeqCst) {
            return Err(SourceError::Released);
        }
        self.opcount.fetch_add(1, Ordering::SeqCst);
        OpGuard::new(self)
    }
}

/// Scoped op accounting: holds the shared global lock and keeps the op count
/// raised until dropped, on success and failure paths alike.
struct OpGuard<'a> {
    mgr: &'a SourceManager,
    _shared: RwLockReadGuard<'a, ()>,
}

impl<'a> OpGuard<'a> {
    fn new(mgr: &'a SourceManager) -> Result<Self> {
        let shared = mgr.glock.read().unwrap();
        Ok(OpGuard {
            mgr,
            _shared: shared,
        })
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.mgr.opcount.fetch_sub(1, Ordering::SeqCst);
    }
}
