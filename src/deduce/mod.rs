//! Import-path deduction.
//!
//! Deduction maps an arbitrary import path to the canonical project root it
//! lives under, together with a recipe for constructing the source. Paths on
//! well-known hosts resolve from a static rule table with no I/O; anything
//! else costs one remote metadata probe. Successful deductions are memoized
//! by their minimal matched prefix, so a root and all of its descendants
//! resolve from the same entry, and concurrent probes for one path are
//! collapsed to a single flight.

mod probe;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use url::Url;

use crate::core::identifier::normalize_import_path;
use crate::core::ProjectRoot;
use crate::error::{Result, SourceError};
use crate::manager::calls::{CallKind, CallManager};
use crate::util::{CancelToken, FlightGroup};

/// How to construct the source behind a deduced root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecipe {
    /// Remote URLs to try, in preference order.
    pub remotes: Vec<Url>,
}

impl SourceRecipe {
    fn git(remote: Url) -> Self {
        SourceRecipe {
            remotes: vec![remote],
        }
    }

    /// The preferred remote.
    pub fn primary_remote(&self) -> &Url {
        &self.remotes[0]
    }
}

/// The outcome of deducing an import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDeduction {
    /// The canonical project root the path lives under.
    pub root: ProjectRoot,
    /// How to construct the source for that root.
    pub recipe: SourceRecipe,
}

/// Resolves import paths to project roots, with memoization and single-flight
/// probing.
pub struct DeductionCoordinator {
    calls: Arc<CallManager>,
    /// Completed deductions, keyed by minimal matched prefix.
    memo: Mutex<BTreeMap<String, RootDeduction>>,
    probes: FlightGroup<String, std::result::Result<RootDeduction, ProbeFailure>>,
}

/// A probe failure in cloneable form, so every caller attached to one flight
/// receives the kind the leader saw.
#[derive(Debug, Clone)]
enum ProbeFailure {
    Cancelled,
    Unreachable(String),
    Malformed(String),
    NoMatch(String),
}

impl From<SourceError> for ProbeFailure {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => ProbeFailure::Cancelled,
            SourceError::UnreachableMetadata(m) => ProbeFailure::Unreachable(m),
            SourceError::NoMatch(m) => ProbeFailure::NoMatch(m),
            SourceError::MalformedMetadata(m) => ProbeFailure::Malformed(m),
            other => ProbeFailure::Malformed(other.to_string()),
        }
    }
}

impl From<ProbeFailure> for SourceError {
    fn from(failure: ProbeFailure) -> Self {
        match failure {
            ProbeFailure::Cancelled => SourceError::Cancelled,
            ProbeFailure::Unreachable(m) => SourceError::UnreachableMetadata(m),
            ProbeFailure::NoMatch(m) => SourceError::NoMatch(m),
            ProbeFailure::Malformed(m) => SourceError::MalformedMetadata(m),
        }
    }
}

impl DeductionCoordinator {
    pub(crate) fn new(calls: Arc<CallManager>) -> Self {
        DeductionCoordinator {
            calls,
            memo: Mutex::new(BTreeMap::new()),
            probes: FlightGroup::new(),
        }
    }

    /// Deduce the project root and source recipe for an import path.
    pub fn deduce_root_path(&self, token: &CancelToken, path: &str) -> Result<RootDeduction> {
        let path = normalize_import_path(path);
        if path.is_empty() {
            return Err(SourceError::BadInput(
                "cannot deduce the empty import path".to_string(),
            ));
        }

        if let Some(hit) = self.memo_lookup(&path) {
            return Ok(hit);
        }

        if let Some(deduced) = deduce_from_static_rules(&path)? {
            self.memoize(deduced.clone());
            return Ok(deduced);
        }

        // No rule covers the path; probe remote metadata. Concurrent
        // requests for the same path attach to one probe, and the result is
        // memoized under the announced prefix so descendants never probe.
        let outcome = self.probes.run(path.clone(), || match self.probe(token, &path) {
            Ok(deduced) => {
                self.memoize(deduced.clone());
                Ok(deduced)
            }
            Err(e) => Err(ProbeFailure::from(e)),
        });

        outcome.map_err(SourceError::from)
    }

    fn probe(&self, token: &CancelToken, path: &str) -> Result<RootDeduction> {
        let calls = Arc::clone(&self.calls);
        let (ctx, _done) = calls.setup_call(token, path, CallKind::HttpMetadata)?;

        let found = probe::probe_import_path(&ctx, path)?;
        if found.vcs != "git" {
            return Err(SourceError::MalformedMetadata(format!(
                "{}: unsupported vcs type {:?}",
                path, found.vcs
            )));
        }

        Ok(RootDeduction {
            root: ProjectRoot::new(&found.prefix),
            recipe: SourceRecipe::git(found.remote),
        })
    }

    fn memo_lookup(&self, path: &str) -> Option<RootDeduction> {
        let memo = self.memo.lock().unwrap();
        for prefix in prefixes_longest_first(path) {
            if let Some(hit) = memo.get(prefix) {
                return Some(hit.clone());
            }
        }
        None
    }

    fn memoize(&self, deduced: RootDeduction) {
        let mut memo = self.memo.lock().unwrap();
        memo.insert(deduced.root.as_str().to_string(), deduced);
    }
}

/// Iterate the `/`-separated prefixes of a path, longest first.
fn prefixes_longest_first(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |current| {
        current.rfind('/').map(|idx| &current[..idx])
    })
}

static GOPKG_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^gopkg\.in/(?:(?P<user>[a-zA-Z0-9][-a-zA-Z0-9]*)/)?(?P<pkg>[a-zA-Z][-.a-zA-Z0-9]*)\.v(?P<major>\d+)")
        .unwrap()
});

/// Classify a path against the static hosting-scheme table.
///
/// Returns `Ok(None)` when no rule covers the path's host, leaving the
/// decision to the metadata probe.
fn deduce_from_static_rules(path: &str) -> Result<Option<RootDeduction>> {
    let host = match path.split('/').next() {
        Some(h) if !h.is_empty() => h,
        _ => return Err(SourceError::BadInput(format!("no host in path {:?}", path))),
    };

    match host {
        "github.com" | "gitlab.com" | "bitbucket.org" => {
            three_segment_root(path, host).map(Some)
        }
        // The versioned pseudo-host: gopkg.in/pkg.vN and gopkg.in/user/pkg.vN
        // are roots themselves, backed by the corresponding github
        // repository. Resolving them never requires a probe.
        "gopkg.in" => gopkg_root(path).map(Some),
        _ => Ok(None),
    }
}

fn three_segment_root(path: &str, host: &str) -> Result<RootDeduction> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 3 || segments[1].is_empty() || segments[2].is_empty() {
        return Err(SourceError::BadInput(format!(
            "{} paths must be of the form {}/user/repo, got {:?}",
            host, host, path
        )));
    }

    let root = format!("{}/{}/{}", host, segments[1], segments[2]);
    let remote = Url::parse(&format!("https://{}", root))
        .map_err(|e| SourceError::BadInput(format!("{}: {}", path, e)))?;

    Ok(RootDeduction {
        root: ProjectRoot::new(root),
        recipe: SourceRecipe::git(remote),
    })
}

fn gopkg_root(path: &str) -> Result<RootDeduction> {
    let caps = GOPKG_PATH.captures(path).ok_or_else(|| {
        SourceError::BadInput(format!(
            "gopkg.in paths must be of the form gopkg.in/pkg.vN or gopkg.in/user/pkg.vN, got {:?}",
            path
        ))
    })?;

    let pkg = &caps["pkg"];
    let backing = match caps.name("user") {
        Some(user) => format!("https://github.com/{}/{}", user.as_str(), pkg),
        None => format!("https://github.com/go-{}/{}", pkg, pkg),
    };
    let remote =
        Url::parse(&backing).map_err(|e| SourceError::BadInput(format!("{}: {}", path, e)))?;

    let root = caps.get(0).expect("regex matched").as_str();
    Ok(RootDeduction {
        root: ProjectRoot::new(root),
        recipe: SourceRecipe::git(remote),
    })
}
