//! Boundary error kinds for source management.
//!
//! Every failure that crosses the `SourceManager` facade is one of the kinds
//! below. Kinds carry a context string; the facade annotates errors with the
//! source identifier and operation that originated the work.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::Version;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Error produced by source management operations.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The manager has been released; no further calls are possible.
    #[error("this SourceManager has been released, its methods can no longer be called")]
    Released,

    /// The on-disk cache lock file could not be created.
    #[error("could not create cache lock file at {path}")]
    CouldNotCreateLock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transient network failure reaching an upstream repository.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The underlying VCS reported a failure.
    #[error("source failure: {0}")]
    SourceFailure(String),

    /// The local cache is corrupt and self-healing did not recover it.
    #[error("corrupt local cache: {0}")]
    CacheCorrupt(String),

    /// The requested version does not exist in the source.
    #[error("no version {version} exists in {source_name}")]
    NoSuchVersion { source_name: String, version: Version },

    /// The remote metadata endpoint could not be reached during deduction.
    #[error("unreachable metadata for {0}")]
    UnreachableMetadata(String),

    /// The remote metadata response could not be interpreted.
    #[error("malformed metadata for {0}")]
    MalformedMetadata(String),

    /// No deduction rule matched and the remote metadata announced nothing
    /// covering the path.
    #[error("no source could be deduced for {0}")]
    NoMatch(String),

    /// The operation was cancelled through its token.
    #[error("operation cancelled")]
    Cancelled,

    /// The injected project analyzer failed.
    #[error("analyzer failure: {0}")]
    AnalyzerFailure(String),

    /// The caller supplied an argument the operation cannot act on.
    #[error("bad input: {0}")]
    BadInput(String),
}

impl SourceError {
    /// Annotate a string-bearing kind with the operation and source that
    /// produced it. Structural kinds pass through untouched.
    pub(crate) fn for_op(self, op: &str, what: &str) -> SourceError {
        let tag = |msg: String| format!("{} {}: {}", op, what, msg);
        match self {
            SourceError::Unreachable(m) => SourceError::Unreachable(tag(m)),
            SourceError::SourceFailure(m) => SourceError::SourceFailure(tag(m)),
            SourceError::CacheCorrupt(m) => SourceError::CacheCorrupt(tag(m)),
            SourceError::AnalyzerFailure(m) => SourceError::AnalyzerFailure(tag(m)),
            SourceError::BadInput(m) => SourceError::BadInput(tag(m)),
            other => other,
        }
    }
}
