//! Cooperative cancellation tokens.
//!
//! A `CancelToken` is a cloneable handle that long-running work polls at its
//! interruption points. Tokens compose: a combined token observes two parents
//! and reads as cancelled as soon as either parent is. The check is
//! pull-based, so composition never spawns a forwarding thread that could
//! outlive the child.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SourceError};

/// A handle for requesting and observing cancellation.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    parents: Vec<CancelToken>,
}

impl CancelToken {
    /// A fresh root token, not cancelled.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// A child token that reads as cancelled when either parent is cancelled
    /// or `cancel()` is called on the child itself.
    pub fn combined(a: &CancelToken, b: &CancelToken) -> Self {
        CancelToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parents: vec![a.clone(), b.clone()],
            }),
        }
    }

    /// Request cancellation of this token and every child combined from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested here or in any parent.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.parents.iter().any(|p| p.is_cancelled())
    }

    /// Fail with `Cancelled` if cancellation has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SourceError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
