//! In-flight call tracking.
//!
//! The call manager registers named units of long-running work, hands each a
//! cancellation token combined from the caller's token and the manager's
//! lifetime token, and aggregates wall-clock duration per call kind.
//! Concurrent callers with an identical `(name, kind)` share one logical
//! entry: the clock starts at first registration and stops when the last
//! registrant finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, SourceError};
use crate::util::CancelToken;

/// The kind of work a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    HttpMetadata,
    ListVersions,
    GetManifestAndLock,
    SyncLocal,
    RevisionPresent,
    Export,
    CheckUpstream,
}

/// Identity of an in-flight call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CallInfo {
    name: String,
    kind: CallKind,
}

struct TimeCount {
    count: u32,
    start: Instant,
}

/// Aggregate metrics for completed calls of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurCount {
    /// Fully completed logical calls of this kind.
    pub count: u32,
    /// Summed wall-clock lifetime of those calls.
    pub dur: Duration,
}

#[derive(Default)]
struct Tables {
    running: HashMap<CallInfo, TimeCount>,
    ran: HashMap<CallKind, DurCount>,
}

/// Registry of in-flight calls, bound to the manager lifetime.
pub(crate) struct CallManager {
    lifetime: CancelToken,
    tables: Mutex<Tables>,
}

impl CallManager {
    pub fn new() -> Self {
        CallManager {
            lifetime: CancelToken::new(),
            tables: Mutex::new(Tables::default()),
        }
    }

    /// The cancelable root token bound to the manager's lifetime.
    pub fn lifetime_token(&self) -> CancelToken {
        self.lifetime.clone()
    }

    /// Cancel the lifetime token, aborting every registered call at its next
    /// interruption point and refusing new registrations.
    pub fn cancel_all(&self) {
        self.lifetime.cancel();
    }

    /// Register a call and produce its working token plus a completion guard.
    ///
    /// The returned token is cancelled when either the caller's token or the
    /// manager lifetime is cancelled. Dropping the guard marks the call done,
    /// so completion is recorded exactly once on every path.
    pub fn setup_call(
        self: &Arc<Self>,
        caller: &CancelToken,
        name: &str,
        kind: CallKind,
    ) -> Result<(CancelToken, CallGuard)> {
        let info = CallInfo {
            name: name.to_string(),
            kind,
        };
        self.run(info.clone())?;

        let combined = CancelToken::combined(caller, &self.lifetime);
        let guard = CallGuard {
            mgr: Arc::clone(self),
            info: Some(info),
        };
        Ok((combined, guard))
    }

    /// Completed-call metrics for one kind.
    pub fn stats_for(&self, kind: CallKind) -> DurCount {
        let tables = self.tables.lock().unwrap();
        tables.ran.get(&kind).copied().unwrap_or_default()
    }

    /// How many callers are attached to the given call right now.
    #[cfg(test)]
    fn running_count(&self, name: &str, kind: CallKind) -> Option<u32> {
        let tables = self.tables.lock().unwrap();
        tables
            .running
            .get(&CallInfo {
                name: name.to_string(),
                kind,
            })
            .map(|tc| tc.count)
    }

    fn run(&self, info: CallInfo) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if self.lifetime.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        match tables.running.get_mut(&info) {
            Some(existing) => existing.count += 1,
            None => {
                tables.running.insert(
                    info,
                    TimeCount {
                        count: 1,
                        start: Instant::now(),
                    },
                );
            }
        }
        Ok(())
    }

    fn done(&self, info: &CallInfo) {
        let mut tables = self.tables.lock().unwrap();

        let elapsed = {
            let existing = tables
                .running
                .get_mut(info)
                .unwrap_or_else(|| panic!("completed a call that was never registered"));
            if existing.count > 1 {
                // Others are still attached; don't stop the clock yet.
                existing.count -= 1;
                return;
            }
            existing.start.elapsed()
        };

        // Last registrant for this key; fold the window into the aggregate.
        tables.running.remove(info);
        let entry = tables.ran.entry(info.kind).or_default();
        entry.count += 1;
        entry.dur += elapsed;
    }
}

/// Scoped completion of a registered call.
pub(crate) struct CallGuard {
    mgr: Arc<CallManager>,
    info: Option<CallInfo>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if let Some(info) = self.info.take() {
            self.mgr.done(&info);
        }
    }
}

impl std::fmt::Debug for CallGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard").finish()
    }
}
