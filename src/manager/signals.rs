//! Signal-driven release.
//!
//! A manager can install a handler that releases it safely on interrupt: the
//! first signal starts teardown and waits for in-flight operations; three
//! seconds later a second interrupt falls through to the default handler and
//! terminates the process, so a stuck teardown never traps the user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use signal_hook::consts::SIGINT;
use signal_hook::iterator::{Handle, Signals};

use crate::error::{Result, SourceError};
use crate::manager::SourceManager;

/// How long the first signal's graceful window lasts before a second signal
/// is allowed to kill the process.
const ESCAPE_DELAY: Duration = Duration::from_secs(3);

/// A live signal-handling installation.
pub(crate) struct SignalSession {
    quit: Arc<AtomicBool>,
    sig_handle: Option<Handle>,
    escape_id: Option<signal_hook::SigId>,
}

impl SignalSession {
    fn stop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sig_handle.take() {
            handle.close();
        }
        if let Some(id) = self.escape_id.take() {
            signal_hook::low_level::unregister(id);
        }
    }
}

impl SourceManager {
    /// Install interrupt handling that releases this manager on SIGINT.
    pub fn use_default_signal_handling(self: &Arc<Self>) -> Result<()> {
        let escape = Arc::new(AtomicBool::new(false));
        let escape_id = signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&escape))
            .map_err(|e| SourceError::SourceFailure(format!("registering signal escape: {}", e)))?;

        let mut signals = Signals::new([SIGINT])
            .map_err(|e| SourceError::SourceFailure(format!("registering signal handler: {}", e)))?;
        let sig_handle = signals.handle();

        let session = SignalSession {
            quit: Arc::new(AtomicBool::new(false)),
            sig_handle: Some(sig_handle),
            escape_id: Some(escape_id),
        };
        self.install_session(session);

        let sm = Arc::clone(self);
        thread::spawn(move || {
            if signals.forever().next().is_some() {
                sm.on_signal(escape);
            }
        });
        Ok(())
    }

    /// Handle release triggers arriving on a caller-provided channel.
    ///
    /// The caller owns the sending side and decides what counts as a signal.
    /// Installing a handler tears down any previously installed one.
    pub fn handle_signals(self: &Arc<Self>, triggers: Receiver<()>) {
        let quit = Arc::new(AtomicBool::new(false));
        let session = SignalSession {
            quit: Arc::clone(&quit),
            sig_handle: None,
            escape_id: None,
        };
        self.install_session(session);

        let sm = Arc::clone(self);
        thread::spawn(move || loop {
            if quit.load(Ordering::SeqCst) {
                return;
            }
            match triggers.recv_timeout(Duration::from_millis(50)) {
                Ok(()) => {
                    sm.on_signal(Arc::new(AtomicBool::new(false)));
                    return;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        });
    }

    /// Deregister any installed signal handler.
    ///
    /// Normally unnecessary to call directly; release does it as part of
    /// teardown.
    pub fn stop_signal_handling(&self) {
        let mut slot = self.signals.lock().unwrap();
        if let Some(mut session) = slot.take() {
            session.stop();
        }
    }

    fn install_session(self: &Arc<Self>, session: SignalSession) {
        let mut slot = self.signals.lock().unwrap();
        // A previous handler, if any, is quiesced before the new one takes
        // over its role.
        if let Some(mut previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(session);
    }

    /// The body of the first-signal path.
    fn on_signal(&self, escape: Arc<AtomicBool>) {
        // Arm the escape hatch: once the window passes, the conditional
        // default handler lets the next interrupt terminate the process.
        thread::spawn(move || {
            thread::sleep(ESCAPE_DELAY);
            escape.store(true, Ordering::SeqCst);
        });

        if !self.begin_release() {
            // Release is already under way elsewhere; nothing to redo.
            return;
        }

        let pending = self.in_flight_ops();
        if pending > 0 {
            println!("signal received: waiting for {} ops to complete...", pending);
        }

        self.run_release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalyzerInfo, Lock, Manifest, ProjectAnalyzer};
    use crate::core::ProjectRoot;
    use crate::util::CancelToken;
    use std::path::Path;
    use std::sync::mpsc;
    use tempfile::TempDir;

    struct NullAnalyzer;

    impl ProjectAnalyzer for NullAnalyzer {
        fn derive_manifest_and_lock(
            &self,
            _path: &Path,
            _import_root: &ProjectRoot,
        ) -> anyhow::Result<(Manifest, Lock)> {
            Ok((Manifest::default(), Lock::default()))
        }

        fn info(&self) -> AnalyzerInfo {
            AnalyzerInfo {
                name: "null".to_string(),
                version: 1,
            }
        }
    }

    fn wait_released(sm: &SourceManager) {
        for _ in 0..100 {
            if sm.releasing_flag() && !sm.cache_dir().join("sm.lock").exists() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("manager did not release in time");
    }

    #[test]
    fn test_channel_trigger_releases_manager() {
        let tmp = TempDir::new().unwrap();
        let sm = Arc::new(SourceManager::new(Arc::new(NullAnalyzer), tmp.path()).unwrap());

        let (tx, rx) = mpsc::channel();
        sm.handle_signals(rx);
        tx.send(()).unwrap();

        wait_released(&sm);

        let err = sm
            .deduce_project_root(&CancelToken::new(), "github.com/user/repo")
            .unwrap_err();
        assert!(matches!(err, SourceError::Released));
    }

    #[test]
    fn test_explicit_release_blocks_until_signal_teardown_done() {
        let tmp = TempDir::new().unwrap();
        let sm = Arc::new(SourceManager::new(Arc::new(NullAnalyzer), tmp.path()).unwrap());

        let (tx, rx) = mpsc::channel();
        sm.handle_signals(rx);
        tx.send(()).unwrap();

        // However the race lands, release() must not return before the lock
        // file is gone.
        sm.release();
        assert!(!tmp.path().join("sm.lock").exists());
    }

    #[test]
    fn test_reinstalling_handler_quiesces_previous() {
        let tmp = TempDir::new().unwrap();
        let sm = Arc::new(SourceManager::new(Arc::new(NullAnalyzer), tmp.path()).unwrap());

        let (_tx1, rx1) = mpsc::channel();
        sm.handle_signals(rx1);
        let (tx2, rx2) = mpsc::channel();
        sm.handle_signals(rx2);

        tx2.send(()).unwrap();
        wait_released(&sm);
    }

    #[test]
    fn test_dropped_sender_stops_handler_without_release() {
        let tmp = TempDir::new().unwrap();
        let sm = Arc::new(SourceManager::new(Arc::new(NullAnalyzer), tmp.path()).unwrap());

        let (tx, rx) = mpsc::channel::<()>();
        sm.handle_signals(rx);
        drop(tx);

        thread::sleep(Duration::from_millis(100));
        assert!(!sm.releasing_flag());
        assert!(tmp.path().join("sm.lock").exists());
        sm.release();
    }
}
