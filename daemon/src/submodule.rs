/// The contract every action worker satisfies.
///
/// The orchestrator never looks inside a worker: it fans `start`/`stop` out
/// to every enabled handle, treats errors and panics as non-fatal, and polls
/// `status` for diagnostics.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ActionConfig;

/// An independently startable/stoppable background action worker.
///
/// Implementations must return promptly from every method; long-running work
/// belongs on a thread or task owned by the worker.
pub trait Submodule: Send + Sync {
    /// Starts the worker's background activity.
    fn start(&self) -> anyhow::Result<()>;
    /// Signals the worker to stop. Must be a no-op when idle.
    fn stop(&self);
    /// Applies a new configuration snapshot.
    fn update_config(&self, cfg: &ActionConfig);
    /// Reports current worker state. Must never block.
    fn status(&self) -> SubmoduleStatus;
}

/// Point-in-time worker state, substituted with the default when a worker's
/// status call fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmoduleStatus {
    pub running: bool,
    pub detail: Option<String>,
}

/// A named, toggleable handle around a worker. Built once at orchestrator
/// construction from the configuration snapshot.
pub struct SubmoduleHandle {
    pub name: String,
    enabled: AtomicBool,
    pub worker: Arc<dyn Submodule>,
}

impl SubmoduleHandle {
    pub fn new(name: impl Into<String>, enabled: bool, worker: Arc<dyn Submodule>) -> Self {
        Self {
            name: name.into(),
            enabled: AtomicBool::new(enabled),
            worker,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records start/stop calls; `start` fails when `fail_start` is set.
    pub struct RecordingWorker {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
        pub running: AtomicBool,
        pub fail_start: bool,
    }

    impl RecordingWorker {
        pub fn new(fail_start: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                fail_start,
            })
        }
    }

    impl Submodule for RecordingWorker {
        fn start(&self) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                anyhow::bail!("configured to fail");
            }
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }

        fn update_config(&self, _cfg: &ActionConfig) {}

        fn status(&self) -> SubmoduleStatus {
            SubmoduleStatus {
                running: self.running.load(Ordering::SeqCst),
                detail: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingWorker;
    use super::*;

    #[test]
    fn handle_enabled_flag_toggles() {
        let h = SubmoduleHandle::new("a", true, RecordingWorker::new(false));
        assert!(h.is_enabled());
        h.set_enabled(false);
        assert!(!h.is_enabled());
    }

    #[test]
    fn recording_worker_counts_calls() {
        let w = RecordingWorker::new(false);
        assert!(w.start().is_ok());
        assert!(w.status().running);
        w.stop();
        assert!(!w.status().running);
        assert_eq!(w.starts.load(Ordering::SeqCst), 1);
        assert_eq!(w.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_worker_reports_error() {
        let w = RecordingWorker::new(true);
        assert!(w.start().is_err());
        assert!(!w.status().running);
    }
}
