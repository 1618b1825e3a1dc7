/// The macro lifecycle orchestrator: the single owner of the global
/// running/idle state.
///
/// Every transition commits the boolean state and notifies observers on the
/// calling thread, then performs the slow work (starting or stopping every
/// submodule) on background tasks. Concurrent `start`/`stop`/`toggle`
/// callers serialize through one state mutex; no cross-component call is
/// made while it is held.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gate::GraceGate;
use crate::submodule::{SubmoduleHandle, SubmoduleStatus};
use crate::supervisor::ListenerSupervisor;

/// Bound on how long a fan-out waits to produce its summary. Submodules
/// that miss it still finish; they are just reported as pending.
pub const FANOUT_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Delegate to the Grace-Period gate instead of starting immediately.
    pub wait_for_input: bool,
    /// Proceed even while a Grace Period is pending.
    pub force: bool,
    /// When false, `wait_for_input` is ignored and the start is immediate.
    pub respect_grace_period: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            wait_for_input: false,
            force: false,
            respect_grace_period: true,
        }
    }
}

impl StartOptions {
    /// The options used by automatic activation paths (gate expiry, zone
    /// cache hits): start now, overriding a pending Grace Period.
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// Global macro state. `waiting_for_input` implies `!running`.
#[derive(Debug, Clone, Default)]
pub struct MacroState {
    pub running: bool,
    /// Worker-abort signal: set by `stop`, cleared by `start`. The
    /// emergency-chord path makes it terminal by also exiting the process.
    pub emergency_stop: bool,
    pub waiting_for_input: bool,
}

/// Read-only snapshot returned by [`Orchestrator::status`].
#[derive(Debug, Clone)]
pub struct MacroStatusSnapshot {
    pub running: bool,
    pub emergency_stop: bool,
    pub waiting_for_input: bool,
    pub grace_period_active: bool,
    pub submodules: Vec<(String, SubmoduleStatus)>,
}

type StatusCallback = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct ObserverSet {
    callbacks: Vec<StatusCallback>,
    last_published: Option<bool>,
}

pub struct Orchestrator {
    state: Mutex<MacroState>,
    config: RwLock<Config>,
    submodules: Vec<SubmoduleHandle>,
    gate: GraceGate,
    observers: Mutex<ObserverSet>,
    supervisor: Mutex<Option<Arc<ListenerSupervisor>>>,
    shutdown_done: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: Config, submodules: Vec<SubmoduleHandle>) -> Arc<Self> {
        let grace = config.grace_period.clone();
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(MacroState::default()),
            config: RwLock::new(config),
            submodules,
            gate: GraceGate::new(weak.clone(), grace),
            observers: Mutex::new(ObserverSet::default()),
            supervisor: Mutex::new(None),
            shutdown_done: AtomicBool::new(false),
        })
    }

    pub fn gate(&self) -> &GraceGate {
        &self.gate
    }

    /// Hands the orchestrator the listener supervisor so `shutdown` can
    /// tear it down with everything else.
    pub fn attach_supervisor(&self, supervisor: Arc<ListenerSupervisor>) {
        *self.supervisor.lock().unwrap() = Some(supervisor);
    }

    /// Requests a start. Returns false when rejected: already running, or a
    /// Grace Period is pending and `force` is not set.
    ///
    /// With `wait_for_input` (and the Grace Period enabled and respected)
    /// this delegates to the gate and returns true immediately — acceptance
    /// of the wait, not of the running state.
    pub fn start(self: &Arc<Self>, opts: StartOptions) -> bool {
        let grace_enabled = self.config.read().unwrap().grace_period.enabled;
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                debug!("start rejected: already running");
                return false;
            }
            if !opts.force && self.gate.is_waiting() {
                debug!("start rejected: grace period in progress");
                return false;
            }
            if opts.wait_for_input && grace_enabled && opts.respect_grace_period {
                state.waiting_for_input = true;
                drop(state);
                self.gate.start_waiting("manual");
                return true;
            }
            state.running = true;
            state.emergency_stop = false;
            state.waiting_for_input = false;
        }
        // A forced start wins over any still-pending Grace Period.
        self.gate.cancel();
        self.publish();
        info!("macro started");
        self.spawn_start_fanout();
        true
    }

    /// Requests a stop. When already stopped this issues no notification,
    /// but still cancels a pending Grace Period: `stop` is the universal
    /// cancellation point.
    pub fn stop(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                state.waiting_for_input = false;
                drop(state);
                self.gate.cancel();
                return;
            }
            state.running = false;
            state.emergency_stop = true;
            state.waiting_for_input = false;
        }
        self.publish();
        info!("macro stopped");
        self.gate.cancel();
        self.spawn_stop_fanout();
    }

    /// Hotkey semantics: a pending Grace Period is short-circuited as if the
    /// qualifying input had arrived; otherwise flips running/idle.
    pub fn toggle(self: &Arc<Self>) {
        if self.gate.short_circuit() {
            self.start(StartOptions::forced());
            return;
        }
        let running = self.state.lock().unwrap().running;
        if running {
            self.stop();
        } else {
            let respect = self.config.read().unwrap().general.respect_grace_period;
            self.start(StartOptions {
                respect_grace_period: respect,
                ..StartOptions::default()
            });
        }
    }

    /// Stops everything and tears down the listener supervisor. Idempotent.
    pub fn shutdown(self: &Arc<Self>) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop();
        if let Some(supervisor) = self.supervisor.lock().unwrap().take() {
            supervisor.shutdown();
        }
        info!("orchestrator shut down");
    }

    /// Registers an observer invoked with the new `running` value after each
    /// change commits. Observer panics are contained and logged.
    pub fn set_status_changed_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.observers.lock().unwrap().callbacks.push(Box::new(callback));
    }

    /// Read-only snapshot. Never blocks on submodule internals: a failing
    /// status call is substituted with the zero value.
    pub fn status(&self) -> MacroStatusSnapshot {
        let state = self.state.lock().unwrap().clone();
        let submodules = self
            .submodules
            .iter()
            .map(|handle| {
                let status = catch_unwind(AssertUnwindSafe(|| handle.worker.status()))
                    .unwrap_or_default();
                (handle.name.clone(), status)
            })
            .collect();
        MacroStatusSnapshot {
            running: state.running,
            emergency_stop: state.emergency_stop,
            waiting_for_input: state.waiting_for_input,
            grace_period_active: self.gate.is_waiting(),
            submodules,
        }
    }

    /// Applies a new configuration snapshot to the gate and every submodule.
    pub fn update_config(&self, config: &Config) {
        *self.config.write().unwrap() = config.clone();
        self.gate.update_config(config.grace_period.clone());
        for handle in &self.submodules {
            if let Some(action) = config.actions.iter().find(|a| a.name == handle.name) {
                handle.set_enabled(action.enabled);
                handle.worker.update_config(action);
            }
        }
    }

    /// The gate reports wait transitions into the orchestrator's
    /// authoritative flag. Waiting is never recorded while running, and not
    /// when the gate was already cancelled out from under the report.
    pub(crate) fn set_waiting(&self, waiting: bool) {
        let mut state = self.state.lock().unwrap();
        if waiting && (state.running || !self.gate.is_waiting()) {
            return;
        }
        state.waiting_for_input = waiting;
    }

    /// Invokes observers with the running value read after the last commit.
    /// Serialized per instance; duplicate values are suppressed so observers
    /// only see changes.
    fn publish(&self) {
        let mut observers = self.observers.lock().unwrap();
        let running = self.state.lock().unwrap().running;
        if observers.last_published == Some(running) {
            return;
        }
        observers.last_published = Some(running);
        for callback in &observers.callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(running))).is_err() {
                warn!("status observer panicked");
            }
        }
    }

    /// Starts every enabled submodule concurrently and logs a summary. If
    /// every one of them fails, reconciles `running` back to false and
    /// republishes so observers never see a running macro with zero live
    /// submodules.
    fn spawn_start_fanout(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let enabled: Vec<_> = this
                .submodules
                .iter()
                .filter(|h| h.is_enabled())
                .collect();
            let total = enabled.len();
            if total == 0 {
                debug!("no enabled submodules to start");
                return;
            }

            let (result_tx, mut result_rx) = mpsc::channel::<(String, anyhow::Result<()>)>(total);
            for handle in enabled {
                let name = handle.name.clone();
                let worker = Arc::clone(&handle.worker);
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    let result = catch_unwind(AssertUnwindSafe(|| worker.start()))
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("start panicked")));
                    let _ = result_tx.send((name, result)).await;
                });
            }
            drop(result_tx);

            let mut ok = 0usize;
            let mut failed = 0usize;
            let _ = timeout(FANOUT_JOIN_TIMEOUT, async {
                while let Some((name, result)) = result_rx.recv().await {
                    match result {
                        Ok(()) => {
                            ok += 1;
                            debug!(submodule = %name, "submodule started");
                        }
                        Err(e) => {
                            failed += 1;
                            warn!(submodule = %name, error = %e, "submodule failed to start");
                        }
                    }
                }
            })
            .await;
            let pending = total - ok - failed;
            info!(ok, failed, pending, "submodule start fan-out complete");

            if failed == total {
                warn!("every submodule failed to start; reverting to idle");
                {
                    let mut state = this.state.lock().unwrap();
                    if !state.running {
                        return;
                    }
                    state.running = false;
                }
                this.publish();
            }
        });
    }

    /// Stops every submodule concurrently, bounded the same way as start.
    fn spawn_stop_fanout(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let total = this.submodules.len();
            if total == 0 {
                return;
            }
            let (result_tx, mut result_rx) = mpsc::channel::<String>(total);
            for handle in &this.submodules {
                let name = handle.name.clone();
                let worker = Arc::clone(&handle.worker);
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    if catch_unwind(AssertUnwindSafe(|| worker.stop())).is_err() {
                        warn!(submodule = %name, "submodule stop panicked");
                    }
                    let _ = result_tx.send(name).await;
                });
            }
            drop(result_tx);

            let mut stopped = 0usize;
            let _ = timeout(FANOUT_JOIN_TIMEOUT, async {
                while result_rx.recv().await.is_some() {
                    stopped += 1;
                }
            })
            .await;
            debug!(stopped, total, "submodule stop fan-out complete");
        });
    }
}
