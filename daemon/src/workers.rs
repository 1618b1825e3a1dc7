/// The periodic key-press worker: the one concrete [`Submodule`] the daemon
/// ships. Presses a configured key immediately on start and then on every
/// interval until its stop signal fires.
use anyhow::{anyhow, bail, Result};
use enigo::{Direction, Enigo, Keyboard, Settings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ActionConfig;
use crate::keys::parse_inject_key;
use crate::submodule::{Submodule, SubmoduleHandle, SubmoduleStatus};

/// Granularity of the worker's stop check while sleeping out an interval.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(50);

pub struct KeyPressWorker {
    name: String,
    settings: Mutex<WorkerSettings>,
    /// Present while a press thread is live; `stop` takes it and signals.
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    running: Arc<AtomicBool>,
}

#[derive(Clone)]
struct WorkerSettings {
    key: String,
    interval: Duration,
}

impl KeyPressWorker {
    pub fn new(cfg: &ActionConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            settings: Mutex::new(WorkerSettings {
                key: cfg.key.clone(),
                interval: cfg.effective_interval(),
            }),
            stop_tx: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Submodule for KeyPressWorker {
    fn start(&self) -> Result<()> {
        let settings = self.settings.lock().unwrap().clone();
        let key = parse_inject_key(&settings.key)
            .ok_or_else(|| anyhow!("unrecognised action key '{}'", settings.key))?;

        let mut guard = self.stop_tx.lock().unwrap();
        if guard.is_some() {
            bail!("already running");
        }
        let (tx, rx) = watch::channel(false);

        let name = self.name.clone();
        let running = Arc::clone(&self.running);
        std::thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || run_press_loop(name, key, settings.interval, rx, running))
            .map_err(|e| anyhow!("failed to spawn worker thread: {e}"))?;

        *guard = Some(tx);
        Ok(())
    }

    fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
    }

    /// New key/interval take effect on the next start.
    fn update_config(&self, cfg: &ActionConfig) {
        let mut settings = self.settings.lock().unwrap();
        settings.key = cfg.key.clone();
        settings.interval = cfg.effective_interval();
    }

    fn status(&self) -> SubmoduleStatus {
        SubmoduleStatus {
            running: self.running.load(Ordering::SeqCst),
            detail: Some(self.settings.lock().unwrap().key.clone()),
        }
    }
}

/// Press loop body, on its own OS thread. `Enigo` is constructed here because
/// the injection handle is not shared across threads.
fn run_press_loop(
    name: String,
    key: enigo::Key,
    interval: Duration,
    stop_rx: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
) {
    struct Live(Arc<AtomicBool>);
    impl Drop for Live {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }
    running.store(true, Ordering::SeqCst);
    let _live = Live(running);

    let mut enigo = match Enigo::new(&Settings::default()) {
        Ok(e) => e,
        Err(e) => {
            warn!(worker = %name, error = %e, "input system unavailable; worker exiting");
            return;
        }
    };

    debug!(worker = %name, interval_ms = interval.as_millis() as u64, "worker started");
    loop {
        if *stop_rx.borrow() {
            break;
        }
        if let Err(e) = enigo.key(key, Direction::Click) {
            warn!(worker = %name, error = %e, "key press failed");
        }

        // Sleep in slices so a stop signal is observed promptly.
        let mut slept = Duration::ZERO;
        while slept < interval {
            if *stop_rx.borrow() {
                debug!(worker = %name, "worker stopped");
                return;
            }
            let slice = STOP_CHECK_SLICE.min(interval - slept);
            std::thread::sleep(slice);
            slept += slice;
        }
    }
    debug!(worker = %name, "worker stopped");
}

/// Builds one handle per configured action. The worker exists even when the
/// action is disabled so a config reload can enable it without a rebuild.
pub fn build_submodules(actions: &[ActionConfig]) -> Vec<SubmoduleHandle> {
    actions
        .iter()
        .map(|cfg| {
            SubmoduleHandle::new(
                cfg.name.clone(),
                cfg.enabled,
                Arc::new(KeyPressWorker::new(cfg)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str, key: &str, enabled: bool) -> ActionConfig {
        ActionConfig {
            name: name.to_string(),
            key: key.to_string(),
            interval_ms: 5_000,
            enabled,
        }
    }

    #[test]
    fn start_with_unrecognised_key_fails() {
        let w = KeyPressWorker::new(&action("flask", "NotAKey", true));
        let err = w.start().unwrap_err();
        assert!(err.to_string().contains("NotAKey"));
        assert!(!w.status().running);
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let w = KeyPressWorker::new(&action("flask", "1", true));
        w.stop();
        assert!(!w.status().running);
    }

    #[test]
    fn update_config_changes_reported_key() {
        let w = KeyPressWorker::new(&action("flask", "1", true));
        w.update_config(&action("flask", "2", true));
        assert_eq!(w.status().detail.as_deref(), Some("2"));
    }

    #[test]
    fn build_submodules_preserves_names_and_enabled_flags() {
        let handles = build_submodules(&[action("a", "1", true), action("b", "2", false)]);
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].name, "a");
        assert!(handles[0].is_enabled());
        assert_eq!(handles[1].name, "b");
        assert!(!handles[1].is_enabled());
    }
}
