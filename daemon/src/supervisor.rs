/// Keeps the persistent input listeners alive for the lifetime of the
/// process. The Grace-Period listener is transient and owned by the gate,
/// not by this supervisor.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::config::GeneralConfig;
use crate::event::ControlEvent;
use crate::keys::parse_keycode;
use crate::listener::{
    spawn_emergency_listener, spawn_toggle_listener, ListenerHandle, ListenerKind,
};

/// How often each listener's liveness flag is polled.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(10);

const PERSISTENT_KINDS: [ListenerKind; 3] = [
    ListenerKind::Toggle,
    ListenerKind::AltToggle,
    ListenerKind::Emergency,
];

pub struct ListenerSupervisor {
    general: Mutex<GeneralConfig>,
    tx: mpsc::Sender<ControlEvent>,
    listeners: Mutex<HashMap<ListenerKind, ListenerHandle>>,
    shutdown: AtomicBool,
    recheck: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ListenerSupervisor {
    /// Creates the persistent listeners and starts the liveness recheck task.
    pub fn start(general: GeneralConfig, tx: mpsc::Sender<ControlEvent>) -> Arc<Self> {
        let sup = Arc::new(Self {
            general: Mutex::new(general),
            tx,
            listeners: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            recheck: Mutex::new(None),
        });
        sup.restart_all();

        let task = tokio::spawn(recheck_loop(Arc::clone(&sup)));
        *sup.recheck.lock().unwrap() = Some(task);
        sup
    }

    /// Tears down every listener and recreates the full set from the current
    /// key bindings.
    pub fn restart_all(&self) {
        let general = self.general.lock().unwrap().clone();
        let mut map = self.listeners.lock().unwrap();
        for (_, handle) in map.drain() {
            handle.stop();
        }
        for kind in PERSISTENT_KINDS {
            if let Some(handle) = build_listener(kind, &general, &self.tx) {
                map.insert(kind, handle);
            }
        }
    }

    /// Applies new key bindings and restarts every listener on them.
    pub fn rebind(&self, general: GeneralConfig) {
        *self.general.lock().unwrap() = general;
        self.restart_all();
    }

    /// Read-only liveness snapshot for diagnostics. Listeners that could not
    /// be created (unparseable binding) report false.
    pub fn listener_status(&self) -> BTreeMap<String, bool> {
        let map = self.listeners.lock().unwrap();
        PERSISTENT_KINDS
            .iter()
            .map(|kind| {
                let alive = map.get(kind).map(|h| h.is_running()).unwrap_or(false);
                (kind.name().to_string(), alive)
            })
            .collect()
    }

    /// One liveness pass: recreate any listener whose thread has died.
    /// Failures here are logged and never stop subsequent passes.
    fn recheck(&self) {
        let general = self.general.lock().unwrap().clone();
        let mut map = self.listeners.lock().unwrap();
        for kind in PERSISTENT_KINDS {
            let dead = map.get(&kind).is_some_and(|h| !h.is_running());
            if dead {
                warn!(listener = kind.name(), "listener dead; recreating");
                map.remove(&kind);
                if let Some(handle) = build_listener(kind, &general, &self.tx) {
                    map.insert(kind, handle);
                }
            }
        }
    }

    /// Stops the recheck task and every listener. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.recheck.lock().unwrap().take() {
            task.abort();
        }
        let mut map = self.listeners.lock().unwrap();
        for (_, handle) in map.drain() {
            handle.stop();
        }
        info!("listener supervisor stopped");
    }
}

/// The single setup routine used at construction and by every recheck.
fn build_listener(
    kind: ListenerKind,
    general: &GeneralConfig,
    tx: &mpsc::Sender<ControlEvent>,
) -> Option<ListenerHandle> {
    match kind {
        ListenerKind::Toggle => {
            let key = match parse_keycode(&general.toggle_key) {
                Some(k) => k,
                None => {
                    warn!(key = %general.toggle_key, "unrecognised toggle key; listener disabled");
                    return None;
                }
            };
            Some(spawn_toggle_listener(kind, key, tx.clone()))
        }
        ListenerKind::AltToggle => {
            if general.alt_toggle_key.is_empty() {
                return None;
            }
            let key = match parse_keycode(&general.alt_toggle_key) {
                Some(k) => k,
                None => {
                    warn!(
                        key = %general.alt_toggle_key,
                        "unrecognised alternate toggle key; listener disabled"
                    );
                    return None;
                }
            };
            Some(spawn_toggle_listener(kind, key, tx.clone()))
        }
        ListenerKind::Emergency => {
            let trigger = match parse_keycode(&general.emergency_key) {
                Some(k) => k,
                None => {
                    warn!(
                        key = %general.emergency_key,
                        "unrecognised emergency key; listener disabled"
                    );
                    return None;
                }
            };
            let mut modifiers = Vec::with_capacity(general.emergency_modifiers.len());
            for name in &general.emergency_modifiers {
                match parse_keycode(name) {
                    Some(k) => modifiers.push(k),
                    None => {
                        warn!(key = %name, "unrecognised emergency modifier; listener disabled");
                        return None;
                    }
                }
            }
            Some(spawn_emergency_listener(modifiers, trigger, tx.clone()))
        }
        // Owned by the Grace-Period gate, never by the supervisor.
        ListenerKind::GraceInput => None,
    }
}

async fn recheck_loop(sup: Arc<ListenerSupervisor>) {
    let mut ticker = interval(RECHECK_INTERVAL);
    // The first tick completes immediately; skip it so construction and the
    // first recheck are not back to back.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if sup.shutdown.load(Ordering::SeqCst) {
            break;
        }
        sup.recheck();
    }
}
