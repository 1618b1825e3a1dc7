/// The Grace-Period gate: a bounded wait between entering a zone and
/// automatic activation, ended by whichever comes first of a timeout, a
/// qualifying user input, or an external cancel.
///
/// At most one wait is in progress per gate; `start_waiting` while waiting
/// is a no-op and the original timer keeps running. The orchestrator owns
/// the authoritative `waiting_for_input` flag; the gate reports transitions
/// into it.
use device_query::Keycode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::GraceConfig;
use crate::keys::{parse_keycode, parse_pointer_button};
use crate::listener::{spawn_grace_input_listener, ListenerHandle};
use crate::orchestrator::{Orchestrator, StartOptions};

/// How often the supervision task checks for cancel/input/deadline.
const GATE_POLL: Duration = Duration::from_millis(25);

pub struct GraceGate {
    orch: Weak<Orchestrator>,
    config: RwLock<GraceConfig>,
    inner: Mutex<GateInner>,
}

#[derive(Default)]
struct GateInner {
    waiting: bool,
    /// Bumped on every wait start and cancel so a stale supervision task
    /// can never act on a later wait.
    generation: u64,
    started: Option<Instant>,
    zone: String,
    listener: Option<ListenerHandle>,
}

impl GateInner {
    /// Ends the wait and tears down the transient listener. Caller holds
    /// the lock; cross-component calls happen after it is released.
    fn clear(&mut self) {
        self.waiting = false;
        self.generation += 1;
        self.started = None;
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }
}

impl GraceGate {
    pub(crate) fn new(orch: Weak<Orchestrator>, config: GraceConfig) -> Self {
        Self {
            orch,
            config: RwLock::new(config),
            inner: Mutex::new(GateInner::default()),
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.inner.lock().unwrap().waiting
    }

    pub fn update_config(&self, config: GraceConfig) {
        *self.config.write().unwrap() = config;
    }

    /// Begins a wait for `zone`. No-op while a wait is already in progress.
    pub fn start_waiting(&self, zone: &str) {
        let (duration, keys, buttons) = {
            let config = self.config.read().unwrap();
            let (keys, buttons) = parse_triggers(&config);
            (config.effective_duration(), keys, buttons)
        };

        let fired = Arc::new(AtomicBool::new(false));
        let (generation, started) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.waiting {
                debug!(zone, "grace period already in progress; keeping original timer");
                return;
            }
            inner.waiting = true;
            inner.generation += 1;
            let started = Instant::now();
            inner.started = Some(started);
            inner.zone = zone.to_string();
            if !keys.is_empty() || !buttons.is_empty() {
                inner.listener = Some(spawn_grace_input_listener(
                    keys,
                    buttons,
                    Arc::clone(&fired),
                ));
            }
            (inner.generation, started)
        };

        if let Some(orch) = self.orch.upgrade() {
            orch.set_waiting(true);
        }
        info!(
            zone,
            duration_ms = duration.as_millis() as u64,
            "grace period started"
        );

        let orch = self.orch.clone();
        tokio::spawn(supervise(orch, generation, started, duration, fired));
    }

    /// Ends a pending wait without starting anything.
    pub fn cancel(&self) {
        let zone = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.waiting {
                return;
            }
            inner.clear();
            std::mem::take(&mut inner.zone)
        };
        if let Some(orch) = self.orch.upgrade() {
            orch.set_waiting(false);
        }
        debug!(zone, "grace period cancelled");
    }

    /// Ends a pending wait as if the qualifying input had arrived. Returns
    /// true when there was a wait to end; the caller performs the start.
    pub fn short_circuit(&self) -> bool {
        let elapsed = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.waiting {
                return false;
            }
            let elapsed = inner.started.map(|s| s.elapsed()).unwrap_or_default();
            inner.clear();
            elapsed
        };
        if let Some(orch) = self.orch.upgrade() {
            orch.set_waiting(false);
        }
        info!(
            waited_ms = elapsed.as_millis() as u64,
            "grace period short-circuited"
        );
        true
    }
}

/// Watches one wait until it is cancelled, receives input, or times out.
/// Input and timeout both end in a forced start.
async fn supervise(
    orch: Weak<Orchestrator>,
    generation: u64,
    started: Instant,
    duration: Duration,
    fired: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(GATE_POLL).await;
        let Some(orch) = orch.upgrade() else { return };
        let gate = orch.gate();

        let (input, zone) = {
            let mut inner = gate.inner.lock().unwrap();
            if !inner.waiting || inner.generation != generation {
                return; // cancelled or superseded
            }
            let input = if fired.load(Ordering::SeqCst) {
                true
            } else if started.elapsed() >= duration {
                false
            } else {
                continue;
            };
            inner.clear();
            (input, std::mem::take(&mut inner.zone))
        };

        orch.set_waiting(false);
        if input {
            info!(
                zone,
                waited_ms = started.elapsed().as_millis() as u64,
                "qualifying input ended grace period"
            );
        } else {
            info!(zone, "grace period elapsed");
        }
        orch.start(StartOptions::forced());
        return;
    }
}

fn parse_triggers(config: &GraceConfig) -> (Vec<Keycode>, Vec<usize>) {
    let keys = config
        .trigger_inputs
        .keys
        .iter()
        .filter_map(|name| match parse_keycode(name) {
            Some(k) => Some(k),
            None => {
                warn!(key = %name, "unrecognised grace trigger key ignored");
                None
            }
        })
        .collect();
    let buttons = config
        .trigger_inputs
        .pointer_buttons
        .iter()
        .filter_map(|name| match parse_pointer_button(name) {
            Some(b) => Some(b),
            None => {
                warn!(button = %name, "unrecognised grace trigger button ignored");
                None
            }
        })
        .collect();
    (keys, buttons)
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, GraceConfig, TriggerInputs};
    use crate::orchestrator::Orchestrator;
    use std::sync::Arc;
    use std::time::Duration;

    /// Grace-enabled config with an empty trigger set so tests never touch
    /// real input devices.
    fn grace_config(duration_secs: f64) -> Config {
        let mut config = Config::default();
        config.grace_period = GraceConfig {
            enabled: true,
            duration_secs,
            clear_cache_on_reenter: false,
            trigger_inputs: TriggerInputs {
                pointer_buttons: vec![],
                keys: vec![],
            },
        };
        config
    }

    fn orch(duration_secs: f64) -> Arc<Orchestrator> {
        Orchestrator::new(grace_config(duration_secs), vec![])
    }

    #[tokio::test]
    async fn timeout_starts_without_input() {
        let orch = orch(0.2);
        orch.gate().start_waiting("The Twilight Strand");

        let snapshot = orch.status();
        assert!(snapshot.grace_period_active);
        assert!(snapshot.waiting_for_input);
        assert!(!snapshot.running);

        tokio::time::sleep(Duration::from_millis(450)).await;

        let snapshot = orch.status();
        assert!(snapshot.running, "timer expiry should have started the macro");
        assert!(!snapshot.grace_period_active);
        assert!(!snapshot.waiting_for_input);
    }

    #[tokio::test]
    async fn cancel_prevents_the_timer_from_firing() {
        let orch = orch(0.2);
        orch.gate().start_waiting("The Twilight Strand");
        orch.gate().cancel();

        assert!(!orch.status().grace_period_active);

        // Well past the original deadline: the start must never happen.
        tokio::time::sleep(Duration::from_millis(450)).await;
        let snapshot = orch.status();
        assert!(!snapshot.running);
        assert!(!snapshot.grace_period_active);
        assert!(!snapshot.waiting_for_input);
    }

    #[tokio::test]
    async fn start_waiting_while_waiting_is_a_noop() {
        let orch = orch(10.0);
        orch.gate().start_waiting("The Coast");
        orch.gate().start_waiting("The Mud Flats");
        assert!(orch.status().grace_period_active);

        orch.gate().cancel();
        assert!(!orch.status().grace_period_active);
    }

    #[tokio::test]
    async fn short_circuit_reports_a_pending_wait_once() {
        let orch = orch(10.0);
        orch.gate().start_waiting("The Coast");
        assert!(orch.gate().short_circuit());
        assert!(!orch.gate().short_circuit());
        assert!(!orch.status().waiting_for_input);
    }

    #[tokio::test]
    async fn cancelled_wait_does_not_leak_into_the_next_one() {
        let orch = orch(0.2);
        orch.gate().start_waiting("The Coast");
        orch.gate().cancel();

        // A fresh wait right after a cancel must run on its own timer.
        orch.gate().start_waiting("The Mud Flats");
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(orch.status().running);
    }
}
