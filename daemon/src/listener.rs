/// Global input listeners.
///
/// Each listener is a dedicated OS thread polling global key/pointer state
/// at [`LISTENER_POLL`] and publishing into the daemon through a
/// non-blocking channel send or a shared flag. Polling is used instead of
/// OS event hooks so a listener can never wedge the input stack; 50ms is
/// comfortably under human press duration.
///
/// Liveness is observable from outside: the thread holds a guard that
/// clears the handle's `running` flag even when it unwinds, so the
/// supervisor's recheck sees crashed listeners and recreates them.
use device_query::{DeviceQuery, DeviceState, Keycode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::ControlEvent;

pub const LISTENER_POLL: Duration = Duration::from_millis(50);

/// Modifier keys considered when requiring an exact chord match.
const MODIFIER_KEYS: &[Keycode] = &[
    Keycode::LControl,
    Keycode::RControl,
    Keycode::LShift,
    Keycode::RShift,
    Keycode::LAlt,
    Keycode::RAlt,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Toggle,
    AltToggle,
    Emergency,
    GraceInput,
}

impl ListenerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ListenerKind::Toggle => "toggle",
            ListenerKind::AltToggle => "alt_toggle",
            ListenerKind::Emergency => "emergency",
            ListenerKind::GraceInput => "grace_input",
        }
    }
}

/// A handle to a running listener thread.
pub struct ListenerHandle {
    running: Arc<AtomicBool>,
}

impl ListenerHandle {
    /// Polled by the supervisor; false once the thread exited for any reason.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signals the thread to exit at its next poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Clears the running flag when the listener thread exits, unwinding included.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Spawns a listener thread running `tick` once per poll. `tick` returns
/// false to end the listener from inside (used by the grace listener once
/// it has fired).
fn spawn_listener(
    kind: ListenerKind,
    mut tick: impl FnMut(&DeviceState) -> bool + Send + 'static,
) -> ListenerHandle {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);

    let spawned = std::thread::Builder::new()
        .name(format!("listener-{}", kind.name()))
        .spawn(move || {
            let _guard = AliveGuard(Arc::clone(&flag));
            let device_state = DeviceState::new();
            while flag.load(Ordering::SeqCst) {
                if !tick(&device_state) {
                    break;
                }
                std::thread::sleep(LISTENER_POLL);
            }
        });

    if let Err(e) = spawned {
        warn!(listener = kind.name(), error = %e, "failed to spawn listener thread");
        running.store(false, Ordering::SeqCst);
    }
    ListenerHandle { running }
}

/// Watches a single key and sends [`ControlEvent::Toggle`] on its rising
/// edge. A full channel silently drops the press for that cycle.
pub fn spawn_toggle_listener(
    kind: ListenerKind,
    key: Keycode,
    tx: mpsc::Sender<ControlEvent>,
) -> ListenerHandle {
    let mut was_held = false;
    spawn_listener(kind, move |ds| {
        let held = ds.get_keys().contains(&key);
        if held && !was_held {
            let _ = tx.try_send(ControlEvent::Toggle);
        }
        was_held = held;
        true
    })
}

/// Watches for the emergency-stop chord: every modifier held, no extra
/// modifier held, at the moment the trigger key goes down.
///
/// The held-key set is the poll snapshot, so out-of-order OS events can only
/// cost a detection (false negative) — a spurious emergency stop is not
/// possible without the exact chord actually held.
pub fn spawn_emergency_listener(
    modifiers: Vec<Keycode>,
    trigger: Keycode,
    tx: mpsc::Sender<ControlEvent>,
) -> ListenerHandle {
    let mut was_held = false;
    spawn_listener(ListenerKind::Emergency, move |ds| {
        let keys = ds.get_keys();
        let held = keys.contains(&trigger);
        if held && !was_held && chord_matches(&keys, &modifiers) {
            debug!("emergency chord detected");
            let _ = tx.try_send(ControlEvent::EmergencyStop);
        }
        was_held = held;
        true
    })
}

/// Watches the Grace Period trigger set and sets `fired` on the first rising
/// edge of any configured key or pointer button, then exits. Inputs outside
/// the configured sets are ignored.
pub fn spawn_grace_input_listener(
    keys: Vec<Keycode>,
    buttons: Vec<usize>,
    fired: Arc<AtomicBool>,
) -> ListenerHandle {
    let mut prev_keys: Vec<bool> = vec![false; keys.len()];
    let mut prev_buttons: Vec<bool> = vec![false; buttons.len()];
    spawn_listener(ListenerKind::GraceInput, move |ds| {
        let held_keys = ds.get_keys();
        let mouse = ds.get_mouse();

        let mut qualified = false;
        for (i, key) in keys.iter().enumerate() {
            let held = held_keys.contains(key);
            if held && !prev_keys[i] {
                qualified = true;
            }
            prev_keys[i] = held;
        }
        for (i, &button) in buttons.iter().enumerate() {
            let held = mouse.button_pressed.get(button).copied().unwrap_or(false);
            if held && !prev_buttons[i] {
                qualified = true;
            }
            prev_buttons[i] = held;
        }

        if qualified {
            debug!("qualifying input observed");
            fired.store(true, Ordering::SeqCst);
            return false;
        }
        true
    })
}

/// True when every required modifier is held and no other modifier is.
fn chord_matches(held: &[Keycode], required: &[Keycode]) -> bool {
    required.iter().all(|m| held.contains(m))
        && held
            .iter()
            .filter(|k| MODIFIER_KEYS.contains(k))
            .all(|k| required.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── chord_matches ─────────────────────────────────────────────────────────

    #[test]
    fn chord_matches_exact_modifiers() {
        let held = vec![Keycode::LControl, Keycode::LShift, Keycode::Q];
        let required = vec![Keycode::LControl, Keycode::LShift];
        assert!(chord_matches(&held, &required));
    }

    #[test]
    fn chord_rejects_missing_modifier() {
        let held = vec![Keycode::LControl, Keycode::Q];
        let required = vec![Keycode::LControl, Keycode::LShift];
        assert!(!chord_matches(&held, &required));
    }

    #[test]
    fn chord_rejects_extra_modifier() {
        // LAlt held on top of the required chord: not an exact match.
        let held = vec![Keycode::LControl, Keycode::LShift, Keycode::LAlt, Keycode::Q];
        let required = vec![Keycode::LControl, Keycode::LShift];
        assert!(!chord_matches(&held, &required));
    }

    #[test]
    fn chord_ignores_non_modifier_extras() {
        // A movement key held alongside the chord must not block detection.
        let held = vec![Keycode::LControl, Keycode::LShift, Keycode::W, Keycode::Q];
        let required = vec![Keycode::LControl, Keycode::LShift];
        assert!(chord_matches(&held, &required));
    }

    #[test]
    fn empty_required_set_rejects_any_held_modifier() {
        let required = vec![];
        assert!(chord_matches(&[Keycode::Q], &required));
        assert!(!chord_matches(&[Keycode::LControl, Keycode::Q], &required));
    }

    // ── ListenerHandle ────────────────────────────────────────────────────────

    #[test]
    fn handle_stop_clears_running() {
        let handle = ListenerHandle {
            running: Arc::new(AtomicBool::new(true)),
        };
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ListenerKind::Toggle.name(), "toggle");
        assert_eq!(ListenerKind::AltToggle.name(), "alt_toggle");
        assert_eq!(ListenerKind::Emergency.name(), "emergency");
        assert_eq!(ListenerKind::GraceInput.name(), "grace_input");
    }
}
