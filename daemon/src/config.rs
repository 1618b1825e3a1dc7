use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::ControlEvent;

pub const MIN_ACTION_INTERVAL_MS: u64 = 50;
pub const MAX_ACTION_INTERVAL_MS: u64 = 600_000;
pub const DEFAULT_ACTION_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TOGGLE_KEY: &str = "F2";
pub const DEFAULT_ALT_TOGGLE_KEY: &str = "F4";
pub const DEFAULT_EMERGENCY_KEY: &str = "Q";
pub const DEFAULT_GRACE_DURATION_SECS: f64 = 60.0;

/// Root configuration structure. Deserialized from %APPDATA%\Keystone\config.toml.
///
/// Every section and field has a default so a partial file degrades per-field;
/// a file that fails to parse at all is replaced wholesale with
/// [`Config::default`] by the caller.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub grace_period: GraceConfig,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// Global daemon settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Key name of the primary run/stop toggle hotkey.
    #[serde(default = "default_toggle_key")]
    pub toggle_key: String,
    /// Secondary toggle key watched on its own listener. Some input devices
    /// (macro pads, remapping drivers) deliver through a channel the primary
    /// listener can miss; an empty string disables it.
    #[serde(default = "default_alt_toggle_key")]
    pub alt_toggle_key: String,
    /// Modifier keys that must all be held for the emergency-stop chord.
    #[serde(default = "default_emergency_modifiers")]
    pub emergency_modifiers: Vec<String>,
    /// Trigger key of the emergency-stop chord.
    #[serde(default = "default_emergency_key")]
    pub emergency_key: String,
    /// When false, automatic activation ignores the Grace Period entirely.
    #[serde(default = "default_true")]
    pub respect_grace_period: bool,
    /// Path of the game's client log. Empty disables the zone monitor.
    #[serde(default)]
    pub client_log_path: String,
    /// Executable name of the game client (e.g. "PathOfExile.exe").
    /// Automatic activation is skipped while it is not running.
    /// Empty disables the check.
    #[serde(default)]
    pub client_executable: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            toggle_key: DEFAULT_TOGGLE_KEY.to_string(),
            alt_toggle_key: DEFAULT_ALT_TOGGLE_KEY.to_string(),
            emergency_modifiers: default_emergency_modifiers(),
            emergency_key: DEFAULT_EMERGENCY_KEY.to_string(),
            respect_grace_period: true,
            client_log_path: String::new(),
            client_executable: String::new(),
        }
    }
}

/// Grace-Period settings: the bounded wait between entering a zone and
/// automatic activation.
#[derive(Debug, Deserialize, Clone)]
pub struct GraceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Wait duration in seconds. Non-positive values fall back to the default.
    #[serde(default = "default_grace_duration")]
    pub duration_secs: f64,
    /// When true, every zone entry re-arms the Grace Period regardless of how
    /// recently the zone was last entered.
    #[serde(default)]
    pub clear_cache_on_reenter: bool,
    #[serde(default)]
    pub trigger_inputs: TriggerInputs,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_secs: DEFAULT_GRACE_DURATION_SECS,
            clear_cache_on_reenter: false,
            trigger_inputs: TriggerInputs::default(),
        }
    }
}

impl GraceConfig {
    /// Returns the wait duration, substituting the default for non-positive
    /// or non-finite configured values.
    pub fn effective_duration(&self) -> Duration {
        let secs = if self.duration_secs.is_finite() && self.duration_secs > 0.0 {
            self.duration_secs
        } else {
            DEFAULT_GRACE_DURATION_SECS
        };
        Duration::from_secs_f64(secs)
    }
}

/// The inputs that qualify to end a Grace Period early. Anything outside
/// these two sets is ignored by the transient listener.
#[derive(Debug, Deserialize, Clone)]
pub struct TriggerInputs {
    #[serde(default = "default_pointer_buttons")]
    pub pointer_buttons: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

impl Default for TriggerInputs {
    fn default() -> Self {
        Self {
            pointer_buttons: default_pointer_buttons(),
            keys: Vec::new(),
        }
    }
}

/// Configuration for a single periodic key-press action worker.
#[derive(Debug, Deserialize, Clone)]
pub struct ActionConfig {
    /// Unique name, used in logs and status reporting.
    pub name: String,
    /// Key pressed on every cycle.
    pub key: String,
    /// Press interval in milliseconds. Clamped to [50, 600000].
    #[serde(default = "default_action_interval")]
    pub interval_ms: u64,
    #[serde(default)]
    pub enabled: bool,
}

impl ActionConfig {
    /// Returns the press interval with clamping applied.
    pub fn effective_interval(&self) -> Duration {
        Duration::from_millis(
            self.interval_ms
                .clamp(MIN_ACTION_INTERVAL_MS, MAX_ACTION_INTERVAL_MS),
        )
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<ControlEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!("config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!(error = %e, "failed to watch config directory");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(ControlEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to reload config"),
            }
        }
    }
}

fn default_toggle_key() -> String {
    DEFAULT_TOGGLE_KEY.to_string()
}

fn default_alt_toggle_key() -> String {
    DEFAULT_ALT_TOGGLE_KEY.to_string()
}

fn default_emergency_modifiers() -> Vec<String> {
    vec!["LControl".to_string(), "LShift".to_string()]
}

fn default_emergency_key() -> String {
    DEFAULT_EMERGENCY_KEY.to_string()
}

fn default_true() -> bool {
    true
}

fn default_grace_duration() -> f64 {
    DEFAULT_GRACE_DURATION_SECS
}

fn default_pointer_buttons() -> Vec<String> {
    vec!["left".to_string()]
}

fn default_action_interval() -> u64 {
    DEFAULT_ACTION_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_config_is_safe() {
        let c = Config::default();
        assert!(!c.grace_period.enabled);
        assert!(c.actions.is_empty());
        assert!(c.general.client_log_path.is_empty());
        assert!(c.general.respect_grace_period);
    }

    #[test]
    fn general_config_default_values() {
        let g = GeneralConfig::default();
        assert_eq!(g.toggle_key, DEFAULT_TOGGLE_KEY);
        assert_eq!(g.alt_toggle_key, DEFAULT_ALT_TOGGLE_KEY);
        assert_eq!(g.emergency_key, DEFAULT_EMERGENCY_KEY);
        assert_eq!(g.emergency_modifiers, vec!["LControl", "LShift"]);
    }

    // ── effective_duration ────────────────────────────────────────────────────

    #[test]
    fn effective_duration_uses_configured_value() {
        let g = GraceConfig {
            duration_secs: 0.2,
            ..GraceConfig::default()
        };
        assert_eq!(g.effective_duration(), Duration::from_millis(200));
    }

    #[test]
    fn effective_duration_rejects_non_positive() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let g = GraceConfig {
                duration_secs: bad,
                ..GraceConfig::default()
            };
            assert_eq!(
                g.effective_duration(),
                Duration::from_secs_f64(DEFAULT_GRACE_DURATION_SECS),
                "expected fallback for {bad}"
            );
        }
    }

    // ── effective_interval ────────────────────────────────────────────────────

    #[test]
    fn effective_interval_clamps_both_ends() {
        let mut a = ActionConfig {
            name: "a".to_string(),
            key: "1".to_string(),
            interval_ms: 1,
            enabled: true,
        };
        assert_eq!(
            a.effective_interval(),
            Duration::from_millis(MIN_ACTION_INTERVAL_MS)
        );
        a.interval_ms = u64::MAX;
        assert_eq!(
            a.effective_interval(),
            Duration::from_millis(MAX_ACTION_INTERVAL_MS)
        );
        a.interval_ms = 2_000;
        assert_eq!(a.effective_interval(), Duration::from_millis(2_000));
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert!(config.actions.is_empty());
        assert!(!config.grace_period.enabled);
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[general]
toggle_key = "F6"
client_log_path = "C:\\Games\\logs\\Client.txt"
client_executable = "PathOfExile.exe"

[grace_period]
enabled = true
duration_secs = 45.0
clear_cache_on_reenter = true

[grace_period.trigger_inputs]
pointer_buttons = ["left", "right"]
keys = ["W"]

[[actions]]
name = "utility_flask"
key = "5"
interval_ms = 6000
enabled = true
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.general.toggle_key, "F6");
        assert_eq!(config.general.client_executable, "PathOfExile.exe");
        assert!(config.grace_period.enabled);
        assert!(config.grace_period.clear_cache_on_reenter);
        assert_eq!(config.grace_period.duration_secs, 45.0);
        assert_eq!(
            config.grace_period.trigger_inputs.pointer_buttons,
            vec!["left", "right"]
        );
        assert_eq!(config.grace_period.trigger_inputs.keys, vec!["W"]);
        assert_eq!(config.actions.len(), 1);
        assert_eq!(config.actions[0].name, "utility_flask");
        assert!(config.actions[0].enabled);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        // Only override one field; the rest should get their defaults.
        std::fs::write(&path, "[grace_period]\nenabled = true\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert!(config.grace_period.enabled);
        assert_eq!(config.grace_period.duration_secs, DEFAULT_GRACE_DURATION_SECS);
        assert_eq!(config.general.toggle_key, DEFAULT_TOGGLE_KEY);
        assert_eq!(
            config.grace_period.trigger_inputs.pointer_buttons,
            vec!["left"]
        );
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn load_or_default_wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        // enabled should be a bool; the caller substitutes full defaults.
        std::fs::write(&path, "[grace_period]\nenabled = \"yes\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn action_interval_default_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[actions]]\nname = \"quicksilver\"\nkey = \"2\"\n",
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.actions[0].interval_ms, DEFAULT_ACTION_INTERVAL_MS);
        assert!(!config.actions[0].enabled);
    }
}
