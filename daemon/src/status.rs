use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// The macro is stopped and no Grace Period is pending.
    Idle,
    /// The action workers are running.
    Running,
    /// A Grace Period is pending: waiting for a timeout or qualifying input.
    Waiting,
}

/// Runtime status written by the daemon to %APPDATA%\Keystone\status.toml.
/// The GUI/overlay reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Zone the player is currently in, if the monitor knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_zone: Option<String>,
    /// RFC 3339 timestamp of the most recent activation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activation_timestamp: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Idle,
            active_zone: None,
            last_activation_timestamp: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking — a status write failure should never
/// crash the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_starts_idle() {
        let s = DaemonStatus::new();
        assert_eq!(s.state, DaemonState::Idle);
    }

    #[test]
    fn new_has_no_optional_fields() {
        let s = DaemonStatus::new();
        assert!(s.active_zone.is_none());
        assert!(s.last_activation_timestamp.is_none());
        assert!(s.error.is_none());
    }

    #[test]
    fn new_version_matches_cargo_pkg() {
        let s = DaemonStatus::new();
        assert_eq!(s.version, env!("CARGO_PKG_VERSION"));
    }

    // ── DaemonState serialization ─────────────────────────────────────────────

    #[test]
    fn state_serializes_to_lowercase() {
        // TOML requires a root table, so verify the value via DaemonStatus.
        let mut s = DaemonStatus::new();
        let idle = toml::to_string_pretty(&s).unwrap();
        assert!(idle.contains("state = \"idle\""));

        s.state = DaemonState::Running;
        let running = toml::to_string_pretty(&s).unwrap();
        assert!(running.contains("state = \"running\""));

        s.state = DaemonState::Waiting;
        let waiting = toml::to_string_pretty(&s).unwrap();
        assert!(waiting.contains("state = \"waiting\""));
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        write_status(&path, &DaemonStatus::new());
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new();
        original.state = DaemonState::Running;
        original.active_zone = Some("The Twilight Strand".to_string());

        write_status(&path, &original);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: DaemonStatus = toml::from_str(&content).unwrap();

        assert_eq!(parsed.state, DaemonState::Running);
        assert_eq!(parsed.active_zone.as_deref(), Some("The Twilight Strand"));
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("active_zone"));
        assert!(!content.contains("last_activation_timestamp"));
        assert!(!content.contains("error"));
    }
}
