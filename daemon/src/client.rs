/// Game-client presence check.
///
/// The zone monitor consults this before automatic activation so a stale or
/// replayed log line cannot start the workers while the game is not running.
use sysinfo::{ProcessesToUpdate, System};

/// Returns true when a process whose executable name equals `executable`
/// (case-insensitive) is currently running. An empty name disables the
/// check and always returns true.
pub fn client_running(executable: &str) -> bool {
    if executable.is_empty() {
        return true;
    }
    let target = executable.to_lowercase();
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, false);
    sys.processes()
        .values()
        .any(|p| p.name().to_string_lossy().to_lowercase() == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_executable_disables_the_check() {
        assert!(client_running(""));
    }

    #[test]
    fn unknown_executable_is_not_running() {
        assert!(!client_running("keystone-definitely-not-a-process.exe"));
    }
}
