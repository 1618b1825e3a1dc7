use crate::config::Config;

pub enum ControlEvent {
    /// A toggle hotkey (primary or alternate channel) was pressed.
    Toggle,
    /// The emergency-stop chord was pressed; halt everything and exit.
    EmergencyStop,
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received; the daemon should stop cleanly and exit.
    Shutdown,
}
