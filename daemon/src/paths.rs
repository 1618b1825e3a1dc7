/// Canonical file paths for Keystone data files on Windows.
///
/// Both files live under %APPDATA%\Keystone\:
///   - config.toml  Written by the GUI, read by the daemon.
///   - status.toml  Written by the daemon, read by the GUI/overlay.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Keystone";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the Keystone application data directory: %APPDATA%\Keystone\
pub fn app_data_dir() -> PathBuf {
    let appdata = std::env::var("APPDATA").expect("APPDATA environment variable not set");
    PathBuf::from(appdata).join(APP_DIR_NAME)
}

/// Returns the full path to the config file: %APPDATA%\Keystone\config.toml
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: %APPDATA%\Keystone\status.toml
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
