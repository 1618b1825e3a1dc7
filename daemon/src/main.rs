mod client;
mod config;
mod event;
mod gate;
mod keys;
mod listener;
mod monitor;
mod orchestrator;
mod paths;
mod status;
mod submodule;
mod supervisor;
mod workers;
mod zones;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::event::ControlEvent;
use crate::orchestrator::Orchestrator;
use crate::status::{DaemonState, DaemonStatus};
use crate::supervisor::ListenerSupervisor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "config error; using defaults");
        config::Config::default()
    });

    // ── Orchestrator + action workers ─────────────────────────────────────────
    let submodules = workers::build_submodules(&config.actions);
    let orch = Orchestrator::new(config.clone(), submodules);

    // ── Zone monitor ──────────────────────────────────────────────────────────
    let monitor = if config.general.client_log_path.is_empty() {
        warn!("no client log path configured; zone monitor disabled");
        None
    } else {
        let monitor = monitor::ZoneMonitor::new(Arc::clone(&orch), &config);
        monitor.spawn(PathBuf::from(&config.general.client_log_path));
        Some(monitor)
    };

    // ── Status file for the GUI/overlay ───────────────────────────────────────
    let status_path = paths::status_file_path();
    status::write_status(&status_path, &DaemonStatus::new());
    {
        let weak = Arc::downgrade(&orch);
        let monitor = monitor.clone();
        let path = status_path.clone();
        let last_activation: Mutex<Option<String>> = Mutex::new(None);
        orch.set_status_changed_callback(move |running| {
            let Some(orch) = weak.upgrade() else { return };
            if running {
                *last_activation.lock().unwrap() = Some(chrono::Local::now().to_rfc3339());
            }
            let snapshot = orch.status();
            let state = if snapshot.running {
                DaemonState::Running
            } else if snapshot.waiting_for_input {
                DaemonState::Waiting
            } else {
                DaemonState::Idle
            };
            let status = DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                state,
                active_zone: monitor.as_ref().and_then(|m| m.current_zone()),
                last_activation_timestamp: last_activation.lock().unwrap().clone(),
                error: None,
            };
            status::write_status(&path, &status);
        });
    }

    // ── Control channel + input listeners ─────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<ControlEvent>(32);
    let supervisor = ListenerSupervisor::start(config.general.clone(), event_tx.clone());
    orch.attach_supervisor(Arc::clone(&supervisor));
    debug!(listeners = ?supervisor.listener_status(), "input listeners created");

    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(ControlEvent::Shutdown).await;
            }
        });
    }

    info!("keystone-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(event) = event_rx.recv().await {
        match event {
            ControlEvent::Toggle => {
                debug!("toggle hotkey pressed");
                orch.toggle();
            }

            ControlEvent::EmergencyStop => {
                warn!("emergency stop chord; halting");
                orch.stop();
                break;
            }

            ControlEvent::ConfigReloaded(new_config) => {
                info!("config reloaded");
                orch.update_config(&new_config);
                if let Some(monitor) = &monitor {
                    monitor.update_config(&new_config);
                }
                supervisor.rebind(new_config.general.clone());
            }

            ControlEvent::Shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    orch.shutdown();
    status::write_status(&status_path, &DaemonStatus::new());
}
