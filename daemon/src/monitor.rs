/// The zone log monitor: tails the game's client log, derives
/// zone-enter/zone-exit events, and drives automatic activation through the
/// Grace-Period gate and the orchestrator.
///
/// The log is an append-only text stream that the game occasionally
/// rotates; rotation is detected purely by size shrinkage. History is never
/// replayed: monitoring starts at the current end of the file.
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::client::client_running;
use crate::config::Config;
use crate::orchestrator::{Orchestrator, StartOptions};
use crate::zones::{is_safe_zone, AreaCache};

/// How often the log is polled for new bytes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Consecutive read failures tolerated before the monitor gives up.
/// Fatal for the monitor only, never for the process.
pub const MAX_READ_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneEventKind {
    Enter,
    Exit,
}

/// One classified log line. Produced per matching line, consumed exactly
/// once by the transition handler.
#[derive(Debug, Clone)]
pub struct ZoneEvent {
    pub kind: ZoneEventKind,
    pub zone: String,
    pub timestamp: DateTime<Local>,
}

/// Classifies a log line against the enter/exit patterns. The zone name is
/// captured verbatim (apostrophes and spaces included) up to the trailing
/// period; matching is case-insensitive and anchored to the end of the line.
pub fn classify_line(line: &str) -> Option<ZoneEvent> {
    static ENTER: OnceLock<Regex> = OnceLock::new();
    static EXIT: OnceLock<Regex> = OnceLock::new();
    let enter = ENTER.get_or_init(|| Regex::new(r"(?i)you have entered (.+)\.$").unwrap());
    let exit = EXIT.get_or_init(|| Regex::new(r"(?i)you have left (.+)\.$").unwrap());

    let line = line.trim_end();
    if let Some(caps) = enter.captures(line) {
        return Some(ZoneEvent {
            kind: ZoneEventKind::Enter,
            zone: caps[1].to_string(),
            timestamp: Local::now(),
        });
    }
    if let Some(caps) = exit.captures(line) {
        return Some(ZoneEvent {
            kind: ZoneEventKind::Exit,
            zone: caps[1].to_string(),
            timestamp: Local::now(),
        });
    }
    None
}

/// Settings the monitor needs from the config, refreshed on reload.
#[derive(Clone)]
struct MonitorSettings {
    grace_enabled: bool,
    clear_cache_on_reenter: bool,
    client_executable: String,
}

impl MonitorSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            grace_enabled: config.grace_period.enabled,
            clear_cache_on_reenter: config.grace_period.clear_cache_on_reenter,
            client_executable: config.general.client_executable.clone(),
        }
    }
}

#[derive(Default)]
struct MonitorState {
    in_zone: bool,
    current_zone: Option<String>,
    cache: AreaCache,
}

pub struct ZoneMonitor {
    orch: Arc<Orchestrator>,
    settings: Mutex<MonitorSettings>,
    state: Mutex<MonitorState>,
}

impl ZoneMonitor {
    pub fn new(orch: Arc<Orchestrator>, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            orch,
            settings: Mutex::new(MonitorSettings::from_config(config)),
            state: Mutex::new(MonitorState::default()),
        })
    }

    pub fn update_config(&self, config: &Config) {
        *self.settings.lock().unwrap() = MonitorSettings::from_config(config);
    }

    /// Zone the player is currently in, for diagnostics and the status file.
    pub fn current_zone(&self) -> Option<String> {
        self.state.lock().unwrap().current_zone.clone()
    }

    /// Spawns the polling loop over the log at `path`, starting at its
    /// current end.
    pub fn spawn(self: &Arc<Self>, path: PathBuf) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut cursor = match std::fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(_) => 0, // file may appear later; start from its beginning
            };
            let mut partial = String::new();
            let mut errors = 0u32;
            let mut ticker = interval(POLL_INTERVAL);
            info!(path = %path.display(), "zone monitor started");

            loop {
                ticker.tick().await;
                match read_new_lines(&path, &mut cursor, &mut partial) {
                    Ok(lines) => {
                        errors = 0;
                        for line in lines {
                            monitor.process_line(&line);
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        warn!(error = %e, attempt = errors, "client log read failed");
                        if errors >= MAX_READ_ERRORS {
                            error!("too many consecutive log read failures; zone monitor stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Feeds one log line through classification and the transition
    /// handlers. Public so a single line can be synthesized without a real
    /// log source.
    pub fn process_line(&self, line: &str) {
        let Some(event) = classify_line(line) else { return };
        debug!(
            kind = ?event.kind,
            zone = %event.zone,
            at = %event.timestamp.format("%H:%M:%S"),
            "zone event"
        );
        match event.kind {
            ZoneEventKind::Enter => self.on_enter(&event.zone),
            ZoneEventKind::Exit => self.on_exit(&event.zone),
        }
    }

    fn on_enter(&self, zone: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if state.in_zone {
                debug!(zone, "duplicate zone enter ignored");
                return;
            }
            state.in_zone = true;
            state.current_zone = Some(zone.to_string());
        }

        if is_safe_zone(zone) {
            debug!(zone, "safe zone entered; no activation");
            return;
        }

        let settings = self.settings.lock().unwrap().clone();
        if !client_running(&settings.client_executable) {
            warn!(zone, "client not running; skipping activation");
            return;
        }

        if !settings.grace_enabled {
            info!(zone, "zone entered; activating");
            self.orch.start(StartOptions::forced());
            return;
        }

        let recent = {
            let mut state = self.state.lock().unwrap();
            if settings.clear_cache_on_reenter {
                // Policy: every entry re-arms the Grace Period.
                state.cache.note_enter(zone);
                false
            } else if state.cache.recently_entered(zone) {
                true
            } else {
                state.cache.note_enter(zone);
                false
            }
        };

        if recent {
            info!(zone, "recent re-entry; activating immediately");
            self.orch.start(StartOptions::forced());
        } else {
            self.orch.gate().start_waiting(zone);
        }
    }

    fn on_exit(&self, zone: &str) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.in_zone {
                debug!(zone, "zone exit while out of zone ignored");
                return;
            }
            state.in_zone = false;
            state.current_zone = None;
        }
        info!(zone, "zone left; stopping");
        self.orch.gate().cancel();
        self.orch.stop();
    }
}

/// Reads bytes appended since `cursor`, returning complete lines and
/// buffering any trailing partial line in `partial`. A size shrink is
/// treated as rotation: the cursor resets to the beginning.
fn read_new_lines(path: &Path, cursor: &mut u64, partial: &mut String) -> Result<Vec<String>> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if len < *cursor {
        debug!(
            old = *cursor,
            new = len,
            "client log shrank; assuming rotation"
        );
        *cursor = 0;
        partial.clear();
    }
    if len == *cursor {
        return Ok(Vec::new());
    }

    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(*cursor))
        .context("failed to seek to read cursor")?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .context("failed to read appended bytes")?;
    *cursor += bytes.len() as u64;

    partial.push_str(&String::from_utf8_lossy(&bytes));
    let mut lines = Vec::new();
    while let Some(pos) = partial.find('\n') {
        let line = partial[..pos].trim_end_matches('\r').to_string();
        partial.drain(..=pos);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}
