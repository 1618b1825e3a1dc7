/// Safe-zone classification and the zone re-entry cache.
///
/// Automatic activation must never fire in a town or hideout. Towns are
/// matched exactly (lower-cased); any zone whose name contains "hideout"
/// is also safe.
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Act towns, lower-cased. Exact match only.
const SAFE_TOWNS: &[&str] = &[
    "lioneye's watch",
    "the forest encampment",
    "the sarn encampment",
    "highgate",
    "overseer's tower",
    "the bridge encampment",
    "oriath docks",
    "oriath",
    "karui shores",
    "the rogue harbour",
    "kingsmarch",
];

const HIDEOUT_MARKER: &str = "hideout";

/// How long a zone entry stays "recent" for the re-entry policy.
pub const CACHE_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Returns true when automatic activation must not occur in `zone`.
pub fn is_safe_zone(zone: &str) -> bool {
    let lower = zone.trim().to_lowercase();
    SAFE_TOWNS.contains(&lower.as_str()) || lower.contains(HIDEOUT_MARKER)
}

/// Zone name → last-enter time. Single writer: the monitor's event path.
#[derive(Default)]
pub struct AreaCache {
    entries: HashMap<String, Instant>,
}

impl AreaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry into `zone` at the current instant.
    pub fn note_enter(&mut self, zone: &str) {
        self.entries.insert(zone.to_lowercase(), Instant::now());
    }

    /// Returns true when `zone` was entered within [`CACHE_RETENTION`].
    pub fn recently_entered(&self, zone: &str) -> bool {
        self.entries
            .get(&zone.to_lowercase())
            .is_some_and(|t| t.elapsed() < CACHE_RETENTION)
    }
}
