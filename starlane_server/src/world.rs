//! Per-region simulation instances.
//!
//! The scheduler multiplexes many independent regions; each live region is
//! one [`ServerWorld`] wrapping a gameplay-supplied [`RegionDriver`]. The
//! core never looks inside the simulation — it only ticks it, routes opaque
//! payloads into it, and tracks which players are attached so teardown can
//! be raced safely against late joins.

use std::collections::HashSet;
use std::fmt;

use starlane_shared::guid::PlayerGuid;

/// Identity of one game region (star system, sector, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionId(String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        RegionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The seam to the simulation layer.
pub trait RegionDriver: Send {
    /// Advances the region by `dt` seconds (`total` is accumulated server
    /// time). Returns whether the region should remain active.
    fn update(&mut self, dt: f64, total: f64) -> bool;

    /// Applies one opaque gameplay payload from a player.
    fn apply_packet(&mut self, from: PlayerGuid, payload: &[u8]);

    /// Optional one-line status for the per-tick debug report.
    fn debug_info(&self) -> String {
        String::new()
    }
}

/// One live region instance.
pub struct ServerWorld {
    region: RegionId,
    driver: Box<dyn RegionDriver>,
    players: HashSet<PlayerGuid>,
}

impl ServerWorld {
    pub fn new(region: RegionId, driver: Box<dyn RegionDriver>) -> Self {
        Self {
            region,
            driver,
            players: HashSet::new(),
        }
    }

    pub fn region(&self) -> &RegionId {
        &self.region
    }

    pub fn update(&mut self, dt: f64, total: f64) -> bool {
        self.driver.update(dt, total)
    }

    pub fn apply_packet(&mut self, from: PlayerGuid, payload: &[u8]) {
        self.driver.apply_packet(from, payload);
    }

    pub fn attach(&mut self, guid: PlayerGuid) {
        self.players.insert(guid);
    }

    pub fn detach(&mut self, guid: PlayerGuid) {
        self.players.remove(&guid);
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn debug_info(&self) -> String {
        self.driver.debug_info()
    }
}
