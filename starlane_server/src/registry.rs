//! Connected-player registry.
//!
//! One explicit object shared by the listener and scheduler, guarding the
//! connected set with a single lock. Iteration always goes through
//! [`PlayerRegistry::snapshot`], which copies the set under the lock and
//! releases it before any per-player work — the lock is never held across a
//! send.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use starlane_shared::guid::PlayerGuid;

use crate::player::Player;

#[derive(Default)]
pub struct PlayerRegistry {
    inner: Mutex<HashMap<SocketAddr, Arc<Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, player: Arc<Player>) {
        self.inner
            .lock()
            .expect("registry poisoned")
            .insert(player.addr(), player);
    }

    pub fn remove(&self, addr: &SocketAddr) -> Option<Arc<Player>> {
        self.inner.lock().expect("registry poisoned").remove(addr)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn by_addr(&self, addr: &SocketAddr) -> Option<Arc<Player>> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .get(addr)
            .cloned()
    }

    pub fn by_guid(&self, guid: PlayerGuid) -> Option<Arc<Player>> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .values()
            .find(|p| p.guid() == guid)
            .cloned()
    }

    /// Case-insensitive display-name lookup.
    pub fn by_name(&self, name: &str) -> Option<Arc<Player>> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .values()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Point-in-time copy of the connected set.
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .values()
            .cloned()
            .collect()
    }
}
