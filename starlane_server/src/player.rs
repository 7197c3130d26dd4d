//! Connected player/session state.
//!
//! A [`Player`] exists only after successful authentication. It is owned
//! jointly: the transport listener holds its network identity (address,
//! outbound queue, string-table reader) while the scheduler drains its
//! inbound queue into the assigned region's simulation. All interior state
//! is behind its own lock so either task can touch its half without
//! coordinating with the other.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::Bytes;
use starlane_shared::guid::PlayerGuid;
use starlane_shared::hpid::{HpidCode, HpidError, HpidReader};
use starlane_shared::packet::{encode_frame, Packet};

use crate::world::RegionId;

/// Session lifecycle notifications exposed to the gameplay layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Connected(PlayerGuid),
    Disconnected(PlayerGuid),
}

pub struct Player {
    guid: PlayerGuid,
    addr: SocketAddr,
    name: Mutex<String>,
    region: Mutex<Option<RegionId>>,
    inbound: Mutex<VecDeque<Packet>>,
    outbound: Mutex<VecDeque<Bytes>>,
    hpids: Mutex<HpidReader>,
}

impl Player {
    pub fn new(guid: PlayerGuid, addr: SocketAddr) -> Self {
        Self {
            guid,
            addr,
            name: Mutex::new(guid.to_string()),
            region: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            hpids: Mutex::new(HpidReader::new()),
        }
    }

    pub fn guid(&self) -> PlayerGuid {
        self.guid
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> String {
        self.name.lock().expect("player name poisoned").clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().expect("player name poisoned") = name.to_owned();
    }

    pub fn region(&self) -> Option<RegionId> {
        self.region.lock().expect("player region poisoned").clone()
    }

    pub fn set_region(&self, region: Option<RegionId>) {
        *self.region.lock().expect("player region poisoned") = region;
    }

    // ─── Inbound: listener pushes, scheduler drains ───

    pub fn enqueue_inbound(&self, packet: Packet) {
        self.inbound
            .lock()
            .expect("player inbound poisoned")
            .push_back(packet);
    }

    /// Takes everything queued so far, preserving arrival order.
    pub fn drain_inbound(&self) -> Vec<Packet> {
        self.inbound
            .lock()
            .expect("player inbound poisoned")
            .drain(..)
            .collect()
    }

    // ─── Outbound: anyone queues, listener flushes ───

    pub fn queue_frame(&self, frame: Bytes) {
        self.outbound
            .lock()
            .expect("player outbound poisoned")
            .push_back(frame);
    }

    /// Queues a packet without requesting delivery confirmation.
    pub fn queue_packet(&self, packet: &Packet) {
        self.queue_frame(encode_frame(packet, None));
    }

    pub fn drain_outbound(&self) -> Vec<Bytes> {
        self.outbound
            .lock()
            .expect("player outbound poisoned")
            .drain(..)
            .collect()
    }

    // ─── Per-connection string table (strings this peer announces) ───

    pub fn apply_set_strings(&self, strings: Vec<String>) {
        self.hpids
            .lock()
            .expect("player hpids poisoned")
            .set_strings(strings);
    }

    pub fn apply_add_string(&self, code: HpidCode, string: String) -> Result<(), HpidError> {
        self.hpids
            .lock()
            .expect("player hpids poisoned")
            .add_string(code, string)
    }

    pub fn resolve_string(&self, code: HpidCode) -> Result<String, HpidError> {
        self.hpids
            .lock()
            .expect("player hpids poisoned")
            .resolve(code)
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(PlayerGuid::from_u128(1), "127.0.0.1:5000".parse().unwrap())
    }

    #[test]
    fn inbound_preserves_arrival_order() {
        let p = player();
        p.enqueue_inbound(Packet::Game { payload: vec![1] });
        p.enqueue_inbound(Packet::Game { payload: vec![2] });
        let drained = p.drain_inbound();
        assert_eq!(
            drained,
            vec![
                Packet::Game { payload: vec![1] },
                Packet::Game { payload: vec![2] },
            ]
        );
        assert!(p.drain_inbound().is_empty());
    }

    #[test]
    fn announced_strings_resolve() {
        let p = player();
        p.apply_set_strings(vec!["cargo_pod".into()]);
        p.apply_add_string(HpidCode::from_u32(2), "engine_mk2".into())
            .unwrap();
        assert_eq!(p.resolve_string(HpidCode::from_u32(2)).unwrap(), "engine_mk2");
        assert!(p.resolve_string(HpidCode::from_u32(9)).is_err());
    }
}
