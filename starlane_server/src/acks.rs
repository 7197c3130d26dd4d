//! Delivery-confirmation bookkeeping.
//!
//! Outbound frames that want confirmation carry a sequence number; the peer
//! answers `Ack { seq }`. Instead of callbacks closing over ambient state,
//! each in-flight frame is an explicit record keyed by its sequence, resolved
//! when the transport observes the confirmation.

use std::collections::HashMap;

use starlane_shared::guid::PlayerGuid;

/// Context attached to one in-flight frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckContext {
    pub player: PlayerGuid,
    pub label: &'static str,
}

#[derive(Default)]
pub struct PendingAcks {
    next_seq: u32,
    in_flight: HashMap<u32, AckContext>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the sequence for the next confirmable frame.
    pub fn next_seq(&mut self) -> u32 {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq
    }

    pub fn register(&mut self, seq: u32, ctx: AckContext) {
        self.in_flight.insert(seq, ctx);
    }

    /// Resolves a confirmation. Unknown and duplicate sequences yield `None`.
    pub fn confirm(&mut self, seq: u32) -> Option<AckContext> {
        self.in_flight.remove(&seq)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
