//! Connection/session state machine.
//!
//! A peer walks `PendingHandshake → PendingAuth → Authenticated`, or out to
//! `Rejected`/`Disconnected` at any step. The decision logic lives here as
//! plain functions over decoded packets so the transport listener stays a
//! thin driver and every transition is unit-testable without sockets.
//!
//! All outcomes are strictly peer-scoped: nothing decided here may touch any
//! other peer's state.

use crate::guid::PlayerGuid;
use crate::packet::Packet;

/// Lifecycle states of one transport-level peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// First datagram not yet validated.
    PendingHandshake,
    /// Handshake accepted; waiting on identity (challenge reply or external
    /// token verification round-trip).
    PendingAuth,
    /// Session established; packets flow to the simulation layer.
    Authenticated,
    /// Terminal. No further sends to this peer.
    Disconnected,
}

/// Outcome of evaluating a connection request.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Refuse with a short machine-readable reason; no session is created.
    Reject { reason: String },
    /// External login is configured and a token was supplied: verify it on
    /// an auxiliary task, then resume via the listener's event queue.
    BeginTokenVerification { token: String },
    /// No external login: ask the peer for a self-generated identity.
    IssueIdentityChallenge,
}

/// Evaluates the initial datagram of a connecting peer.
///
/// Order matters: key validity gates everything, capacity is checked before
/// any authentication work is started.
pub fn evaluate_connect(
    packet: &Packet,
    expected_key: &str,
    connected: usize,
    max_players: usize,
    login_url: Option<&str>,
) -> ConnectDecision {
    let (key, token) = match packet {
        Packet::ConnectRequest { key, token } => (key, token),
        _ => {
            return ConnectDecision::Reject {
                reason: "Invalid packet".into(),
            }
        }
    };
    if key != expected_key {
        return ConnectDecision::Reject {
            reason: "bad key".into(),
        };
    }
    if connected >= max_players {
        return ConnectDecision::Reject {
            reason: "server full".into(),
        };
    }
    match login_url {
        Some(url) => match token {
            Some(token) => ConnectDecision::BeginTokenVerification {
                token: token.clone(),
            },
            None => ConnectDecision::Reject {
                reason: format!("TokenRequired?{url}"),
            },
        },
        None => ConnectDecision::IssueIdentityChallenge,
    }
}

/// Outcome of evaluating a packet from a peer in `PendingAuth`.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Accept { guid: PlayerGuid },
    Reject { reason: String },
}

/// Evaluates the reply to an identity challenge.
pub fn evaluate_identity_reply(packet: &Packet) -> AuthDecision {
    match packet {
        Packet::IdentityReply { guid } if guid.is_valid() => AuthDecision::Accept { guid: *guid },
        Packet::IdentityReply { .. } => AuthDecision::Reject {
            reason: "bad GUID".into(),
        },
        _ => AuthDecision::Reject {
            reason: "Invalid packet".into(),
        },
    }
}

/// Maps the completion of an external verification round-trip.
pub fn evaluate_verification(result: Option<PlayerGuid>) -> AuthDecision {
    match result {
        Some(guid) if guid.is_valid() => AuthDecision::Accept { guid },
        _ => AuthDecision::Reject {
            reason: "Login failure".into(),
        },
    }
}
