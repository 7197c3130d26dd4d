//! Packet definitions and datagram framing.
//!
//! Every packet variant has a stable wire tag; decoding dispatches on the tag
//! through an exhaustive match. An unknown tag is a hard [`DecodeError`] —
//! the peer sent malformed data and must be disconnected, but the process
//! itself never dies over it.
//!
//! Datagram layout: `[flags: u8] [seq: varint, if ACK_REQUESTED] [packet]`.
//! A receiver of a frame with `ACK_REQUESTED` answers `Ack { seq }` at once;
//! the sender resolves the matching pending-acknowledgment record.

use bitflags::bitflags;
use bytes::Bytes;

use crate::codec::{DecodeError, PacketReader, PacketWriter};
use crate::guid::PlayerGuid;
use crate::hpid::HpidCode;

/// Default port for the primary game socket.
pub const DEFAULT_PORT: u16 = 42_500;
/// Fixed port the discovery responder listens on.
pub const DISCOVERY_PORT: u16 = 42_501;
/// 8-byte magic carried by unconnected discovery datagrams.
pub const BROADCAST_MAGIC: u64 = 0x5354_4152_4C41_4E45;
/// 4-byte magic carried by unconnected liveness pings.
pub const PING_MAGIC: u32 = 0x504F_4B45;
/// Default application identifier half of the handshake key.
pub const DEFAULT_APP_IDENT: &str = "starlane";
/// Hash over the packet table; bumped whenever the wire format changes.
pub const PROTOCOL_HASH: &str = "7b2e94d1";

/// The full handshake key a connecting peer must present.
pub fn handshake_key(app_ident: &str) -> String {
    format!("{app_ident}{PROTOCOL_HASH}")
}

bitflags! {
    /// Per-datagram header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Sender wants an `Ack { seq }` for this frame.
        const ACK_REQUESTED = 0b0000_0001;
    }
}

mod tag {
    pub const CONNECT_REQUEST: u8 = 1;
    pub const CONNECT_ACCEPT: u8 = 2;
    pub const REJECT: u8 = 3;
    pub const IDENTITY_CHALLENGE: u8 = 4;
    pub const IDENTITY_REPLY: u8 = 5;
    pub const SET_STRINGS: u8 = 6;
    pub const ADD_STRING: u8 = 7;
    pub const GAME: u8 = 8;
    pub const DISCONNECT: u8 = 9;
    pub const ACK: u8 = 10;
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    // ─── Pre-authentication ───
    /// First datagram from a connecting peer: handshake key plus the login
    /// token when an external login service is in use.
    ConnectRequest {
        key: String,
        token: Option<String>,
    },
    ConnectAccept,
    /// Terminal refusal with a short machine-readable reason.
    Reject {
        reason: String,
    },
    /// Server asks the peer for a self-generated identity.
    IdentityChallenge,
    IdentityReply {
        guid: PlayerGuid,
    },

    // ─── String-table maintenance ───
    /// Full table snapshot, ordered by code. Sent once on authentication.
    SetStrings {
        strings: Vec<String>,
    },
    /// One incremental addition, carrying its assigned code.
    AddString {
        code: u32,
        string: String,
    },

    // ─── Gameplay ───
    /// Opaque payload handed to the simulation layer.
    Game {
        payload: Vec<u8>,
    },

    // ─── Session/transport control ───
    Disconnect {
        reason: String,
    },
    /// Delivery confirmation for a frame that requested one.
    Ack {
        seq: u32,
    },
}

impl Packet {
    pub fn wire_tag(&self) -> u8 {
        match self {
            Packet::ConnectRequest { .. } => tag::CONNECT_REQUEST,
            Packet::ConnectAccept => tag::CONNECT_ACCEPT,
            Packet::Reject { .. } => tag::REJECT,
            Packet::IdentityChallenge => tag::IDENTITY_CHALLENGE,
            Packet::IdentityReply { .. } => tag::IDENTITY_REPLY,
            Packet::SetStrings { .. } => tag::SET_STRINGS,
            Packet::AddString { .. } => tag::ADD_STRING,
            Packet::Game { .. } => tag::GAME,
            Packet::Disconnect { .. } => tag::DISCONNECT,
            Packet::Ack { .. } => tag::ACK,
        }
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        w.put_u8(self.wire_tag());
        match self {
            Packet::ConnectRequest { key, token } => {
                w.put_string(key);
                match token {
                    Some(t) => {
                        w.put_u8(1);
                        w.put_string(t);
                    }
                    None => w.put_u8(0),
                }
            }
            Packet::ConnectAccept | Packet::IdentityChallenge => {}
            Packet::Reject { reason } | Packet::Disconnect { reason } => {
                w.put_string(reason);
            }
            Packet::IdentityReply { guid } => w.put_guid(*guid),
            Packet::SetStrings { strings } => {
                w.put_var_u32(strings.len() as u32);
                for s in strings {
                    w.put_string(s);
                }
            }
            Packet::AddString { code, string } => {
                w.put_var_u32(*code);
                w.put_string(string);
            }
            Packet::Game { payload } => w.put_bytes(payload),
            Packet::Ack { seq } => w.put_var_u32(*seq),
        }
    }

    pub fn decode(r: &mut PacketReader) -> Result<Packet, DecodeError> {
        let tag = r.get_u8()?;
        match tag {
            tag::CONNECT_REQUEST => {
                let key = r.get_string()?;
                let token = match r.get_u8()? {
                    0 => None,
                    _ => Some(r.get_string()?),
                };
                Ok(Packet::ConnectRequest { key, token })
            }
            tag::CONNECT_ACCEPT => Ok(Packet::ConnectAccept),
            tag::REJECT => Ok(Packet::Reject {
                reason: r.get_string()?,
            }),
            tag::IDENTITY_CHALLENGE => Ok(Packet::IdentityChallenge),
            tag::IDENTITY_REPLY => Ok(Packet::IdentityReply {
                guid: r.get_guid()?,
            }),
            tag::SET_STRINGS => {
                let count = r.get_var_u32()?;
                let mut strings = Vec::with_capacity(count.min(4096) as usize);
                for _ in 0..count {
                    strings.push(r.get_string()?);
                }
                Ok(Packet::SetStrings { strings })
            }
            tag::ADD_STRING => Ok(Packet::AddString {
                code: r.get_var_u32()?,
                string: r.get_string()?,
            }),
            tag::GAME => Ok(Packet::Game {
                payload: r.get_bytes()?,
            }),
            tag::DISCONNECT => Ok(Packet::Disconnect {
                reason: r.get_string()?,
            }),
            tag::ACK => Ok(Packet::Ack {
                seq: r.get_var_u32()?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    /// Convenience for `AddString` from table types.
    pub fn add_string(code: HpidCode, string: String) -> Packet {
        Packet::AddString {
            code: code.as_u32(),
            string,
        }
    }
}

/// Encodes a complete datagram. `seq` must be `Some` exactly when an ack is
/// wanted for this frame.
pub fn encode_frame(packet: &Packet, seq: Option<u32>) -> Bytes {
    let mut w = PacketWriter::new();
    match seq {
        Some(seq) => {
            w.put_u8(FrameFlags::ACK_REQUESTED.bits());
            w.put_var_u32(seq);
        }
        None => w.put_u8(FrameFlags::empty().bits()),
    }
    packet.encode(&mut w);
    w.freeze()
}

/// Decodes a complete datagram into its ack request (if any) and packet.
pub fn decode_frame(buf: Bytes) -> Result<(Option<u32>, Packet), DecodeError> {
    let mut r = PacketReader::new(buf);
    let raw = r.get_u8()?;
    let flags = FrameFlags::from_bits(raw).ok_or(DecodeError::ReservedFlags(raw))?;
    let seq = if flags.contains(FrameFlags::ACK_REQUESTED) {
        Some(r.get_var_u32()?)
    } else {
        None
    };
    let packet = Packet::decode(&mut r)?;
    Ok((seq, packet))
}
