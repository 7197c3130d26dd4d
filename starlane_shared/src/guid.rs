//! Player identity handling.
//!
//! A [`PlayerGuid`] is the stable 128-bit identity a peer authenticates as,
//! either self-generated (no login service configured) or returned by the
//! login service after token verification. The zero value is the invalid
//! sentinel and is never a legal identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 128-bit player identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerGuid(u128);

impl PlayerGuid {
    /// The invalid sentinel. Authentication replies carrying it are rejected.
    pub const ZERO: PlayerGuid = PlayerGuid(0);

    pub fn from_u128(v: u128) -> Self {
        PlayerGuid(v)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Parses the 32-hex-digit form used by the login service.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(PlayerGuid)
    }
}

impl fmt::Display for PlayerGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
