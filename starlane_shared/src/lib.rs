//! `starlane_shared`
//!
//! Protocol-level libraries shared by the server and any client.
//!
//! Design goals:
//! - Compact, explicit wire encoding; decode failures are peer-scoped values.
//! - Pure, socket-free session decision logic.
//! - Traits at the external seams (login service) for dependency injection.
//! - No `unsafe`.

pub mod auth;
pub mod codec;
pub mod config;
pub mod guid;
pub mod hpid;
pub mod packet;
pub mod session;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::*;
    pub use crate::config::*;
    pub use crate::guid::*;
    pub use crate::hpid::*;
    pub use crate::packet::*;
    pub use crate::session::*;
}
