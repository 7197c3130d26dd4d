//! `starlane_server`
//!
//! The authoritative server core:
//! - UDP transport listener with handshake/auth demultiplexing
//! - Connected-player registry with snapshot iteration
//! - Fixed-timestep region scheduler with busy/idle rate adaptation
//!
//! Concurrency model:
//! - Two long-lived tasks (listener, scheduler) on the multi-threaded runtime
//! - Cross-task traffic over mpsc queues, consumed at defined points
//! - External auth round-trips on auxiliary tasks, re-entering via the
//!   listener's event queue

pub mod acks;
pub mod listener;
pub mod perf;
pub mod player;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod world;

pub use server::GameServer;
