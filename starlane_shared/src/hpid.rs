//! Dynamic string interning for the wire protocol.
//!
//! Frequently repeated identifiers (asset names, region nicknames, hardpoint
//! names) travel as small integer codes instead of raw text. The server-side
//! [`HpidTable`] is process-wide and authoritative: codes are assigned once,
//! grow monotonically from 1, and are never removed or renumbered for the
//! lifetime of the process.
//!
//! Synchronization contract: a freshly authenticated peer receives the full
//! table (ordered by code) before any other session traffic; afterwards each
//! new registration is broadcast as an incremental addition carrying its
//! assigned code. The receive side ([`HpidReader`]) therefore only ever
//! learns codes through `set_strings`/`add_string` and rejects anything it
//! has not been sent.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// An interned string code. Zero is reserved and never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HpidCode(u32);

impl HpidCode {
    pub fn from_u32(v: u32) -> Self {
        HpidCode(v)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HpidError {
    #[error("string code {0} has not been received")]
    UnknownCode(u32),
    #[error("addition code {got} does not extend table of length {have}")]
    NonContiguous { have: u32, got: u32 },
}

#[derive(Default)]
struct TableInner {
    // Code n lives at index n - 1.
    by_code: Vec<String>,
    by_string: HashMap<String, HpidCode>,
}

/// Process-wide authoritative interning table.
///
/// Safe for concurrent registration and lookup from both the listener and
/// scheduler tasks.
#[derive(Default)]
pub struct HpidTable {
    inner: RwLock<TableInner>,
    notify: Mutex<Option<UnboundedSender<(HpidCode, String)>>>,
}

impl HpidTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the channel that receives one event per newly registered
    /// string. The transport listener consumes it to broadcast additions.
    pub fn set_notify(&self, tx: UnboundedSender<(HpidCode, String)>) {
        *self.notify.lock().expect("hpid notify poisoned") = Some(tx);
    }

    /// Returns the code for `s`, assigning the next unused one if the string
    /// is new. The "string added" event fires exactly once per new string.
    pub fn register(&self, s: &str) -> HpidCode {
        if let Some(code) = self.lookup(s) {
            return code;
        }
        let (code, fresh) = {
            let mut inner = self.inner.write().expect("hpid table poisoned");
            // Re-check: another task may have raced the same string in
            // between dropping the read lock and taking the write lock.
            if let Some(code) = inner.by_string.get(s) {
                (*code, false)
            } else {
                inner.by_code.push(s.to_owned());
                let code = HpidCode(inner.by_code.len() as u32);
                inner.by_string.insert(s.to_owned(), code);
                (code, true)
            }
        };
        if fresh {
            debug!(code = code.as_u32(), string = s, "Interned new string");
            if let Some(tx) = &*self.notify.lock().expect("hpid notify poisoned") {
                let _ = tx.send((code, s.to_owned()));
            }
        }
        code
    }

    pub fn lookup(&self, s: &str) -> Option<HpidCode> {
        self.inner
            .read()
            .expect("hpid table poisoned")
            .by_string
            .get(s)
            .copied()
    }

    /// All known strings, ordered by code, for the full-table push.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.read().expect("hpid table poisoned").by_code.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("hpid table poisoned").by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-peer receive-side mapping, populated only by table-sync packets.
#[derive(Default)]
pub struct HpidReader {
    by_code: Vec<String>,
}

impl HpidReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole table from a full snapshot.
    pub fn set_strings(&mut self, strings: Vec<String>) {
        self.by_code = strings;
    }

    /// Applies one incremental addition. Additions carry their assigned code
    /// so a redundant delivery (snapshot already contained it) is ignored
    /// instead of shifting every later code.
    pub fn add_string(&mut self, code: HpidCode, s: String) -> Result<(), HpidError> {
        let have = self.by_code.len() as u32;
        if code.as_u32() <= have {
            return Ok(());
        }
        if code.as_u32() != have + 1 {
            return Err(HpidError::NonContiguous {
                have,
                got: code.as_u32(),
            });
        }
        self.by_code.push(s);
        Ok(())
    }

    /// Resolves a received code. A code never sent to this peer is a
    /// protocol violation; the message must be rejected, not guessed at.
    pub fn resolve(&self, code: HpidCode) -> Result<&str, HpidError> {
        let idx = code
            .as_u32()
            .checked_sub(1)
            .ok_or(HpidError::UnknownCode(0))? as usize;
        self.by_code
            .get(idx)
            .map(String::as_str)
            .ok_or(HpidError::UnknownCode(code.as_u32()))
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
