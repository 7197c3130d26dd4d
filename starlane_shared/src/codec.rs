//! Binary packet reader/writer.
//!
//! Goals:
//! - Compact wire encoding: variable-length integers, length-prefixed UTF-8.
//! - Explicit and versionable; no serde on the datagram path.
//! - Decode failures are values, never panics — a malformed datagram must
//!   only ever cost the peer that sent it.
//!
//! Multi-byte primitives are little-endian. Variable-length integers are
//! LEB128: seven payload bits per byte, low bits first, high bit is the
//! continuation flag.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::guid::PlayerGuid;
use crate::hpid::{HpidCode, HpidReader, HpidTable};

/// Errors produced while decoding a datagram payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of packet")]
    UnexpectedEnd,
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
    #[error("varint longer than encodable range")]
    VarintOverflow,
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("reserved frame flags 0x{0:02x}")]
    ReservedFlags(u8),
    #[error("string code {0} not present in table")]
    UnknownStringCode(u32),
    #[error("declared length {0} exceeds remaining payload")]
    LengthOverrun(usize),
}

/// Growable packet writer.
#[derive(Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_u128(&mut self, v: u128) {
        self.buf.put_u128_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    pub fn put_var_u32(&mut self, v: u32) {
        self.put_var_u64(u64::from(v));
    }

    pub fn put_var_u64(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.put_u8(byte);
                return;
            }
            self.buf.put_u8(byte | 0x80);
        }
    }

    pub fn put_string(&mut self, s: &str) {
        self.put_var_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_var_u32(b.len() as u32);
        self.buf.put_slice(b);
    }

    pub fn put_guid(&mut self, g: PlayerGuid) {
        self.put_u128(g.as_u128());
    }

    /// Writes a string as its interned table code, registering it if new.
    pub fn put_hpid(&mut self, s: &str, table: &HpidTable) {
        let code = table.register(s);
        self.put_var_u32(code.as_u32());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor-style reader over a received datagram.
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn get_u128(&mut self) -> Result<u128, DecodeError> {
        self.need(16)?;
        Ok(self.buf.get_u128_le())
    }

    pub fn get_f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_f64(&mut self) -> Result<f64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_f64_le())
    }

    pub fn get_var_u32(&mut self) -> Result<u32, DecodeError> {
        let v = self.get_var_u64()?;
        u32::try_from(v).map_err(|_| DecodeError::VarintOverflow)
    }

    pub fn get_var_u64(&mut self) -> Result<u64, DecodeError> {
        let mut v = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.get_u8()?;
            v |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(DecodeError::VarintOverflow)
    }

    pub fn get_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.get_len_prefixed()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        Ok(self.get_len_prefixed()?.to_vec())
    }

    pub fn get_guid(&mut self) -> Result<PlayerGuid, DecodeError> {
        Ok(PlayerGuid::from_u128(self.get_u128()?))
    }

    /// Reads an interned string code and resolves it against the peer's
    /// received table. A code the peer was never sent is a protocol
    /// violation, not a guess.
    pub fn get_hpid(&mut self, reader: &HpidReader) -> Result<String, DecodeError> {
        let code = HpidCode::from_u32(self.get_var_u32()?);
        reader
            .resolve(code)
            .map(str::to_owned)
            .map_err(|_| DecodeError::UnknownStringCode(code.as_u32()))
    }

    fn get_len_prefixed(&mut self) -> Result<Bytes, DecodeError> {
        let len = self.get_var_u32()? as usize;
        if len > self.buf.remaining() {
            return Err(DecodeError::LengthOverrun(len));
        }
        Ok(self.buf.split_to(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_of(w: PacketWriter) -> PacketReader {
        PacketReader::new(w.freeze())
    }

    #[test]
    fn primitive_roundtrip() {
        let mut w = PacketWriter::new();
        w.put_u8(0xab);
        w.put_u16(0x1234);
        w.put_u32(0xdead_beef);
        w.put_u64(u64::MAX - 1);
        w.put_f32(1.5);
        w.put_f64(-2.25);
        let mut r = reader_of(w);
        assert_eq!(r.get_u8().unwrap(), 0xab);
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.get_f32().unwrap(), 1.5);
        assert_eq!(r.get_f64().unwrap(), -2.25);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn varint_edge_values() {
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut w = PacketWriter::new();
            w.put_var_u64(v);
            assert_eq!(reader_of(w).get_var_u64().unwrap(), v);
        }
        // Single-byte encoding holds up to 127.
        let mut w = PacketWriter::new();
        w.put_var_u64(127);
        assert_eq!(w.len(), 1);
        let mut w = PacketWriter::new();
        w.put_var_u64(128);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn var_u32_rejects_oversized() {
        let mut w = PacketWriter::new();
        w.put_var_u64(u64::from(u32::MAX) + 1);
        assert_eq!(
            reader_of(w).get_var_u32().unwrap_err(),
            DecodeError::VarintOverflow
        );
    }

    #[test]
    fn string_roundtrip() {
        let mut w = PacketWriter::new();
        w.put_string("li01_to_li02_holegate");
        w.put_string("");
        let mut r = reader_of(w);
        assert_eq!(r.get_string().unwrap(), "li01_to_li02_holegate");
        assert_eq!(r.get_string().unwrap(), "");
    }

    #[test]
    fn string_length_overrun_detected() {
        let mut w = PacketWriter::new();
        w.put_var_u32(200);
        w.put_u8(b'x');
        assert!(matches!(
            reader_of(w).get_string().unwrap_err(),
            DecodeError::LengthOverrun(200)
        ));
    }

    #[test]
    fn truncated_primitive_is_unexpected_end() {
        let mut w = PacketWriter::new();
        w.put_u8(1);
        let mut r = reader_of(w);
        assert_eq!(r.get_u32().unwrap_err(), DecodeError::UnexpectedEnd);
    }

    #[test]
    fn hpid_write_read_through_tables() {
        let table = HpidTable::new();
        let mut w = PacketWriter::new();
        w.put_hpid("rh02_base_01", &table);

        let mut peer = HpidReader::new();
        peer.set_strings(table.snapshot());
        let got = reader_of(w).get_hpid(&peer).unwrap();
        assert_eq!(got, "rh02_base_01");
    }

    #[test]
    fn hpid_unknown_code_rejected() {
        let table = HpidTable::new();
        let mut w = PacketWriter::new();
        w.put_hpid("never_synced", &table);

        let peer = HpidReader::new();
        assert!(matches!(
            reader_of(w).get_hpid(&peer).unwrap_err(),
            DecodeError::UnknownStringCode(_)
        ));
    }
}
