// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Header
//!
//! The first [`HEADER_LEN`] bytes of every store file are a fixed, single
//! frame holding a format version and a revision counter:
//!
//! ```text
//! PROTO 4  FRAME <13>  BININT <version> POP BININT <revision> POP MARK
//! ```
//!
//! `MARK` left dangling at the end is not a mistake — it's what lets the
//! very next opcode in the stream be the start of a `DICT` mapping's
//! key/value pairs, so the header frame and the first real entry compose
//! into one syntactically valid pickle stream. A reader that only knows
//! protocol 4 and has never heard of this crate still sees `{version:
//! revision}` followed by the store's keys and values as one big dict
//! literal.
//!
//! The revision counter is bumped on every mutation ([`crate`]-level
//! callers are responsible for that; this module only reads and writes the
//! field) and is the cheap cross-process check a cache uses to know its
//! index is stale.

use crate::byte_file::ByteFile;
use crate::error::{Result, StoreError};
use crate::opcode;

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub revision: u32,
}

impl Header {
    pub fn new(version: u32) -> Self {
        Self { version, revision: 0 }
    }

    /// Builds the fixed-size on-disk byte representation.
    pub fn to_bytes(self) -> [u8; opcode::HEADER_LEN as usize] {
        let mut buf = [0u8; opcode::HEADER_LEN as usize];
        buf[0] = opcode::PROTO;
        buf[1] = 4;
        buf[2] = opcode::FRAME;
        buf[3..11].copy_from_slice(&opcode::HEADER_FRAME_CONTENT_LEN.to_le_bytes());
        buf[11] = opcode::BININT;
        buf[12..16].copy_from_slice(&self.version.to_le_bytes());
        buf[16] = opcode::POP;
        buf[17] = opcode::BININT;
        buf[18..22].copy_from_slice(&self.revision.to_le_bytes());
        buf[22] = opcode::POP;
        buf[23] = opcode::MARK;
        buf
    }

    /// Reads and validates the header at the start of `file`.
    pub fn read(file: &impl ByteFile) -> Result<Self> {
        Self::read_at(file, 0)
    }

    /// Reads and validates a header starting at `at`, rather than offset 0.
    ///
    /// Used only for the transient "shadow" header file conversion installs
    /// partway through a file while the real header still lives at offset 0
    /// (or doesn't exist yet) — see [`crate`]-level conversion notes.
    pub fn read_at(file: &impl ByteFile, at: u64) -> Result<Self> {
        let len = file.len()?;
        if at + opcode::HEADER_LEN > len {
            return Err(StoreError::invalid_format("file shorter than the fixed header"));
        }
        let mut buf = [0u8; opcode::HEADER_LEN as usize];
        file.read_at(at, &mut buf)?;

        if buf[0] != opcode::PROTO || buf[1] != 4 {
            return Err(StoreError::invalid_format("missing protocol-4 PROTO opcode"));
        }
        if buf[2] != opcode::FRAME {
            return Err(StoreError::invalid_format("missing header FRAME opcode"));
        }
        let frame_len = u64::from_le_bytes(buf[3..11].try_into().unwrap());
        if frame_len != opcode::HEADER_FRAME_CONTENT_LEN {
            return Err(StoreError::invalid_format("unexpected header frame length"));
        }
        if buf[11] != opcode::BININT || buf[16] != opcode::POP {
            return Err(StoreError::invalid_format("malformed header version field"));
        }
        if buf[17] != opcode::BININT || buf[22] != opcode::POP {
            return Err(StoreError::invalid_format("malformed header revision field"));
        }
        if buf[23] != opcode::MARK {
            return Err(StoreError::invalid_format("header frame missing trailing MARK"));
        }

        let version = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let revision = u32::from_le_bytes(buf[18..22].try_into().unwrap());
        Ok(Header { version, revision })
    }

    /// Writes this header at offset 0, replacing whatever was there.
    pub fn write(self, file: &mut impl ByteFile) -> Result<()> {
        self.write_at(file, 0)
    }

    /// Writes this header starting at `at` rather than offset 0.
    pub fn write_at(self, file: &mut impl ByteFile, at: u64) -> Result<()> {
        file.write_at(at, &self.to_bytes())
    }

    /// Rewrites just the 4-byte revision field, leaving the rest of the
    /// frame untouched. This is the single write every mutating operation
    /// ends with.
    pub fn write_revision(file: &mut impl ByteFile, revision: u32) -> Result<()> {
        Self::write_revision_at(file, 0, revision)
    }

    pub fn write_revision_at(file: &mut impl ByteFile, at: u64, revision: u32) -> Result<()> {
        file.write_at(at + opcode::HEADER_REVISION_OFFSET as u64, &revision.to_le_bytes())
    }

    pub fn read_revision(file: &impl ByteFile) -> Result<u32> {
        Self::read_revision_at(file, 0)
    }

    pub fn read_revision_at(file: &impl ByteFile, at: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        file.read_at(at + opcode::HEADER_REVISION_OFFSET as u64, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::VecByteFile;

    #[test]
    fn round_trips_through_bytes() {
        let h = Header { version: 1, revision: 7 };
        let mut f = VecByteFile::new(h.to_bytes().to_vec());
        let parsed = Header::read(&f).unwrap();
        assert_eq!(parsed, h);

        Header::write_revision(&mut f, 8).unwrap();
        assert_eq!(Header::read_revision(&f).unwrap(), 8);
    }

    #[test]
    fn rejects_truncated_file() {
        let f = VecByteFile::new(vec![opcode::PROTO, 4]);
        assert!(Header::read(&f).is_err());
    }
}
