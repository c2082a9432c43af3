// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Entry
//!
//! One key/value pair on disk is a single pickle frame:
//!
//! ```text
//! FRAME <length>
//! SHORT_BINUNICODE <key_len> <key bytes>
//! <<< codec payload >>>
//! BININT <max memo index> POP
//! NEWTRUE|POP POP
//! ```
//!
//! Two things make this format's tombstone-and-reclaim story cheap:
//!
//! - The final two bytes are either `NEWTRUE POP` (push-then-discard: a
//!   structural no-op that leaves the key and value sitting on the pickle
//!   machine's stack for the eventual `DICT`/`SETITEMS`) or `POP POP`
//!   (discard the value, then discard the key). Both opcodes are exactly
//!   one byte, so deleting a key is a single-byte overwrite that changes
//!   nothing about the frame's length or the bytes around it.
//! - The max memo index used inside the payload is cached right after it,
//!   so a writer picking the next free memo slot for a new entry never has
//!   to re-parse every payload that came before it — it only has to look at
//!   this one stored integer per entry.
//!
//! [`Entry`] models the two lifecycle states a key/value pair can be in: a
//! [`Entry::Draft`] assembled in memory before anything has touched the
//! file, and an [`Entry::OnDisk`] handle describing where a materialized
//! entry lives. There is deliberately no third "dirty/cached" state — once
//! materialized, an entry's bytes are always read back from the file.

use crate::byte_file::ByteFile;
use crate::error::{Result, StoreError};
use crate::opcode;

/// Fixed framing overhead around `key_len + data_len`: `SHORT_BINUNICODE`
/// opcode + 1-byte length (2) + `BININT <memomaxidx> POP` (6) + valid byte +
/// trailing `POP` (2).
const FRAME_OVERHEAD: u64 = 10;

/// A key/value pair, either drafted in memory or resolved to its on-disk
/// location.
#[derive(Debug, Clone)]
pub enum Entry {
    Draft {
        key: String,
        payload: Vec<u8>,
        memomaxidx: u32,
        valid: bool,
    },
    OnDisk {
        offset: u64,
        frame_length: u64,
    },
}

impl Entry {
    /// Builds a new, valid entry ready to be materialized.
    pub fn draft(key: String, payload: Vec<u8>, memomaxidx: u32) -> Result<Self> {
        if key.as_bytes().len() > u8::MAX as usize {
            return Err(StoreError::invalid_argument("key must encode to at most 255 bytes"));
        }
        Ok(Entry::Draft { key, payload, memomaxidx, valid: true })
    }

    /// Total on-disk length this entry occupies, including its `FRAME`
    /// header.
    pub fn len(&self) -> u64 {
        match self {
            Entry::Draft { key, payload, .. } => {
                9 + key.as_bytes().len() as u64 + payload.len() as u64 + FRAME_OVERHEAD
            }
            Entry::OnDisk { frame_length, .. } => 9 + frame_length,
        }
    }

    /// Byte offset one past the end of this entry. Only meaningful once
    /// materialized.
    pub fn end_offset(&self) -> Result<u64> {
        match self {
            Entry::OnDisk { offset, .. } => Ok(offset + self.len()),
            Entry::Draft { .. } => Err(StoreError::invalid_state("draft entry has no offset yet")),
        }
    }

    /// Parses the frame starting at `offset`, without validating the
    /// payload the codec wrote — only the envelope around it.
    pub fn read_at(file: &impl ByteFile, offset: u64) -> Result<Self> {
        let len = file.len()?;
        if offset + 10 > len {
            return Err(StoreError::invalid_format("not enough bytes left for an entry header"));
        }
        let mut head = [0u8; 10];
        file.read_at(offset, &mut head)?;
        if head[0] != opcode::FRAME {
            return Err(StoreError::invalid_format("entry does not start with FRAME"));
        }
        if head[9] != opcode::SHORT_BINUNICODE {
            return Err(StoreError::invalid_format("entry key is not SHORT_BINUNICODE"));
        }
        let frame_length = u64::from_le_bytes(head[1..9].try_into().unwrap());
        if offset + 9 + frame_length > len {
            return Err(StoreError::invalid_format("entry frame runs past end of file"));
        }
        Ok(Entry::OnDisk { offset, frame_length })
    }

    /// Byte offset this entry starts at. Only meaningful once materialized.
    pub fn offset(&self) -> Result<u64> {
        match self {
            Entry::OnDisk { offset, .. } => Ok(*offset),
            Entry::Draft { .. } => Err(StoreError::invalid_state("draft entry has no offset yet")),
        }
    }

    fn key_length(&self, file: &impl ByteFile) -> Result<u8> {
        match self {
            Entry::Draft { key, .. } => Ok(key.as_bytes().len() as u8),
            Entry::OnDisk { offset, .. } => Ok(file.read_u8(*offset + 10)?),
        }
    }

    /// Length of this entry's opaque codec payload, in bytes.
    pub fn data_length(&self, file: &impl ByteFile) -> Result<u64> {
        match self {
            Entry::Draft { payload, .. } => Ok(payload.len() as u64),
            Entry::OnDisk { frame_length, .. } => {
                let key_len = self.key_length(file)? as u64;
                Ok(frame_length - FRAME_OVERHEAD - key_len)
            }
        }
    }

    /// Byte offset of the first byte of this entry's opaque codec payload.
    pub fn data_offset(&self, file: &impl ByteFile) -> Result<u64> {
        match self {
            Entry::OnDisk { offset, .. } => Ok(offset + 11 + self.key_length(file)? as u64),
            Entry::Draft { .. } => Err(StoreError::invalid_state("draft entry has no offset yet")),
        }
    }

    /// Reads at most `max_len` bytes from the start of this entry's
    /// payload, without copying the rest.
    ///
    /// Used by the zero-copy mapped-array accessor to sniff a codec's magic
    /// and parse its fixed-size header (dtype, shape) without reading a
    /// potentially huge bulk-array payload into a `Vec` first.
    pub fn read_payload_prefix(&self, file: &impl ByteFile, max_len: usize) -> Result<Vec<u8>> {
        let data_offset = self.data_offset(file)?;
        let data_len = self.data_length(file)? as usize;
        let take = data_len.min(max_len);
        let mut buf = vec![0u8; take];
        file.read_at(data_offset, &mut buf)?;
        Ok(buf)
    }

    fn valid_offset(&self) -> Result<u64> {
        match self {
            Entry::OnDisk { offset, frame_length } => Ok(offset + 9 + frame_length - 2),
            Entry::Draft { .. } => Err(StoreError::invalid_state("draft entry has no offset yet")),
        }
    }

    fn memomaxidx_offset(&self) -> Result<u64> {
        match self {
            Entry::OnDisk { offset, frame_length } => Ok(offset + 9 + frame_length - 7),
            Entry::Draft { .. } => Err(StoreError::invalid_state("draft entry has no offset yet")),
        }
    }

    pub fn key(&self, file: &impl ByteFile) -> Result<String> {
        match self {
            Entry::Draft { key, .. } => Ok(key.clone()),
            Entry::OnDisk { offset, .. } => {
                let key_len = self.key_length(file)? as usize;
                let mut buf = vec![0u8; key_len];
                file.read_at(*offset + 11, &mut buf)?;
                String::from_utf8(buf).map_err(|e| StoreError::invalid_format(format!("key is not valid utf8: {e}")))
            }
        }
    }

    pub fn payload(&self, file: &impl ByteFile) -> Result<Vec<u8>> {
        match self {
            Entry::Draft { payload, .. } => Ok(payload.clone()),
            Entry::OnDisk { .. } => {
                let data_offset = self.data_offset(file)?;
                let data_len = self.data_length(file)? as usize;
                let mut buf = vec![0u8; data_len];
                file.read_at(data_offset, &mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn memomaxidx(&self, file: &impl ByteFile) -> Result<u32> {
        match self {
            Entry::Draft { memomaxidx, .. } => Ok(*memomaxidx),
            Entry::OnDisk { .. } => {
                let mut buf = [0u8; 4];
                file.read_at(self.memomaxidx_offset()?, &mut buf)?;
                Ok(u32::from_le_bytes(buf))
            }
        }
    }

    pub fn valid(&self, file: &impl ByteFile) -> Result<bool> {
        match self {
            Entry::Draft { valid, .. } => Ok(*valid),
            Entry::OnDisk { .. } => Ok(file.read_u8(self.valid_offset()?)? == opcode::NEWTRUE),
        }
    }

    /// Flips the single tombstone byte in place. No-op on the frame's
    /// length or anything around it.
    pub fn set_valid(&self, file: &mut impl ByteFile, valid: bool) -> Result<()> {
        let offset = self.valid_offset()?;
        file.write_u8(offset, if valid { opcode::NEWTRUE } else { opcode::POP })
    }

    /// Writes a [`Entry::Draft`] at `offset`, returning the resulting
    /// [`Entry::OnDisk`] handle. Errors if called on an entry that is
    /// already materialized.
    pub fn materialize(self, file: &mut impl ByteFile, offset: u64) -> Result<Entry> {
        let Entry::Draft { key, payload, memomaxidx, valid } = self else {
            return Err(StoreError::invalid_state("entry is already materialized"));
        };
        let key_bytes = key.as_bytes();
        let frame_length = key_bytes.len() as u64 + payload.len() as u64 + FRAME_OVERHEAD;

        let mut buf = Vec::with_capacity((9 + frame_length) as usize);
        buf.push(opcode::FRAME);
        buf.extend_from_slice(&frame_length.to_le_bytes());
        buf.push(opcode::SHORT_BINUNICODE);
        buf.push(key_bytes.len() as u8);
        buf.extend_from_slice(key_bytes);
        buf.extend_from_slice(&payload);
        buf.push(opcode::BININT);
        buf.extend_from_slice(&memomaxidx.to_le_bytes());
        buf.push(opcode::POP);
        if valid {
            buf.push(opcode::NEWTRUE);
        } else {
            buf.push(opcode::POP);
        }
        buf.push(opcode::POP);

        file.write_at(offset, &buf)?;
        Ok(Entry::OnDisk { offset, frame_length })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::test_support::VecByteFile;

    fn store_with_one_entry(key: &str, payload: &[u8]) -> (VecByteFile, Entry) {
        let header = Header::new(1);
        let mut f = VecByteFile::new(header.to_bytes().to_vec());
        let offset = f.0.len() as u64;
        let draft = Entry::draft(key.to_string(), payload.to_vec(), 0).unwrap();
        let on_disk = draft.materialize(&mut f, offset).unwrap();
        (f, on_disk)
    }

    #[test]
    fn round_trips_key_and_payload() {
        let (f, entry) = store_with_one_entry("hello", b"world");
        assert_eq!(entry.key(&f).unwrap(), "hello");
        assert_eq!(entry.payload(&f).unwrap(), b"world");
        assert!(entry.valid(&f).unwrap());
    }

    #[test]
    fn reparses_from_offset() {
        let (f, entry) = store_with_one_entry("k", b"v");
        let offset = match entry {
            Entry::OnDisk { offset, .. } => offset,
            _ => unreachable!(),
        };
        let reparsed = Entry::read_at(&f, offset).unwrap();
        assert_eq!(reparsed.key(&f).unwrap(), "k");
        assert_eq!(reparsed.payload(&f).unwrap(), b"v");
    }

    #[test]
    fn tombstoning_flips_a_single_byte_without_moving_anything() {
        let (mut f, entry) = store_with_one_entry("k", b"v");
        let before = f.0.clone();
        entry.set_valid(&mut f, false).unwrap();
        assert!(!entry.valid(&f).unwrap());
        assert_eq!(f.0.len(), before.len());
        let diff: Vec<usize> = (0..before.len()).filter(|&i| before[i] != f.0[i]).collect();
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn rejects_oversized_key() {
        let key = "x".repeat(256);
        assert!(Entry::draft(key, vec![], 0).is_err());
    }
}
