// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Terminator
//!
//! The fixed [`Header`](crate::header::Header) frame leaves a `MARK` opcode
//! dangling so the key/value pairs that follow can be pushed directly onto
//! the pickle machine's stack. The terminator is what closes that off: a
//! `FRAME <2> DICT STOP` written immediately after the last entry, turning
//! everything pushed since the header's `MARK` into a single dict and
//! ending the stream.
//!
//! Every mutation (insert, tombstone, vacuum, conversion) ends by moving the
//! terminator to the new end of live data — it is never left in place while
//! an entry is appended past it.

use crate::byte_file::ByteFile;
use crate::error::{Result, StoreError};
use crate::opcode;

/// Writes the terminator at `offset`, truncating the file to exactly
/// `offset + TERMINATOR_LEN` in the process.
pub fn write(file: &mut impl ByteFile, offset: u64) -> Result<()> {
    file.set_len(offset + opcode::TERMINATOR_LEN)?;
    file.write_at(offset, &opcode::TERMINATOR_DATA)
}

/// Confirms a terminator sits at `offset`.
pub fn verify(file: &impl ByteFile, offset: u64) -> Result<()> {
    let len = file.len()?;
    if offset + opcode::TERMINATOR_LEN > len {
        return Err(StoreError::invalid_format("file too short to hold terminator"));
    }
    let mut buf = [0u8; opcode::TERMINATOR_LEN as usize];
    file.read_at(offset, &mut buf)?;
    if buf != opcode::TERMINATOR_DATA {
        return Err(StoreError::invalid_format("terminator bytes do not match expected DICT STOP frame"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::test_support::VecByteFile;

    #[test]
    fn writes_and_verifies_at_header_boundary() {
        let h = Header::new(1);
        let mut f = VecByteFile::new(h.to_bytes().to_vec());
        let offset = f.0.len() as u64;
        write(&mut f, offset).unwrap();
        verify(&f, offset).unwrap();
        assert_eq!(f.0.len() as u64, offset + opcode::TERMINATOR_LEN);
    }

    #[test]
    fn rejects_garbage() {
        let f = VecByteFile::new(vec![0u8; opcode::TERMINATOR_LEN as usize]);
        assert!(verify(&f, 0).is_err());
    }
}
