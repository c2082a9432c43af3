// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Minimal in-memory [`ByteFile`] used by this crate's own unit tests. The
//! concrete backends (local file, memory map, remote range cache) live in
//! the `picklekv` crate and get their own integration tests there; this one
//! only needs to exercise frame layout logic in isolation.

use crate::byte_file::ByteFile;
use crate::error::Result;

pub struct VecByteFile(pub Vec<u8>);

impl VecByteFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl ByteFile for VecByteFile {
    fn len(&self) -> Result<u64> {
        Ok(self.0.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > self.0.len() {
            return Err(crate::error::StoreError::invalid_format("short read past end of file"));
        }
        buf.copy_from_slice(&self.0[offset..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > self.0.len() {
            self.0.resize(end, 0);
        }
        self.0[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.0.resize(len as usize, 0);
        Ok(())
    }
}
