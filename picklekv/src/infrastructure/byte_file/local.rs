// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # LocalByteFile
//!
//! A [`picklekv_core::ByteFile`] over a plain `std::fs::File`, using
//! positioned reads and writes (`pread`/`pwrite` on unix, `seek_read`/
//! `seek_write` on windows) so concurrent readers never have to fight over
//! the file's shared cursor.
//!
//! Whole-file access for bulk payloads (the zero-copy array codec) goes
//! through a separate `memmap2::Mmap` taken directly against the same
//! `File`, not through this trait — see
//! [`crate::infrastructure::codecs::bulk_array`].

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt as WindowsFileExt;

use std::fs::File;
use std::path::Path;

use fs2::FileExt as LockFileExt;
use picklekv_core::error::{Result, StoreError};
use picklekv_core::ByteFile;

pub struct LocalByteFile {
    file: File,
}

impl LocalByteFile {
    pub fn open(file: File) -> Self {
        Self { file }
    }

    pub fn open_path(path: impl AsRef<Path>, writable: bool) -> Result<Self> {
        let file = File::options().read(true).write(writable).create(writable).open(path)?;
        Ok(Self { file })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.file.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(StoreError::invalid_format("short read past end of file"));
            }
            read += n;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.file.seek_write(&buf[written..], offset + written as u64)?;
            written += n;
        }
        Ok(())
    }
}

impl ByteFile for LocalByteFile {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_exact_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let needed = offset + buf.len() as u64;
        if needed > self.len()? {
            self.file.set_len(needed)?;
        }
        self.write_all_at(offset, buf)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// `flock`-style (POSIX) / `LockFileEx`-style (Windows) advisory whole-
    /// file exclusive lock via `fs2`. Blocks until acquired; an error here
    /// (e.g. the file lives on a filesystem that doesn't support locking)
    /// is the `Err` case the store design downgrades to a warning rather
    /// than surfacing as a fatal error.
    fn try_lock_exclusive(&self) -> Result<bool> {
        LockFileExt::lock_exclusive(&self.file)?;
        Ok(true)
    }

    fn unlock(&self) -> Result<()> {
        LockFileExt::unlock(&self.file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn grows_on_write_past_end() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = LocalByteFile::open_path(tmp.path(), true).unwrap();
        f.write_at(10, b"hi").unwrap();
        assert_eq!(f.len().unwrap(), 12);
        let mut buf = [0u8; 2];
        f.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn set_len_truncates() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = LocalByteFile::open_path(tmp.path(), true).unwrap();
        f.write_at(0, b"0123456789").unwrap();
        f.set_len(4).unwrap();
        assert_eq!(f.len().unwrap(), 4);
    }
}
