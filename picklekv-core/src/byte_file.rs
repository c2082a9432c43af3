// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # ByteFile
//!
//! [`Header`](crate::header::Header), [`Terminator`](crate::terminator::Terminator),
//! and [`Entry`](crate::entry::Entry) all operate on a byte-addressable
//! container rather than on `std::fs::File` directly, so that the exact same
//! frame-layout logic runs against a local file, a memory-mapped region, or a
//! remote block cache without being copy-pasted three times. `ByteFile` is
//! that seam.
//!
//! The trait is deliberately narrow: positioned reads and writes, a length,
//! and truncation. Locking, revision bookkeeping, and codec dispatch all live
//! a layer up, in the concrete `Store`.

use crate::error::Result;

/// A byte-addressable container a store can be laid out on top of.
///
/// Implementations live in the `picklekv` crate (`LocalByteFile` over
/// `std::fs::File`, `RemoteByteFile` over a block-aligned HTTP range cache).
/// This crate only needs the contract.
pub trait ByteFile {
    /// Current length of the container in bytes.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    ///
    /// Implementations must fail rather than short-read: a short read is
    /// always a sign of a truncated or corrupt file, not something worth
    /// reporting as partial success.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` at `offset`, extending the container if `offset + buf.len()`
    /// is past the current end.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Truncate (or, if `len` is past the current end, extend with zero
    /// bytes) to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Flush any buffering down to durable storage. A no-op for containers
    /// with none (e.g. a pure in-memory or read-only remote cache).
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read a single byte at `offset`. Convenience built on [`Self::read_at`]
    /// for the one-byte tombstone-flip checks used throughout `entry`.
    fn read_u8(&self, offset: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_at(offset, &mut b)?;
        Ok(b[0])
    }

    /// Write a single byte at `offset`.
    fn write_u8(&mut self, offset: u64, value: u8) -> Result<()> {
        self.write_at(offset, &[value])
    }

    /// Attempts to take an advisory whole-container exclusive lock.
    ///
    /// Returns `Ok(true)` if a real OS-level lock was acquired, `Ok(false)`
    /// if this backing has nothing OS-lockable to offer (the default, and
    /// what a pure in-memory or read-only remote container reports) — the
    /// caller falls back to per-process-only locking rather than treating
    /// that as an error. A backend with a real file descriptor overrides
    /// this to use a platform advisory lock.
    fn try_lock_exclusive(&self) -> Result<bool> {
        Ok(false)
    }

    /// Releases a lock previously acquired via [`Self::try_lock_exclusive`].
    /// A no-op for backends that never acquired one.
    fn unlock(&self) -> Result<()> {
        Ok(())
    }
}
