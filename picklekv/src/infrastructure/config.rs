// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Configuration
//!
//! Tunables for the concrete backends in [`crate::infrastructure`]. Every
//! field has a sensible default, so the common case (`Store::open(path)`)
//! never has to mention this module.

/// Options controlling how a [`crate::infrastructure::store::Store`]
/// accesses its backing file.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Open the file read-only; mutating operations return
    /// [`picklekv_core::StoreError::NotWritable`].
    pub read_only: bool,

    /// Block size used by [`crate::infrastructure::byte_file::remote`]'s
    /// range-request cache, in bytes.
    pub remote_block_size: u64,

    /// Number of blocks the remote cache keeps resident before evicting the
    /// least recently used one.
    pub remote_cache_blocks: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            remote_block_size: 1024 * 1024,
            remote_cache_blocks: 64,
        }
    }
}

impl StoreConfig {
    pub fn read_only() -> Self {
        Self { read_only: true, ..Self::default() }
    }
}
