// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Store
//!
//! The public entry point: open or create a file, get/put/delete keys,
//! vacuum reclaimed space, and repair a truncated file. Everything else in
//! this crate exists to serve this one type.
//!
//! `Store<B>` is generic over [`ByteFile`] so the exact same logic runs
//! against a local file or a read-only HTTP range cache; [`Store::open`]
//! and [`Store::open_remote`] are the two concrete entry points, and
//! `impl Store<LocalByteFile>` carries the one operation —
//! [`Store::get_mapped_array`] — that only makes sense with a real memory
//! map behind it.
//!
//! Every public method here follows the same shape: acquire the re-entrant
//! lock, do the work against an in-memory `Cache` that gets rebuilt lazily
//! when the on-disk revision has moved, release the lock. See
//! [`Store::acquire`]/[`Store::release`] for the locking discipline itself.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, warn};

use picklekv_core::byte_file::ByteFile;
use picklekv_core::codec::{self, Codec};
use picklekv_core::entry::Entry;
use picklekv_core::error::{Result, StoreError};
use picklekv_core::header::{Header, CURRENT_VERSION};
use picklekv_core::opcode;
use picklekv_core::terminator;
use picklekv_core::value::{DType, Value};

use super::byte_file::local::LocalByteFile;
use super::byte_file::remote::RemoteByteFile;
use super::cache::Cache;
use super::codecs::{bulk_array, decode_stream, default_codecs};
use super::config::StoreConfig;

/// Default chunk size [`Store::vacuum`] uses when shifting live data
/// leftward, matching the design's default.
pub const DEFAULT_VACUUM_CHUNK: u64 = 1024 * 1024;

pub struct Store<B: ByteFile> {
    file: B,
    codecs: Vec<Box<dyn Codec>>,
    config: StoreConfig,
    cache: Cache,
    lock_depth: u32,
    os_locked: bool,
    revision_at_acquire: u32,
}

impl Store<LocalByteFile> {
    /// Opens or creates a store at `path`. A fresh, empty file gets a
    /// header and terminator written immediately; a file that already
    /// exists but doesn't start with a valid header is run through
    /// [`Store::convert_existing_pickle`].
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        if config.read_only && !path.exists() {
            return Err(StoreError::not_found(format!("cannot open non-existent file read-only: {}", path.display())));
        }
        let file = LocalByteFile::open_path(path, !config.read_only)?;
        Self::open_byte_file(file, config, None)
    }

    /// Like [`Self::open`] with an explicit, priority-ordered codec list
    /// instead of [`default_codecs`].
    pub fn open_with_codecs(path: impl AsRef<Path>, config: StoreConfig, codecs: Vec<Box<dyn Codec>>) -> Result<Self> {
        let path = path.as_ref();
        if config.read_only && !path.exists() {
            return Err(StoreError::not_found(format!("cannot open non-existent file read-only: {}", path.display())));
        }
        let file = LocalByteFile::open_path(path, !config.read_only)?;
        Self::open_byte_file(file, config, Some(codecs))
    }

    /// Reads a bulk-array value's payload without copying its element
    /// bytes: the returned [`MappedArray`] is a view straight into a
    /// `memmap2::Mmap` over the file's data region.
    ///
    /// Safe to use as long as no [`Store::vacuum`] runs anywhere against
    /// this file while the view is alive, no `put` truncates into the
    /// mapped range (inserts only ever append, so this is automatic), and
    /// no `fsck` truncates into it — the same shared-resource policy the
    /// store design lays out for mapped views in general.
    pub fn get_mapped_array(&mut self, key: &str) -> Result<MappedArray> {
        self.acquire();
        let result = self.get_mapped_array_locked(key);
        self.release();
        result
    }

    fn get_mapped_array_locked(&mut self, key: &str) -> Result<MappedArray> {
        self.cache.ensure_loaded(&self.file)?;
        let entry = self.cache.get_valid(key).cloned().ok_or_else(|| StoreError::key_not_found(key))?;

        let total_len = entry.data_length(&self.file)? as usize;
        let prefix_len = total_len.min(bulk_array::MAX_HEADER_LEN);
        let prefix = entry.read_payload_prefix(&self.file, prefix_len)?;
        let (dtype, shape, header_len) = bulk_array::parse_header_prefix(&prefix)?;

        let data_offset = entry.data_offset(&self.file)? + header_len as u64;
        let data_len = total_len - header_len;

        // SAFETY: the file outlives the mapping (owned by `self.file`, and
        // `MappedArray` doesn't escape it); the shared-resource policy
        // above is what keeps the backing bytes from moving underneath it.
        let mmap = unsafe { memmap2::MmapOptions::new().offset(data_offset).len(data_len).map(self.file.file())? };

        Ok(MappedArray { mmap, dtype, shape })
    }
}

impl Store<RemoteByteFile> {
    /// Opens a read-only store backed by an HTTP(S) URL fetched in
    /// block-aligned ranges. Always read-only: there is nowhere for a
    /// mutation to persist back to.
    pub fn open_remote(url: impl Into<String>, config: StoreConfig) -> Result<Self> {
        let file = RemoteByteFile::open(url, config.remote_block_size, config.remote_cache_blocks)?;
        Self::open_byte_file(file, StoreConfig { read_only: true, ..config }, None)
    }
}

impl<B: ByteFile> Store<B> {
    /// Wraps an already-constructed [`ByteFile`] in a `Store`, running
    /// conversion if the backing isn't a valid store file yet.
    pub fn open_byte_file(file: B, config: StoreConfig, codecs: Option<Vec<Box<dyn Codec>>>) -> Result<Self> {
        let mut codecs = codecs.unwrap_or_else(default_codecs);
        codecs.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let mut store = Store { file, codecs, config, cache: Cache::new(), lock_depth: 0, os_locked: false, revision_at_acquire: 0 };
        store.ensure_store_format()?;
        Ok(store)
    }

    fn ensure_store_format(&mut self) -> Result<()> {
        if self.file.is_empty()? {
            self.require_writable()?;
            let header = Header::new(CURRENT_VERSION);
            header.write(&mut self.file)?;
            terminator::write(&mut self.file, opcode::HEADER_LEN)?;
            debug!("created fresh store file");
            return Ok(());
        }

        match Header::read(&self.file) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(reason = %e, "file does not start with a valid store header, attempting conversion from a plain pickle");
                self.convert_existing_pickle()
            }
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.config.read_only {
            return Err(StoreError::NotWritable);
        }
        Ok(())
    }

    // ---- locking -----------------------------------------------------

    /// Acquires the store's re-entrant lock: the outermost call locks the
    /// underlying file (falling back to per-process-only locking, with a
    /// warning, if the backing offers nothing OS-lockable) and compares the
    /// header's revision against what this process last saw, dropping the
    /// cache on a mismatch. Nested calls just bump the depth counter.
    fn acquire(&mut self) {
        self.lock_depth += 1;
        if self.lock_depth == 1 {
            match self.file.try_lock_exclusive() {
                Ok(got) => self.os_locked = got,
                Err(e) => {
                    warn!(error = %e, "advisory lock unavailable, falling back to per-process locking only");
                    self.os_locked = false;
                }
            }

            let revision = Header::read_revision(&self.file).unwrap_or_else(|e| {
                warn!(error = %e, "could not read header revision while locking");
                self.cache.last_seen_revision().unwrap_or(0)
            });
            if self.cache.last_seen_revision() != Some(revision) {
                self.cache.clear();
            }
            self.revision_at_acquire = revision;
        }
    }

    /// Releases the lock acquired by the matching [`Self::acquire`]. On the
    /// outermost release, flushes the file if the revision moved during the
    /// operation (so a concurrent reader's next `acquire` observes it) and
    /// drops the OS-level lock if one was taken.
    fn release(&mut self) {
        if self.lock_depth == 1 {
            let revision = Header::read_revision(&self.file).unwrap_or(self.revision_at_acquire);
            self.cache.set_last_seen_revision(revision);
            if revision != self.revision_at_acquire {
                if let Err(e) = self.file.sync() {
                    warn!(error = %e, "failed to flush store file before releasing lock");
                }
            }
            if self.os_locked {
                if let Err(e) = self.file.unlock() {
                    warn!(error = %e, "failed to release advisory lock");
                }
                self.os_locked = false;
            }
        }
        self.lock_depth -= 1;
    }

    fn bump_revision(&mut self) -> Result<()> {
        let current = Header::read_revision(&self.file)?;
        Header::write_revision(&mut self.file, current.wrapping_add(1))
    }

    // ---- public operations ---------------------------------------------

    pub fn contains(&mut self, key: &str) -> bool {
        self.acquire();
        let result = self.cache.ensure_loaded(&self.file).map(|_| self.cache.contains(key)).unwrap_or(false);
        self.release();
        result
    }

    /// Set-like view of currently-valid keys. Order is unspecified.
    pub fn keys(&mut self) -> Result<HashSet<String>> {
        self.acquire();
        let result = (|| {
            self.cache.ensure_loaded(&self.file)?;
            Ok(self.cache.valid_keys().cloned().collect())
        })();
        self.release();
        result
    }

    pub fn get(&mut self, key: &str) -> Result<Value> {
        self.acquire();
        let result = self.get_locked(key);
        self.release();
        result
    }

    fn get_locked(&mut self, key: &str) -> Result<Value> {
        self.cache.ensure_loaded(&self.file)?;
        let entry = self.cache.get_valid(key).ok_or_else(|| StoreError::key_not_found(key))?.clone();
        let payload = entry.payload(&self.file)?;
        let codec = codec::select_for_decode(&self.codecs, &payload).ok_or(StoreError::NoMatchingCodec)?;
        codec.decode(&payload)
    }

    pub fn put(&mut self, key: &str, value: Value) -> Result<()> {
        self.acquire();
        let result = self.put_locked(key, value);
        self.release();
        result
    }

    fn put_locked(&mut self, key: &str, value: Value) -> Result<()> {
        self.require_writable()?;
        if key.as_bytes().len() > u8::MAX as usize {
            return Err(StoreError::invalid_argument("key must encode to at most 255 bytes"));
        }
        self.cache.ensure_loaded(&self.file)?;

        if self.cache.get_valid(key).is_some() {
            self.del_locked(key)?;
        }

        let entries_all = self.cache.entries_all().to_vec();
        let codec = codec::select_for_encode(&self.codecs, &value).ok_or(StoreError::NoMatchingCodec)?;

        let offset = entries_all
            .iter()
            .map(|e| e.end_offset())
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or(opcode::HEADER_LEN)
            .max(opcode::HEADER_LEN);
        let mut memo_start = 1u32;
        for e in &entries_all {
            memo_start = memo_start.max(e.memomaxidx(&self.file)?);
        }

        let (payload, new_memo_max) = codec.encode(&value, memo_start)?;
        let draft = Entry::draft(key.to_string(), payload, new_memo_max)?;
        let on_disk = draft.materialize(&mut self.file, offset)?;
        terminator::write(&mut self.file, on_disk.end_offset()?)?;

        self.cache.insert_live(key.to_string(), on_disk);
        self.bump_revision()?;
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> Result<()> {
        self.acquire();
        let result = self.del_locked(key);
        self.release();
        result
    }

    fn del_locked(&mut self, key: &str) -> Result<()> {
        self.require_writable()?;
        self.cache.ensure_loaded(&self.file)?;
        let entry = self.cache.remove_valid(key).ok_or_else(|| StoreError::key_not_found(key))?;
        entry.set_valid(&mut self.file, false)?;
        self.bump_revision()?;
        Ok(())
    }

    pub fn revision(&mut self) -> Result<u32> {
        self.acquire();
        let result = Header::read_revision(&self.file);
        self.release();
        result
    }

    pub fn set_revision(&mut self, revision: u32) -> Result<()> {
        self.acquire();
        let result = Header::write_revision(&mut self.file, revision);
        self.release();
        result
    }

    /// Compacts away tombstoned entries by shifting live data leftward in
    /// `chunk_size`-sized chunks, then truncating.
    ///
    /// **Precondition**: no live memory-mapped view exists over this file,
    /// in this process or any other — compaction moves the very bytes a
    /// mapped view (from [`Store::get_mapped_array`]) is reading from.
    /// There is nothing this method can check to enforce that; it's a
    /// caller obligation, same as the design it's grounded on.
    pub fn vacuum(&mut self, chunk_size: u64) -> Result<()> {
        self.acquire();
        let result = self.vacuum_locked(chunk_size);
        self.release();
        result
    }

    fn vacuum_locked(&mut self, chunk_size: u64) -> Result<()> {
        self.require_writable()?;
        self.cache.ensure_loaded(&self.file)?;
        let entries = self.cache.entries_all().to_vec();
        let file_len = self.file.len()?;

        let mut holes = Vec::new();
        for e in &entries {
            if !e.valid(&self.file)? {
                holes.push((e.offset()?, e.end_offset()?));
            }
        }

        let mut ranges = Vec::new();
        let mut prev_end = 0u64;
        for (start, end) in &holes {
            ranges.push((prev_end, *start));
            prev_end = *end;
        }
        ranges.push((prev_end, file_len));
        let ranges: Vec<(u64, u64)> = ranges.into_iter().filter(|(a, b)| a != b).collect();

        if ranges.len() <= 1 {
            debug!("vacuum: nothing to reclaim");
            return Ok(());
        }

        let chunk_size = chunk_size.max(1) as usize;
        let mut buf = vec![0u8; chunk_size];
        let mut wptr = 0u64;
        for (start, end) in ranges {
            let mut rptr = start;
            while rptr < end {
                let take = ((end - rptr) as usize).min(chunk_size);
                self.file.read_at(rptr, &mut buf[..take])?;
                self.file.write_at(wptr, &buf[..take])?;
                rptr += take as u64;
                wptr += take as u64;
            }
        }

        self.file.set_len(wptr)?;
        terminator::write(&mut self.file, wptr - opcode::TERMINATOR_LEN)?;
        self.cache.clear();

        let current = Header::read_revision(&self.file)?;
        let next = if current == 0 { 1 } else { 0 };
        Header::write_revision(&mut self.file, next)?;

        Ok(())
    }

    /// Walks frames forward from just after the header, stopping at the
    /// first frame that is incomplete or doesn't parse. Truncates the file
    /// to that point and rewrites the terminator there — this may discard
    /// the last entry if it was mid-write when the file was damaged.
    pub fn fsck(&mut self) -> Result<()> {
        self.acquire();
        let result = self.fsck_locked();
        self.release();
        result
    }

    fn fsck_locked(&mut self) -> Result<()> {
        self.require_writable()?;
        let len = self.file.len()?;
        let mut pos = opcode::HEADER_LEN;
        let mut terminator_end = None;

        loop {
            if pos + 9 > len {
                break;
            }
            let mut head = [0u8; 9];
            self.file.read_at(pos, &mut head)?;
            if head[0] != opcode::FRAME {
                break;
            }
            let frame_len = u64::from_le_bytes(head[1..9].try_into().unwrap());
            if pos + 9 + frame_len > len {
                break;
            }

            let mut first = [0u8; 1];
            self.file.read_at(pos + 9, &mut first)?;
            if first[0] == opcode::DICT {
                let mut stop = [0u8; 1];
                self.file.read_at(pos + 9 + frame_len - 1, &mut stop)?;
                if stop[0] == opcode::STOP {
                    terminator_end = Some(pos + 9 + frame_len);
                }
                break;
            }
            if first[0] != opcode::SHORT_BINUNICODE {
                break;
            }
            pos += 9 + frame_len;
        }

        match terminator_end {
            Some(end) => {
                self.file.set_len(end)?;
                terminator::write(&mut self.file, end - opcode::TERMINATOR_LEN)?;
            }
            None => {
                self.file.set_len(pos)?;
                terminator::write(&mut self.file, pos)?;
            }
        }
        self.cache.clear();
        Ok(())
    }

    // ---- conversion ------------------------------------------------

    /// A file that doesn't start with a valid store header but does
    /// contain a plain serialized mapping gets converted in place:
    ///
    /// 1. Parse the whole file as a pickle; it must decode to a dict.
    /// 2. Truncate to exactly the bytes the pickle consumed, dropping any
    ///    trailing junk.
    /// 3. Install a "shadow" header at that offset (not offset 0) and
    ///    append every key as a normal entry after it.
    /// 4. Shift the whole shadow-headed region down to offset 0, truncate,
    ///    write the real header at 0, and vacuum once.
    ///
    /// Ordering it this way means a crash before step 4 leaves the original
    /// file essentially untouched (still readable as the plain pickle it
    /// was, plus harmless trailing bytes); only a crash mid-shift is
    /// destructive, and the design this is grounded on accepts that as an
    /// unresolved open question rather than adding recovery for it.
    fn convert_existing_pickle(&mut self) -> Result<()> {
        self.require_writable()?;

        let len = self.file.len()?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_at(0, &mut buf)?;
        let (value, consumed) = decode_stream(&buf)?;
        let Value::Dict(map) = value else {
            return Err(StoreError::invalid_format("file does not contain a pickled dict; cannot convert"));
        };

        self.file.set_len(consumed as u64)?;
        let shadow_offset = consumed as u64;
        Header::new(CURRENT_VERSION).write_at(&mut self.file, shadow_offset)?;
        let entries_base = shadow_offset + opcode::HEADER_LEN;
        terminator::write(&mut self.file, entries_base)?;

        let mut entries: Vec<Entry> = Vec::new();
        for (key, value) in map {
            let codec = codec::select_for_encode(&self.codecs, &value).ok_or(StoreError::NoMatchingCodec)?;
            let offset = entries.last().map(|e: &Entry| e.end_offset()).transpose()?.unwrap_or(entries_base);
            let mut memo_start = 1u32;
            for e in &entries {
                memo_start = memo_start.max(e.memomaxidx(&self.file)?);
            }
            let (payload, new_memo_max) = codec.encode(&value, memo_start)?;
            let draft = Entry::draft(key, payload, new_memo_max)?;
            let on_disk = draft.materialize(&mut self.file, offset)?;
            terminator::write(&mut self.file, on_disk.end_offset()?)?;
            entries.push(on_disk);
        }

        let total_len = self.file.len()?;
        let data_len = total_len - shadow_offset;
        let chunk_size = DEFAULT_VACUUM_CHUNK as usize;
        let mut buf = vec![0u8; chunk_size];
        let mut rptr = shadow_offset;
        let mut wptr = 0u64;
        while wptr < data_len {
            let take = ((total_len - rptr) as usize).min(chunk_size);
            self.file.read_at(rptr, &mut buf[..take])?;
            self.file.write_at(wptr, &buf[..take])?;
            rptr += take as u64;
            wptr += take as u64;
        }
        self.file.set_len(data_len)?;

        Header::new(CURRENT_VERSION).write(&mut self.file)?;
        self.cache.clear();

        // No holes should exist yet at this point; runs anyway since
        // vacuum is idempotent on a hole-free file.
        self.vacuum_locked(DEFAULT_VACUUM_CHUNK)?;
        Ok(())
    }
}

/// A zero-copy view over a bulk-array value's raw element bytes, returned
/// by [`Store::get_mapped_array`].
pub struct MappedArray {
    mmap: memmap2::Mmap,
    dtype: DType,
    shape: Vec<u64>,
}

impl MappedArray {
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// The raw, little-endian, row-major element bytes — `shape` and
    /// `dtype` together say how to interpret them.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap[..]
    }
}
