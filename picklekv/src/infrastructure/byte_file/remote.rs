// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # RemoteByteFile
//!
//! A read-only [`picklekv_core::ByteFile`] over an HTTP(S) URL, fetched in
//! fixed-size, block-aligned ranges and cached in memory with simple
//! least-recently-used eviction. Reading byte 130 with a 64 KiB block size
//! downloads the whole `[0, 65536)` block and serves every subsequent read
//! inside it from memory — the same block-alignment trick keeps entry reads
//! small no matter how a caller slices their `read_at` calls.
//!
//! `ByteFile::read_at` takes `&self`, but populating the cache on a miss is
//! inherently a mutation — the cache itself lives behind a `parking_lot`
//! mutex so a shared reference can still fill it lazily.
//!
//! Writes are always rejected: a store opened against a URL has nowhere to
//! persist a mutation back to, so every write-shaped operation returns
//! [`StoreError::NotWritable`] rather than silently discarding data.

use std::collections::HashMap;

use parking_lot::Mutex;
use picklekv_core::error::{Result, StoreError};
use picklekv_core::ByteFile;

struct CachedBlock {
    data: Vec<u8>,
    last_used: u64,
}

struct Cache {
    blocks: HashMap<u64, CachedBlock>,
    clock: u64,
}

pub struct RemoteByteFile {
    client: reqwest::blocking::Client,
    url: String,
    content_length: u64,
    block_size: u64,
    max_cached_blocks: usize,
    cache: Mutex<Cache>,
}

impl RemoteByteFile {
    /// Issues a `HEAD` request to learn the resource's length and whether it
    /// advertises range support, then prepares the block cache.
    ///
    /// A server that doesn't send `Accept-Ranges: bytes` gets the whole
    /// resource fetched once, right here, rather than attempting a `Range`
    /// request later that it might silently ignore (returning the full body
    /// for a partial request is a real failure mode this guards against).
    pub fn open(url: impl Into<String>, block_size: u64, max_cached_blocks: usize) -> Result<Self> {
        let url = url.into();
        let client = reqwest::blocking::Client::new();
        let resp = client
            .head(&url)
            .send()
            .map_err(|e| StoreError::invalid_state(format!("HEAD request to {url} failed: {e}")))?;
        let content_length = resp
            .content_length()
            .ok_or_else(|| StoreError::invalid_state(format!("{url} did not report a Content-Length")))?;
        let supports_ranges = resp
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .is_some_and(|v| v.as_bytes() == b"bytes");

        let effective_block_size = if supports_ranges { block_size } else { content_length.max(1) };
        let store = Self {
            client,
            url,
            content_length,
            block_size: effective_block_size,
            max_cached_blocks,
            cache: Mutex::new(Cache { blocks: HashMap::new(), clock: 0 }),
        };

        if !supports_ranges {
            let data = store.full_get()?;
            let mut cache = store.cache.lock();
            cache.clock += 1;
            let clock = cache.clock;
            cache.blocks.insert(0, CachedBlock { data, last_used: clock });
        }

        Ok(store)
    }

    fn full_get(&self) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| StoreError::invalid_state(format!("GET request to {} failed: {e}", self.url)))?;
        resp.bytes().map(|b| b.to_vec()).map_err(|e| StoreError::invalid_state(format!("failed reading response body: {e}")))
    }

    fn block_index(&self, offset: u64) -> u64 {
        offset / self.block_size
    }

    fn fetch_block(&self, block_index: u64) -> Result<Vec<u8>> {
        let start = block_index * self.block_size;
        let end = (start + self.block_size).min(self.content_length).saturating_sub(1);
        let range = format!("bytes={start}-{end}");
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()
            .map_err(|e| StoreError::invalid_state(format!("range request to {} failed: {e}", self.url)))?;
        let data = resp
            .bytes()
            .map_err(|e| StoreError::invalid_state(format!("failed reading response body: {e}")))?
            .to_vec();
        Ok(data)
    }

    fn with_block<R>(&self, block_index: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        {
            let mut cache = self.cache.lock();
            if let Some(block) = cache.blocks.get_mut(&block_index) {
                cache.clock += 1;
                block.last_used = cache.clock;
                return Ok(f(&block.data));
            }
        }

        let data = self.fetch_block(block_index)?;

        let mut cache = self.cache.lock();
        cache.clock += 1;
        let clock = cache.clock;
        cache.blocks.insert(block_index, CachedBlock { data, last_used: clock });
        while cache.blocks.len() > self.max_cached_blocks {
            if let Some((&oldest, _)) = cache.blocks.iter().min_by_key(|(_, b)| b.last_used) {
                cache.blocks.remove(&oldest);
            } else {
                break;
            }
        }
        Ok(f(&cache.blocks[&block_index].data))
    }
}

impl ByteFile for RemoteByteFile {
    fn len(&self) -> Result<u64> {
        Ok(self.content_length)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.content_length {
            return Err(StoreError::invalid_format("short read past end of remote file"));
        }
        let mut filled = 0usize;
        while filled < buf.len() {
            let pos = offset + filled as u64;
            let block_index = self.block_index(pos);
            let block_start = block_index * self.block_size;
            let take = self.with_block(block_index, |data| {
                let in_block = (pos - block_start) as usize;
                let take = (buf.len() - filled).min(data.len() - in_block);
                buf[filled..filled + take].copy_from_slice(&data[in_block..in_block + take]);
                take
            })?;
            filled += take;
        }
        Ok(())
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<()> {
        Err(StoreError::NotWritable)
    }

    fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(StoreError::NotWritable)
    }
}
