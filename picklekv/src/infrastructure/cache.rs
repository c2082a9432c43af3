// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Cache
//!
//! The process-local index a [`super::store::Store`] consults instead of
//! rescanning the whole file on every lookup: an ordered list of every
//! entry (valid or tombstoned) and a key-to-entry map of only the valid
//! ones.
//!
//! Both collections are dropped — not eagerly rebuilt — the moment a
//! [`Store`](super::store::Store) notices the header's revision counter has
//! moved since it last looked (another process wrote, or this one just
//! vacuumed). The next read rebuilds them lazily by walking the file from
//! just after the header. Insert and delete instead patch the collections
//! in place and bump the revision themselves, so a process's own writes
//! never pay for a rescan of data it just wrote.

use std::collections::HashMap;

use picklekv_core::byte_file::ByteFile;
use picklekv_core::entry::Entry;
use picklekv_core::error::Result;
use picklekv_core::opcode;

#[derive(Default)]
pub struct Cache {
    entries_all: Option<Vec<Entry>>,
    entries_valid: Option<HashMap<String, Entry>>,
    last_seen_revision: Option<u32>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen_revision(&self) -> Option<u32> {
        self.last_seen_revision
    }

    pub fn set_last_seen_revision(&mut self, revision: u32) {
        self.last_seen_revision = Some(revision);
    }

    /// Drops both collections. The next call to [`Self::ensure_loaded`]
    /// rebuilds them from a full scan.
    pub fn clear(&mut self) {
        self.entries_all = None;
        self.entries_valid = None;
    }

    /// Rebuilds the collections from a file scan if they aren't already
    /// populated. A no-op otherwise.
    ///
    /// Scan starts at [`opcode::HEADER_LEN`] and walks forward one entry at
    /// a time until `file_len - `[`opcode::TERMINATOR_LEN`]`, matching I2/I3:
    /// entries are contiguous and fill exactly that range.
    pub fn ensure_loaded(&mut self, file: &impl ByteFile) -> Result<()> {
        if self.entries_all.is_some() {
            return Ok(());
        }

        let file_len = file.len()?;
        let end_offset = file_len.saturating_sub(opcode::TERMINATOR_LEN);
        let mut all = Vec::new();
        let mut valid = HashMap::new();
        let mut offset = opcode::HEADER_LEN;
        while offset < end_offset {
            let entry = Entry::read_at(file, offset)?;
            offset = entry.end_offset()?;
            // Per I8, later entries win when a (logically impossible, but
            // tolerated) duplicate valid key is seen — insertion order here
            // is file order, so a plain `insert` already does the right
            // thing without extra bookkeeping.
            if entry.valid(file)? {
                valid.insert(entry.key(file)?, entry.clone());
            } else {
                valid.remove(&entry.key(file)?);
            }
            all.push(entry);
        }

        self.entries_all = Some(all);
        self.entries_valid = Some(valid);
        Ok(())
    }

    pub fn entries_all(&self) -> &[Entry] {
        self.entries_all.as_deref().unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries_valid.as_ref().is_some_and(|m| m.contains_key(key))
    }

    pub fn get_valid(&self, key: &str) -> Option<&Entry> {
        self.entries_valid.as_ref().and_then(|m| m.get(key))
    }

    pub fn valid_keys(&self) -> impl Iterator<Item = &String> {
        self.entries_valid.iter().flat_map(|m| m.keys())
    }

    /// Records a freshly materialized entry as both the newest entry in
    /// file order and the current valid entry for its key, tombstoning
    /// whatever the key previously pointed to is the caller's
    /// responsibility (via [`Store::del`](super::store::Store::del)) before
    /// this is called.
    pub fn insert_live(&mut self, key: String, entry: Entry) {
        self.entries_all.get_or_insert_with(Vec::new).push(entry.clone());
        self.entries_valid.get_or_insert_with(HashMap::new).insert(key, entry);
    }

    /// Removes `key` from the valid-entry map (its tombstoned entry stays
    /// in `entries_all` until a vacuum), returning the entry that was
    /// there.
    pub fn remove_valid(&mut self, key: &str) -> Option<Entry> {
        self.entries_valid.as_mut().and_then(|m| m.remove(key))
    }
}
