// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Codec
//!
//! A store never hard-codes how a value is turned into bytes. Instead every
//! insert consults an ordered list of codecs — highest `priority` first —
//! and uses the first one willing to claim the value. Reads mirror this: the
//! bytes already on disk are sniffed against each codec's [`Codec::sniff`]
//! until one recognizes its own framing.
//!
//! This mirrors the pluggable-pickler design the container format is
//! grounded on, where a bulk-array codec outranks the catch-all codec so
//! tensors get a zero-copy representation while everything else falls
//! through to generic object marshaling.

use crate::error::Result;
use crate::value::Value;

/// One strategy for marshaling a [`Value`] into an entry's payload bytes and
/// back.
///
/// Implementations live in the `picklekv` crate (`GenericCodec`,
/// `BulkArrayCodec`); this crate only defines the seam they plug into.
pub trait Codec {
    /// Dispatch priority. Higher runs first when choosing a codec to encode
    /// a new value; ties are broken by registration order.
    fn priority(&self) -> i32;

    /// Short, stable name used in diagnostics; not part of the on-disk
    /// format.
    fn name(&self) -> &'static str;

    /// Can this codec produce a faithful encoding of `value`?
    fn can_encode(&self, value: &Value) -> bool;

    /// Does `payload` look like bytes this codec produced? Used to pick a
    /// decoder for data already on disk, independent of which codec a future
    /// write would choose.
    fn sniff(&self, payload: &[u8]) -> bool;

    /// Encode `value`, returning the complete payload bytes to store between
    /// an entry's key and its valid-flag trailer, along with the new
    /// `memo_max_idx` to record in the entry's trailer.
    ///
    /// `memo_start_idx` is the first memo slot this entry is free to use —
    /// one past the highest slot any earlier entry claimed. A codec that
    /// doesn't use the memo table at all (e.g. `BulkArrayCodec`) just hands
    /// it back unchanged.
    fn encode(&self, value: &Value, memo_start_idx: u32) -> Result<(Vec<u8>, u32)>;

    /// Decode a payload previously produced by [`Codec::encode`] (or
    /// recognized by [`Codec::sniff`]).
    fn decode(&self, payload: &[u8]) -> Result<Value>;
}

/// Picks the highest-priority codec willing to encode `value`, the first
/// registered among any tied at the top priority.
pub fn select_for_encode<'a>(codecs: &'a [Box<dyn Codec>], value: &Value) -> Option<&'a dyn Codec> {
    first_highest_priority(codecs, |c| c.can_encode(value))
}

/// Picks the highest-priority codec that recognizes `payload`, the first
/// registered among any tied at the top priority.
pub fn select_for_decode<'a>(codecs: &'a [Box<dyn Codec>], payload: &[u8]) -> Option<&'a dyn Codec> {
    first_highest_priority(codecs, |c| c.sniff(payload))
}

fn first_highest_priority<'a>(codecs: &'a [Box<dyn Codec>], matches: impl Fn(&dyn Codec) -> bool) -> Option<&'a dyn Codec> {
    let mut best: Option<&'a dyn Codec> = None;
    for codec in codecs {
        if !matches(codec.as_ref()) {
            continue;
        }
        if best.is_none_or(|b| codec.priority() > b.priority()) {
            best = Some(codec.as_ref());
        }
    }
    best
}
