// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Memo renumbering
//!
//! Every entry's payload has to use memo slots ([`PUT`]/[`GET`] in pickle
//! terms) that are globally disjoint from every other entry's, so the whole
//! file still reads back as one legal pickle stream with one shared memo
//! table. [`renumber`] is the post-processing pass that makes that true: it
//! walks an opcode stream produced by
//! [`pickle_ops::encode`](super::pickle_ops::encode), renumbers every
//! `MEMOIZE`/`PUT`-family opcode starting at `memo_start_idx`, rewrites the
//! matching `GET`-family opcodes to the new numbering, and — the bit that
//! actually saves space — drops every `PUT` whose slot is never referenced
//! by a `GET` at all.
//!
//! [`pickle_ops::encode`](super::pickle_ops::encode) only ever emits
//! `MEMOIZE`, never a `GET`, because [`Value`](picklekv_core::Value) trees
//! have no shared sub-objects to back-reference. That means this pass
//! always drops every memo it sees for values built from this crate's own
//! encoder, and `memo_max_idx` never advances past whatever the previous
//! entry left it at — matching invariant I5 (non-decreasing, not strictly
//! increasing). The full algorithm is still implemented rather than
//! special-cased on "no GETs exist", both because it is what the design
//! this format is grounded on does, and because a payload a future codec
//! produces might use real back-references.

use picklekv_core::error::{Result, StoreError};
use picklekv_core::opcode::*;

enum Classified {
    /// A no-argument `MEMOIZE`: a fresh memo id one past every id seen so far.
    AutoPut,
    /// An explicit `BINPUT`/`LONG_BINPUT` with its argument.
    Put(u32),
    /// A `BINGET`/`LONG_BINGET` with its argument.
    Get(u32),
    /// Anything else — copied through byte-for-byte.
    Other { start: usize, end: usize },
}

fn classify(bytes: &[u8], pos: usize) -> Result<(Classified, usize)> {
    let op = *bytes.get(pos).ok_or_else(|| StoreError::invalid_format("truncated opcode stream"))?;
    let arg_at = pos + 1;

    let fixed_len = |n: usize| -> Result<usize> {
        if arg_at + n > bytes.len() {
            return Err(StoreError::invalid_format("opcode argument runs past end of stream"));
        }
        Ok(arg_at + n)
    };
    let len_prefixed = |prefix_len: usize, read: fn(&[u8]) -> u64| -> Result<usize> {
        let prefix_end = fixed_len(prefix_len)?;
        let n = read(&bytes[arg_at..prefix_end]) as usize;
        if prefix_end + n > bytes.len() {
            return Err(StoreError::invalid_format("opcode payload runs past end of stream"));
        }
        Ok(prefix_end + n)
    };

    match op {
        MARK | NONE | NEWTRUE | NEWFALSE | EMPTY_LIST | EMPTY_DICT | EMPTY_TUPLE | TUPLE1 | TUPLE2 | TUPLE3 | TUPLE | APPEND
        | APPENDS | SETITEM | SETITEMS | DICT | POP | POP_MARK | STOP => Ok((Classified::Other { start: pos, end: arg_at }, arg_at)),
        BININT => {
            let end = fixed_len(4)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        BININT1 => {
            let end = fixed_len(1)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        BININT2 => {
            let end = fixed_len(2)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        BINFLOAT => {
            let end = fixed_len(8)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        LONG1 => {
            let end = len_prefixed(1, |b| b[0] as u64)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        SHORT_BINUNICODE | SHORT_BINBYTES => {
            let end = len_prefixed(1, |b| b[0] as u64)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        BINUNICODE | BINBYTES => {
            let end = len_prefixed(4, |b| u32::from_le_bytes(b.try_into().unwrap()) as u64)?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        BINUNICODE8 | BINBYTES8 => {
            let end = len_prefixed(8, |b| u64::from_le_bytes(b.try_into().unwrap()))?;
            Ok((Classified::Other { start: pos, end }, end))
        }
        MEMOIZE => Ok((Classified::AutoPut, arg_at)),
        BINPUT => {
            let end = fixed_len(1)?;
            Ok((Classified::Put(bytes[arg_at] as u32), end))
        }
        LONG_BINPUT => {
            let end = fixed_len(4)?;
            Ok((Classified::Put(u32::from_le_bytes(bytes[arg_at..end].try_into().unwrap())), end))
        }
        BINGET => {
            let end = fixed_len(1)?;
            Ok((Classified::Get(bytes[arg_at] as u32), end))
        }
        LONG_BINGET => {
            let end = fixed_len(4)?;
            Ok((Classified::Get(u32::from_le_bytes(bytes[arg_at..end].try_into().unwrap())), end))
        }
        other => Err(StoreError::invalid_format(format!("memo renumbering saw an unsupported opcode 0x{other:02x}"))),
    }
}

enum Op<'a> {
    Put(u32),
    Get(u32),
    Raw(&'a [u8]),
}

/// Renumbers the memo table of `raw` (a bare opcode stream with no
/// `PROTO`/`FRAME`/`STOP`) so its slots start at `memo_start_idx`, dropping
/// any `PUT` never referenced by a `GET`. Returns the rewritten bytes and
/// the resulting `memo_max_idx` (one past the highest slot actually used).
pub fn renumber(raw: &[u8], memo_start_idx: u32) -> Result<(Vec<u8>, u32)> {
    let mut ops = Vec::new();
    let mut old_ids: Vec<u32> = Vec::new();
    let mut new_ids: std::collections::HashMap<u32, Option<u32>> = std::collections::HashMap::new();

    let mut pos = 0;
    while pos < raw.len() {
        let (kind, next) = classify(raw, pos)?;
        match kind {
            Classified::AutoPut => {
                let id = old_ids.len() as u32;
                old_ids.push(id);
                ops.push(Op::Put(id));
            }
            Classified::Put(id) => {
                old_ids.push(id);
                ops.push(Op::Put(id));
            }
            Classified::Get(id) => {
                new_ids.entry(id).or_insert(None);
                ops.push(Op::Get(id));
            }
            Classified::Other { start, end } => ops.push(Op::Raw(&raw[start..end])),
        }
        pos = next;
    }
    drop(old_ids);

    let mut out = Vec::with_capacity(raw.len());
    let mut memo_put_idx = memo_start_idx;
    for op in ops {
        match op {
            Op::Put(id) => {
                let Some(slot) = new_ids.get_mut(&id) else { continue };
                *slot = Some(memo_put_idx);
                if memo_put_idx < 256 {
                    out.push(BINPUT);
                    out.push(memo_put_idx as u8);
                } else {
                    out.push(LONG_BINPUT);
                    out.extend_from_slice(&memo_put_idx.to_le_bytes());
                }
                memo_put_idx += 1;
            }
            Op::Get(id) => {
                let resolved = new_ids.get(&id).and_then(|s| *s).ok_or_else(|| {
                    StoreError::invalid_format("GET referenced a memo slot that was never PUT")
                })?;
                if resolved < 256 {
                    out.push(BINGET);
                    out.push(resolved as u8);
                } else {
                    out.push(LONG_BINGET);
                    out.extend_from_slice(&resolved.to_le_bytes());
                }
            }
            Op::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    Ok((out, memo_put_idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::codecs::pickle_ops;
    use picklekv_core::Value;

    #[test]
    fn drops_every_memo_when_nothing_ever_references_it() {
        let raw = pickle_ops::encode(&Value::Str("hello".to_string()));
        assert!(raw.contains(&MEMOIZE));
        let (renumbered, memo_max) = renumber(&raw, 3).unwrap();
        assert!(!renumbered.contains(&BINPUT));
        assert!(!renumbered.contains(&MEMOIZE));
        assert_eq!(memo_max, 3);
    }

    #[test]
    fn renumbers_a_referenced_put_starting_at_the_given_index() {
        // Hand-build PUT 0, GET 0 (skip MEMOIZE's auto-id entirely): a
        // string memoized then immediately referenced back.
        let mut raw = Vec::new();
        raw.push(SHORT_BINUNICODE);
        raw.push(1);
        raw.push(b'x');
        raw.push(BINPUT);
        raw.push(0);
        raw.push(BINGET);
        raw.push(0);

        let (renumbered, memo_max) = renumber(&raw, 5).unwrap();
        assert_eq!(memo_max, 6);
        assert_eq!(renumbered[3], BINPUT);
        assert_eq!(renumbered[4], 5);
        assert_eq!(renumbered[5], BINGET);
        assert_eq!(renumbered[6], 5);
    }
}
