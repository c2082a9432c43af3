// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Pickle opcode stream for `Value`
//!
//! [`GenericCodec`](super::generic::GenericCodec) needs something to
//! actually call "generic object marshaling" before it post-processes the
//! result (`mmappickle`'s `_pickle_dump_fix`/`_pickle_load_fix`, which call
//! out to the real `pickle` module). This crate has no CPython to call out
//! to, so this module is a small, self-contained protocol-4 opcode
//! encoder/decoder for [`Value`] — real pickle opcodes (see
//! `picklekv_core::opcode`), just scoped to the handful this crate ever
//! needs to emit.
//!
//! [`encode`] deliberately skips the `PROTO`/`STOP` wrapper real
//! `pickle.dumps` would add: [`super::memo::renumber`] would strip it right
//! back off, so there is no reason to produce it in the first place. Only
//! [`decode`] re-adds the synthetic envelope, matching the read-side
//! contract described for `GenericCodec`.

use std::collections::BTreeMap;

use picklekv_core::error::{Result, StoreError};
use picklekv_core::opcode::*;
use picklekv_core::value::{ArrayValue, DType, Value};

/// Encodes `value` as a bare opcode stream (no `PROTO`, no `FRAME`, no
/// `STOP`) with a `MEMOIZE` after every string, bytes, list, tuple, and
/// dict — the same objects CPython's pickler puts in its memo table.
/// `Value::Array` values fall back to a nested list-of-numbers encoding, so
/// this never fails even if the bulk-array codec has been left out of a
/// store's codec list.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    emit_value(value, &mut out);
    out
}

fn emit_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::None => out.push(NONE),
        Value::Bool(b) => out.push(if *b { NEWTRUE } else { NEWFALSE }),
        Value::Int(i) => emit_int(*i, out),
        Value::Float(f) => {
            out.push(BINFLOAT);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::Str(s) => {
            emit_str(s, out);
            out.push(MEMOIZE);
        }
        Value::Bytes(b) => {
            emit_bytes(b, out);
            out.push(MEMOIZE);
        }
        Value::List(items) => {
            out.push(EMPTY_LIST);
            out.push(MEMOIZE);
            if !items.is_empty() {
                out.push(MARK);
                for item in items {
                    emit_value(item, out);
                }
                out.push(APPENDS);
            }
        }
        Value::Tuple(items) => {
            match items.len() {
                0 => out.push(EMPTY_TUPLE),
                1 => {
                    emit_value(&items[0], out);
                    out.push(TUPLE1);
                }
                2 => {
                    emit_value(&items[0], out);
                    emit_value(&items[1], out);
                    out.push(TUPLE2);
                }
                3 => {
                    emit_value(&items[0], out);
                    emit_value(&items[1], out);
                    emit_value(&items[2], out);
                    out.push(TUPLE3);
                }
                _ => {
                    out.push(MARK);
                    for item in items {
                        emit_value(item, out);
                    }
                    out.push(TUPLE);
                }
            }
            out.push(MEMOIZE);
        }
        Value::Dict(map) => {
            out.push(EMPTY_DICT);
            out.push(MEMOIZE);
            if !map.is_empty() {
                out.push(MARK);
                for (k, v) in map {
                    emit_str(k, out);
                    out.push(MEMOIZE);
                    emit_value(v, out);
                }
                out.push(SETITEMS);
            }
        }
        Value::Array(arr) => emit_value(&array_as_nested_list(arr), out),
    }
}

/// Fallback representation for an array value when no specialized codec
/// claims it: a flat list of numbers plus its shape, nested one list level
/// per dimension so `decode` reconstructs the same [`Value::Array`] shape.
fn array_as_nested_list(arr: &ArrayValue) -> Value {
    let elements: Vec<Value> = match arr.dtype {
        DType::F32 => arr.data.chunks_exact(4).map(|c| Value::Float(f32::from_le_bytes(c.try_into().unwrap()) as f64)).collect(),
        DType::F64 => arr.data.chunks_exact(8).map(|c| Value::Float(f64::from_le_bytes(c.try_into().unwrap()))).collect(),
        DType::I32 => arr.data.chunks_exact(4).map(|c| Value::Int(i32::from_le_bytes(c.try_into().unwrap()) as i64)).collect(),
        DType::I64 => arr.data.chunks_exact(8).map(|c| Value::Int(i64::from_le_bytes(c.try_into().unwrap()))).collect(),
        DType::U8 => arr.data.iter().map(|b| Value::Int(*b as i64)).collect(),
    };
    let shape = Value::Tuple(arr.shape.iter().map(|d| Value::Int(*d as i64)).collect());
    Value::Tuple(vec![Value::Str("__picklekv_array__".to_string()), Value::Int(arr.dtype.tag() as i64), shape, Value::List(elements)])
}

fn emit_int(v: i64, out: &mut Vec<u8>) {
    if let Ok(v32) = i32::try_from(v) {
        out.push(BININT);
        out.extend_from_slice(&v32.to_le_bytes());
        return;
    }
    out.push(LONG1);
    let bytes = long_bytes(v);
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
}

/// Minimal little-endian two's-complement encoding of `v`, matching
/// pickle's `LONG1` payload (`encode_long` in CPython's `pickle.py`).
fn long_bytes(v: i64) -> Vec<u8> {
    if v == 0 {
        return Vec::new();
    }
    let mut bytes = v.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let prev_sign_bit = bytes[bytes.len() - 2] & 0x80 != 0;
        if (last == 0 && !prev_sign_bit) || (last == 0xff && prev_sign_bit) {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

fn emit_str(s: &str, out: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    if bytes.len() < 256 {
        out.push(SHORT_BINUNICODE);
        out.push(bytes.len() as u8);
    } else if (bytes.len() as u64) < u32::MAX as u64 {
        out.push(BINUNICODE);
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    } else {
        out.push(BINUNICODE8);
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}

fn emit_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    if bytes.len() < 256 {
        out.push(SHORT_BINBYTES);
        out.push(bytes.len() as u8);
    } else if (bytes.len() as u64) < u32::MAX as u64 {
        out.push(BINBYTES);
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    } else {
        out.push(BINBYTES8);
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}

/// Decodes a bare opcode stream back into a [`Value`], wrapping it first in
/// a synthetic `PROTO 4 ... STOP` envelope — the opcodes this module emits
/// never reference anything outside that envelope, so the wrapper is only
/// there to keep this function's contract symmetric with the idea (per the
/// store design) that a reader always sees a complete, self-contained
/// pickle stream.
pub fn decode(payload: &[u8]) -> Result<Value> {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(PROTO);
    framed.push(4);
    framed.extend_from_slice(payload);
    framed.push(STOP);
    decode_ops(&framed).map(|(value, _)| value)
}

/// Decodes a complete, self-framed pickle stream (one that already carries
/// its own `PROTO`/`STOP`, and possibly top-level `FRAME` opcodes — the
/// shape a real `pickle.dumps` produces), returning the value and the
/// number of bytes of `bytes` actually consumed up to and including `STOP`.
///
/// This is what file conversion (§4.6 of the store design: a file opened
/// that isn't a store yet, but is a plain serialized mapping) uses to parse
/// a whole pre-existing pickle file: it may have trailing garbage after the
/// logical end of the pickle, and conversion needs to know exactly where
/// that boundary is so it can truncate there.
pub fn decode_stream(bytes: &[u8]) -> Result<(Value, usize)> {
    decode_ops(bytes)
}

#[derive(Debug, Clone)]
enum StackItem {
    Value(Value),
    Mark,
}

fn decode_ops(bytes: &[u8]) -> Result<(Value, usize)> {
    let mut pos = 0usize;
    let mut stack: Vec<StackItem> = Vec::new();
    let mut memo: Vec<Value> = Vec::new();

    macro_rules! pop_value {
        () => {
            match stack.pop() {
                Some(StackItem::Value(v)) => v,
                _ => return Err(StoreError::invalid_format("pickle stack underflow or unexpected MARK")),
            }
        };
    }

    loop {
        if pos >= bytes.len() {
            return Err(StoreError::invalid_format("pickle stream ended without STOP"));
        }
        let op = bytes[pos];
        pos += 1;
        match op {
            PROTO => {
                if pos >= bytes.len() || bytes[pos] != 4 {
                    return Err(StoreError::invalid_format("unsupported pickle protocol version"));
                }
                pos += 1;
            }
            STOP => {
                let value = pop_value!();
                if !stack.is_empty() {
                    return Err(StoreError::invalid_format("pickle stream left extra values on the stack"));
                }
                return Ok((value, pos));
            }
            FRAME => {
                // Real `pickle.dumps` wraps runs of opcodes in FRAME
                // length-prefixes above a size threshold. This decoder
                // never needs the length to know where a value ends (STOP
                // does), so the 8-byte count is read only to skip past it.
                read_u64(bytes, &mut pos)?;
            }
            MARK => stack.push(StackItem::Mark),
            NONE => stack.push(StackItem::Value(Value::None)),
            NEWTRUE => stack.push(StackItem::Value(Value::Bool(true))),
            NEWFALSE => stack.push(StackItem::Value(Value::Bool(false))),
            BININT => {
                let v = read_i32(bytes, &mut pos)?;
                stack.push(StackItem::Value(Value::Int(v as i64)));
            }
            BININT1 => {
                let v = read_u8(bytes, &mut pos)?;
                stack.push(StackItem::Value(Value::Int(v as i64)));
            }
            BININT2 => {
                let v = read_u16(bytes, &mut pos)?;
                stack.push(StackItem::Value(Value::Int(v as i64)));
            }
            LONG1 => {
                let n = read_u8(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Int(decode_long(raw))));
            }
            BINFLOAT => {
                let raw = read_slice(bytes, &mut pos, 8)?;
                stack.push(StackItem::Value(Value::Float(f64::from_be_bytes(raw.try_into().unwrap()))));
            }
            SHORT_BINUNICODE => {
                let n = read_u8(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Str(decode_utf8(raw)?)));
            }
            BINUNICODE => {
                let n = read_u32(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Str(decode_utf8(raw)?)));
            }
            BINUNICODE8 => {
                let n = read_u64(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Str(decode_utf8(raw)?)));
            }
            SHORT_BINBYTES => {
                let n = read_u8(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Bytes(raw.to_vec())));
            }
            BINBYTES => {
                let n = read_u32(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Bytes(raw.to_vec())));
            }
            BINBYTES8 => {
                let n = read_u64(bytes, &mut pos)? as usize;
                let raw = read_slice(bytes, &mut pos, n)?;
                stack.push(StackItem::Value(Value::Bytes(raw.to_vec())));
            }
            EMPTY_LIST => stack.push(StackItem::Value(Value::List(Vec::new()))),
            EMPTY_DICT => stack.push(StackItem::Value(Value::Dict(BTreeMap::new()))),
            EMPTY_TUPLE => stack.push(StackItem::Value(Value::Tuple(Vec::new()))),
            TUPLE1 => {
                let a = pop_value!();
                stack.push(StackItem::Value(Value::Tuple(vec![a])));
            }
            TUPLE2 => {
                let b = pop_value!();
                let a = pop_value!();
                stack.push(StackItem::Value(Value::Tuple(vec![a, b])));
            }
            TUPLE3 => {
                let c = pop_value!();
                let b = pop_value!();
                let a = pop_value!();
                stack.push(StackItem::Value(Value::Tuple(vec![a, b, c])));
            }
            TUPLE => {
                let items = pop_until_mark(&mut stack)?;
                stack.push(StackItem::Value(Value::Tuple(items)));
            }
            APPEND => {
                let item = pop_value!();
                append_to_list(&mut stack, vec![item])?;
            }
            APPENDS => {
                let items = pop_until_mark(&mut stack)?;
                append_to_list(&mut stack, items)?;
            }
            SETITEM => {
                let value = pop_value!();
                let key = pop_value!();
                set_dict_items(&mut stack, vec![(key, value)])?;
            }
            SETITEMS => {
                let flat = pop_until_mark(&mut stack)?;
                let mut pairs = Vec::with_capacity(flat.len() / 2);
                let mut it = flat.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    pairs.push((k, v));
                }
                set_dict_items(&mut stack, pairs)?;
            }
            DICT => {
                let flat = pop_until_mark(&mut stack)?;
                let mut map = BTreeMap::new();
                let mut it = flat.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    let key = k.as_str().ok_or_else(|| StoreError::invalid_format("dict key is not a string"))?.to_string();
                    map.insert(key, v);
                }
                stack.push(StackItem::Value(Value::Dict(map)));
            }
            // Discards the top stack item. The store's own container uses
            // this both to throw away a just-pushed scratch value (the
            // header's version/revision ints, an entry's memo-max-idx) and,
            // doubled up, to erase a tombstoned entry's key and value from
            // the stack entirely — so the popped item may be a `Value` or a
            // `Mark`, and either is valid.
            POP => {
                if stack.pop().is_none() {
                    return Err(StoreError::invalid_format("POP with empty stack"));
                }
            }
            MEMOIZE => {
                let top = match stack.last() {
                    Some(StackItem::Value(v)) => v.clone(),
                    _ => return Err(StoreError::invalid_format("MEMOIZE with empty stack")),
                };
                memo.push(top);
            }
            BINPUT => {
                let idx = read_u8(bytes, &mut pos)? as usize;
                memoize_at(&mut memo, idx, &stack)?;
            }
            LONG_BINPUT => {
                let idx = read_u32(bytes, &mut pos)? as usize;
                memoize_at(&mut memo, idx, &stack)?;
            }
            BINGET => {
                let idx = read_u8(bytes, &mut pos)? as usize;
                stack.push(StackItem::Value(memo_get(&memo, idx)?));
            }
            LONG_BINGET => {
                let idx = read_u32(bytes, &mut pos)? as usize;
                stack.push(StackItem::Value(memo_get(&memo, idx)?));
            }
            other => return Err(StoreError::invalid_format(format!("unsupported pickle opcode 0x{other:02x}"))),
        }
    }
}

fn memoize_at(memo: &mut Vec<Value>, idx: usize, stack: &[StackItem]) -> Result<()> {
    let top = match stack.last() {
        Some(StackItem::Value(v)) => v.clone(),
        _ => return Err(StoreError::invalid_format("PUT with empty stack")),
    };
    if idx >= memo.len() {
        memo.resize(idx + 1, Value::None);
    }
    memo[idx] = top;
    Ok(())
}

fn memo_get(memo: &[Value], idx: usize) -> Result<Value> {
    memo.get(idx).cloned().ok_or_else(|| StoreError::invalid_format("GET referenced an unknown memo slot"))
}

fn pop_until_mark(stack: &mut Vec<StackItem>) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    loop {
        match stack.pop() {
            Some(StackItem::Mark) => break,
            Some(StackItem::Value(v)) => items.push(v),
            None => return Err(StoreError::invalid_format("missing MARK")),
        }
    }
    items.reverse();
    Ok(items)
}

fn append_to_list(stack: &mut [StackItem], items: Vec<Value>) -> Result<()> {
    match stack.last_mut() {
        Some(StackItem::Value(Value::List(list))) => {
            list.extend(items);
            Ok(())
        }
        _ => Err(StoreError::invalid_format("APPEND(S) without a list underneath")),
    }
}

fn set_dict_items(stack: &mut [StackItem], pairs: Vec<(Value, Value)>) -> Result<()> {
    match stack.last_mut() {
        Some(StackItem::Value(Value::Dict(map))) => {
            for (k, v) in pairs {
                let key = k.as_str().ok_or_else(|| StoreError::invalid_format("dict key is not a string"))?.to_string();
                map.insert(key, v);
            }
            Ok(())
        }
        _ => Err(StoreError::invalid_format("SETITEM(S) without a dict underneath")),
    }
}

fn decode_long(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut buf = [0u8; 8];
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    if negative {
        buf = [0xff; 8];
    }
    buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
    i64::from_le_bytes(buf)
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::invalid_format(format!("not valid utf8: {e}")))
}

fn read_slice<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    if *pos + n > bytes.len() {
        return Err(StoreError::invalid_format("pickle opcode argument runs past end of stream"));
    }
    let slice = &bytes[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    Ok(read_slice(bytes, pos, 1)?[0])
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    Ok(u16::from_le_bytes(read_slice(bytes, pos, 2)?.try_into().unwrap()))
}

fn read_i32(bytes: &[u8], pos: &mut usize) -> Result<i32> {
    Ok(i32::from_le_bytes(read_slice(bytes, pos, 4)?.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_slice(bytes, pos, 4)?.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    Ok(u64::from_le_bytes(read_slice(bytes, pos, 8)?.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let raw = encode(&value);
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(Value::None);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int(0));
        roundtrip(Value::Int(-1));
        roundtrip(Value::Int(i64::MAX));
        roundtrip(Value::Int(i64::MIN));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::Str("hello".to_string()));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn roundtrips_containers() {
        roundtrip(Value::List(vec![Value::Int(1), Value::Str("a".to_string())]));
        roundtrip(Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]));
        roundtrip(Value::Tuple(vec![]));
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::List(vec![Value::None, Value::Bool(true)]));
        roundtrip(Value::Dict(map));
    }

    #[test]
    fn roundtrips_large_string() {
        roundtrip(Value::Str("x".repeat(100_000)));
    }

    /// `decode_stream` is what an independent deserializer and the
    /// container's own `fsck`/conversion machinery both rely on to read a
    /// complete pickle, not just one entry's payload — it has to understand
    /// `POP` and `DICT`, the two opcodes the store's header and terminator
    /// actually use, not just the opcodes `encode` ever emits for a value.
    #[test]
    fn decode_stream_handles_pop_and_dict() {
        // PROTO 4; BININT 1 POP; BININT 2 POP; MARK;
        // "k" BININT 9  BININT 0 POP  NEWTRUE POP; DICT; STOP
        // — the shape of the store's own header/entry/terminator opcodes
        // for a single live key "k" mapped to 9.
        let mut raw = vec![PROTO, 4];
        raw.push(BININT);
        raw.extend_from_slice(&1i32.to_le_bytes());
        raw.push(POP);
        raw.push(BININT);
        raw.extend_from_slice(&2i32.to_le_bytes());
        raw.push(POP);
        raw.push(MARK);
        raw.push(SHORT_BINUNICODE);
        raw.push(1);
        raw.extend_from_slice(b"k");
        raw.push(BININT);
        raw.extend_from_slice(&9i32.to_le_bytes());
        raw.push(BININT);
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.push(POP);
        raw.push(NEWTRUE);
        raw.push(POP);
        raw.push(DICT);
        raw.push(STOP);

        let (value, consumed) = decode_stream(&raw).unwrap();
        assert_eq!(consumed, raw.len());
        let mut expected = BTreeMap::new();
        expected.insert("k".to_string(), Value::Int(9));
        assert_eq!(value, Value::Dict(expected));
    }

    /// A tombstoned entry's `POP POP` pair removes both the key and the
    /// value it pushed, so `DICT` never sees that pair at all.
    #[test]
    fn decode_stream_skips_a_tombstoned_entry() {
        let mut raw = vec![PROTO, 4, MARK];
        raw.push(SHORT_BINUNICODE);
        raw.push(1);
        raw.extend_from_slice(b"k");
        raw.push(BININT);
        raw.extend_from_slice(&9i32.to_le_bytes());
        raw.push(POP); // discards the value
        raw.push(POP); // discards the key
        raw.push(DICT);
        raw.push(STOP);

        let (value, _) = decode_stream(&raw).unwrap();
        assert_eq!(value, Value::Dict(BTreeMap::new()));
    }
}
