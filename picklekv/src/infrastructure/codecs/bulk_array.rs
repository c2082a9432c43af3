// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # BulkArrayCodec
//!
//! The specialized codec the store design calls out as "illustrative,
//! out-of-scope internals": a payload layout of type-descriptor + shape
//! tuple + raw element bytes, grounded on `mmappickle.picklers.numpy`'s
//! `ArrayPickler` but without any dependency on an actual tensor library —
//! [`picklekv_core::value::ArrayValue`] is this crate's stand-in for "a
//! numpy-like array".
//!
//! Payload layout (all integers little-endian):
//!
//! ```text
//! MAGIC(4) dtype_tag(1) ndim(1) shape[ndim](u64 each) raw element bytes
//! ```
//!
//! `encode`/`decode` on [`Codec`] always copy the element bytes — the trait
//! works over already-materialized buffers. The zero-copy path the store
//! design promises ("decoded values ... may be ... a zero-copy mapped
//! view") is [`parse_header`] plus [`crate::infrastructure::store::Store::get_mapped_array`],
//! which hands back a view straight into the backing `memmap2::Mmap`
//! instead of going through this codec's `decode` at all.

use picklekv_core::error::{Result, StoreError};
use picklekv_core::value::{ArrayValue, DType, Value};
use picklekv_core::Codec;

pub const MAGIC: [u8; 4] = *b"PKAR";

/// Outranks [`super::generic::GenericCodec`] so an array value always gets
/// the dedicated layout instead of falling back to nested lists.
pub const PRIORITY: i32 = 100;

#[derive(Debug, Default, Clone, Copy)]
pub struct BulkArrayCodec;

impl Codec for BulkArrayCodec {
    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn name(&self) -> &'static str {
        "bulk_array"
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Array(_))
    }

    fn sniff(&self, payload: &[u8]) -> bool {
        payload.len() >= MAGIC.len() && payload[..MAGIC.len()] == MAGIC
    }

    /// Never touches the memo table: arrays are raw bytes, not pickle
    /// opcodes, so `memo_start_idx` passes straight through unchanged.
    fn encode(&self, value: &Value, memo_start_idx: u32) -> Result<(Vec<u8>, u32)> {
        let Value::Array(arr) = value else {
            return Err(StoreError::invalid_argument("BulkArrayCodec can only encode Value::Array"));
        };
        if arr.shape.len() > u8::MAX as usize {
            return Err(StoreError::invalid_argument("array has too many dimensions"));
        }
        let expected_len = arr.element_count() as usize * arr.dtype.item_size();
        if arr.data.len() != expected_len {
            return Err(StoreError::invalid_argument("array data length does not match shape and dtype"));
        }

        let mut out = Vec::with_capacity(MAGIC.len() + 2 + arr.shape.len() * 8 + arr.data.len());
        out.extend_from_slice(&MAGIC);
        out.push(arr.dtype.tag());
        out.push(arr.shape.len() as u8);
        for dim in &arr.shape {
            out.extend_from_slice(&dim.to_le_bytes());
        }
        out.extend_from_slice(&arr.data);
        Ok((out, memo_start_idx))
    }

    fn decode(&self, payload: &[u8]) -> Result<Value> {
        let (dtype, shape, data_offset) = parse_header(payload)?;
        Ok(Value::Array(ArrayValue { dtype, shape, data: payload[data_offset..].to_vec() }))
    }
}

/// Parses the fixed-layout prefix of a `BulkArrayCodec` payload, returning
/// `(dtype, shape, data_offset)` where `data_offset` is the byte offset —
/// relative to the start of `payload` — at which the raw element bytes
/// begin.
///
/// Does not require `payload` to contain the element bytes themselves —
/// only enough of the header to read the shape. [`parse_header`] adds the
/// length check appropriate for [`BulkArrayCodec::decode`], which always
/// has the whole payload in hand; the store's zero-copy mapped-array
/// accessor calls this directly against just the entry's payload prefix so
/// it never has to copy a potentially huge array into memory first.
pub fn parse_header_prefix(payload: &[u8]) -> Result<(DType, Vec<u64>, usize)> {
    if payload.len() < MAGIC.len() + 2 || payload[..MAGIC.len()] != MAGIC {
        return Err(StoreError::invalid_format("payload is not a bulk-array entry"));
    }
    let dtype = DType::from_tag(payload[MAGIC.len()]).ok_or_else(|| StoreError::invalid_format("unknown array dtype tag"))?;
    let ndim = payload[MAGIC.len() + 1] as usize;
    let shape_start = MAGIC.len() + 2;
    let shape_end = shape_start + ndim * 8;
    if payload.len() < shape_end {
        return Err(StoreError::invalid_format("array payload truncated before shape"));
    }
    let mut shape = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let start = shape_start + i * 8;
        shape.push(u64::from_le_bytes(payload[start..start + 8].try_into().unwrap()));
    }
    Ok((dtype, shape, shape_end))
}

/// [`parse_header_prefix`] plus the length check that the payload contains
/// exactly the element bytes the shape and dtype predict — appropriate only
/// when `payload` is known to be the entry's entire data region.
pub fn parse_header(payload: &[u8]) -> Result<(DType, Vec<u64>, usize)> {
    let (dtype, shape, shape_end) = parse_header_prefix(payload)?;
    let element_count: u64 = shape.iter().product();
    let expected_data_len = element_count as usize * dtype.item_size();
    if payload.len() != shape_end + expected_data_len {
        return Err(StoreError::invalid_format("array payload length does not match its own shape"));
    }
    Ok((dtype, shape, shape_end))
}

/// Upper bound on a bulk-array payload's fixed header: magic + dtype tag +
/// ndim byte + the largest possible shape (255 dimensions, the most
/// `ndim: u8` can express).
pub const MAX_HEADER_LEN: usize = MAGIC.len() + 2 + 255 * 8;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ArrayValue {
        ArrayValue { dtype: DType::F64, shape: vec![2, 2], data: [1.0f64, 2.0, 3.0, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect() }
    }

    #[test]
    fn round_trips_and_is_sniffable() {
        let codec = BulkArrayCodec;
        let value = Value::Array(sample());
        let (payload, memo_max) = codec.encode(&value, 7).unwrap();
        assert_eq!(memo_max, 7, "array codec never touches the memo table");
        assert!(codec.sniff(&payload));
        assert!(!codec.sniff(b"not an array payload"));
        let decoded = codec.decode(&payload).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn parse_header_matches_what_encode_wrote() {
        let codec = BulkArrayCodec;
        let arr = sample();
        let (payload, _) = codec.encode(&Value::Array(arr.clone()), 0).unwrap();
        let (dtype, shape, offset) = parse_header(&payload).unwrap();
        assert_eq!(dtype, arr.dtype);
        assert_eq!(shape, arr.shape);
        assert_eq!(&payload[offset..], &arr.data[..]);
    }

    #[test]
    fn rejects_mismatched_data_length() {
        let codec = BulkArrayCodec;
        let bad = ArrayValue { dtype: DType::F64, shape: vec![2, 2], data: vec![0u8; 10] };
        assert!(codec.encode(&Value::Array(bad), 0).is_err());
    }
}
