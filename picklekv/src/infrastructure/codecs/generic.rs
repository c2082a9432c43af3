// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # GenericCodec
//!
//! The catch-all default codec. Every store carries one, and it sits at
//! the lowest priority so any specialized codec (e.g.
//! [`super::bulk_array::BulkArrayCodec`]) gets first refusal on a value or
//! a payload.
//!
//! `write` in the source this is grounded on is `pickle.dumps` followed by
//! memo renumbering; here that's [`pickle_ops::encode`] followed by
//! [`memo::renumber`]. `read` wraps the stored bytes back in a synthetic
//! pickle envelope and deserializes — see [`pickle_ops::decode`].

use picklekv_core::error::Result;
use picklekv_core::value::Value;
use picklekv_core::Codec;

use super::{memo, pickle_ops};

/// Priority for the catch-all codec: always loses to a specialized codec,
/// always wins over nothing (every value is `can_encode`-able here).
pub const PRIORITY: i32 = -100;

#[derive(Debug, Default, Clone, Copy)]
pub struct GenericCodec;

impl Codec for GenericCodec {
    fn priority(&self) -> i32 {
        PRIORITY
    }

    fn name(&self) -> &'static str {
        "generic"
    }

    fn can_encode(&self, _value: &Value) -> bool {
        true
    }

    fn sniff(&self, _payload: &[u8]) -> bool {
        true
    }

    fn encode(&self, value: &Value, memo_start_idx: u32) -> Result<(Vec<u8>, u32)> {
        let raw = pickle_ops::encode(value);
        memo::renumber(&raw, memo_start_idx)
    }

    fn decode(&self, payload: &[u8]) -> Result<Value> {
        pickle_ops::decode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn round_trips_a_dict_shaped_value() {
        let codec = GenericCodec;
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Value::Int(42));
        map.insert("y".to_string(), Value::Str("hi".to_string()));
        let value = Value::Dict(map);

        let (payload, memo_max) = codec.encode(&value, 1).unwrap();
        assert_eq!(memo_max, 1);
        assert!(codec.sniff(&payload));
        let decoded = codec.decode(&payload).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn memo_max_never_decreases_across_independent_entries() {
        let codec = GenericCodec;
        let (_, first_max) = codec.encode(&Value::Str("a".to_string()), 1).unwrap();
        let (_, second_max) = codec.encode(&Value::Str("b".to_string()), first_max.max(1)).unwrap();
        assert!(second_max >= first_max);
    }
}
