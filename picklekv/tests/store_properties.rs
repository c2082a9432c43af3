// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Property tests for the universal invariants the container format is
//! supposed to hold under arbitrary sequences of mutations: header/
//! terminator validity, round-tripping through the generic and bulk-array
//! codecs, "last op wins" key-set semantics, revision monotonicity, vacuum
//! only ever shrinking the file when there's a tombstone to reclaim, and
//! cross-reader compatibility (an independent decode of the raw bytes sees
//! the same mapping the store does).

use std::collections::BTreeMap;
use std::fs;

use proptest::prelude::*;

use picklekv::infrastructure::codecs::decode_stream;
use picklekv_core::header::Header;
use picklekv_core::opcode;
use picklekv_core::terminator;
use picklekv_core::value::{ArrayValue, DType, Value};
use picklekv::{Store, StoreConfig};

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Str),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 16, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Tuple),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Dict),
        ]
    })
}

fn arb_array_value() -> impl Strategy<Value = Value> {
    (1u64..6, 1u64..6).prop_flat_map(|(rows, cols)| {
        let count = (rows * cols) as usize;
        prop::collection::vec(any::<u8>(), count * 4).prop_map(move |data| {
            Value::Array(ArrayValue { dtype: DType::I32, shape: vec![rows, cols], data })
        })
    })
}

proptest! {
    /// §8: "Round-trip: put(k, v); get(k) yields a value equal to v under
    /// the codec's equality."
    #[test]
    fn put_get_round_trips_through_generic_codec(key in "[a-zA-Z0-9_]{1,32}", value in arb_value()) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        store.put(&key, value.clone()).unwrap();
        let got = store.get(&key).unwrap();
        prop_assert_eq!(got, value);
    }

    /// Same round-trip property for the bulk-array codec, where the spec
    /// calls out equality as "element-wise" — `ArrayValue`'s derived
    /// `PartialEq` compares the raw byte buffer directly, which is
    /// element-wise equality for a fixed-width dtype.
    #[test]
    fn put_get_round_trips_through_bulk_array_codec(key in "[a-zA-Z0-9_]{1,32}", value in arb_array_value()) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        store.put(&key, value.clone()).unwrap();
        let got = store.get(&key).unwrap();
        prop_assert_eq!(got, value);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Put(String, i64),
    Del(String),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let key = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d"), Just("e")].prop_map(String::from);
    prop_oneof![
        (key.clone(), any::<i64>()).prop_map(|(k, v)| Op::Put(k, v)),
        key.prop_map(Op::Del),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// §8: "For any sequence of puts/dels, set(keys(S)) == { k : last op on
    /// k was put }", plus header/terminator validity and cross-reader
    /// compatibility with an independent decode of the raw file.
    #[test]
    fn sequence_of_puts_and_dels_matches_last_op_semantics(ops in prop::collection::vec(arb_op(), 0..40)) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        let mut model: BTreeMap<String, i64> = BTreeMap::new();
        let mut any_tombstone_created = false;

        for op in &ops {
            match op {
                Op::Put(k, v) => {
                    if model.contains_key(k) {
                        any_tombstone_created = true;
                    }
                    model.insert(k.clone(), *v);
                    store.put(k, Value::Int(*v)).unwrap();
                }
                Op::Del(k) => {
                    let existed = model.remove(k).is_some();
                    let result = store.del(k);
                    prop_assert_eq!(result.is_ok(), existed);
                    if existed {
                        any_tombstone_created = true;
                    }
                }
            }
        }

        // Header and terminator remain structurally valid after any
        // sequence of mutations (§8 universal invariant).
        let file_len = fs::metadata(tmp.path()).unwrap().len();
        {
            let reader = picklekv::infrastructure::byte_file::local::LocalByteFile::open_path(tmp.path(), false).unwrap();
            prop_assert!(Header::read(&reader).is_ok());
            prop_assert!(terminator::verify(&reader, file_len - opcode::TERMINATOR_LEN).is_ok());
        }

        let model_keys: std::collections::HashSet<String> = model.keys().cloned().collect();
        prop_assert_eq!(store.keys().unwrap(), model_keys);
        for (k, v) in &model {
            prop_assert_eq!(store.get(k).unwrap(), Value::Int(*v));
        }

        // Cross-reader compatibility: an independent decode of the raw
        // bytes from offset 0 sees exactly the same mapping.
        let raw = fs::read(tmp.path()).unwrap();
        let (decoded, consumed) = decode_stream(&raw).unwrap();
        prop_assert_eq!(consumed, raw.len());
        let Value::Dict(decoded_map) = decoded else {
            panic!("top-level pickle value must be a dict");
        };
        let expected: BTreeMap<String, Value> = model.iter().map(|(k, v)| (k.clone(), Value::Int(*v))).collect();
        prop_assert_eq!(decoded_map, expected);

        // Vacuum only ever shrinks the file when a tombstone exists, and
        // always preserves the live key/value set.
        let len_before_vacuum = fs::metadata(tmp.path()).unwrap().len();
        store.vacuum(4096).unwrap();
        let len_after_vacuum = fs::metadata(tmp.path()).unwrap().len();
        if any_tombstone_created {
            prop_assert!(len_after_vacuum < len_before_vacuum);
        } else {
            prop_assert_eq!(len_after_vacuum, len_before_vacuum);
        }

        let model_keys: std::collections::HashSet<String> = model.keys().cloned().collect();
        prop_assert_eq!(store.keys().unwrap(), model_keys);
        for (k, v) in &model {
            prop_assert_eq!(store.get(k).unwrap(), Value::Int(*v));
        }
    }

    /// §8: "Revision monotonicity: every successful mutating operation
    /// strictly changes revision (wraparound aside)."
    #[test]
    fn every_successful_mutation_changes_revision(ops in prop::collection::vec(arb_op(), 1..20)) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        let mut present: std::collections::HashSet<String> = std::collections::HashSet::new();

        for op in &ops {
            let before = store.revision().unwrap();
            match op {
                Op::Put(k, v) => {
                    store.put(k, Value::Int(*v)).unwrap();
                    present.insert(k.clone());
                    let after = store.revision().unwrap();
                    prop_assert_ne!(before, after);
                }
                Op::Del(k) => {
                    let existed = present.remove(k);
                    let result = store.del(k);
                    if existed {
                        result.unwrap();
                        let after = store.revision().unwrap();
                        prop_assert_ne!(before, after);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
            }
        }
    }

    /// §8: "Idempotence: del(k); del(k) — second call raises NotFound;
    /// store state unchanged between them except revision."
    #[test]
    fn second_delete_of_a_key_always_fails(key in "[a-zA-Z0-9_]{1,16}", value in any::<i64>()) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        store.put(&key, Value::Int(value)).unwrap();
        store.del(&key).unwrap();
        prop_assert!(store.del(&key).is_err());
        prop_assert!(store.get(&key).is_err());
        prop_assert!(!store.contains(&key));
    }
}
