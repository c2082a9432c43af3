// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Integration tests against real files on disk, covering the concrete
//! scenarios spelled out for the container format: the exact byte size of
//! a fresh store, the tombstone single-byte flip, vacuum reclaiming
//! tombstoned space, converting a plain pickled dict in place, and
//! recovering from a truncated file via `fsck`.

use std::collections::BTreeMap;
use std::fs;

use picklekv_core::opcode;
use picklekv_core::value::Value;
use picklekv::{Store, StoreConfig};

fn push_str(out: &mut Vec<u8>, s: &str) {
    out.push(opcode::SHORT_BINUNICODE);
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

fn push_int(out: &mut Vec<u8>, v: i32) {
    out.push(opcode::BININT);
    out.extend_from_slice(&v.to_le_bytes());
}

#[test]
fn empty_store_is_exactly_header_plus_terminator() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    drop(store);
    let len = fs::metadata(tmp.path()).unwrap().len();
    assert_eq!(len, 24 + 11);
}

#[test]
fn single_insert_round_trips() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("test", Value::Str("abc".to_string())).unwrap();
    assert_eq!(store.get("test").unwrap(), Value::Str("abc".to_string()));
    assert!(store.contains("test"));
    assert_eq!(store.keys().unwrap(), ["test".to_string()].into_iter().collect());
}

#[test]
fn tombstoning_flips_a_single_byte_and_leaves_file_size_unchanged() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("test", Value::Bool(true)).unwrap();

    let before = fs::read(tmp.path()).unwrap();
    store.del("test").unwrap();
    let after = fs::read(tmp.path()).unwrap();

    assert_eq!(before.len(), after.len());
    let diffs: Vec<usize> = (0..before.len()).filter(|&i| before[i] != after[i]).collect();
    assert_eq!(diffs.len(), 1, "exactly one byte should change");
    assert_eq!(before[diffs[0]], opcode::NEWTRUE);
    assert_eq!(after[diffs[0]], opcode::POP);

    assert!(!store.contains("test"));
    assert!(store.get("test").is_err());
}

#[test]
fn second_delete_of_same_key_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("k", Value::Int(1)).unwrap();
    store.del("k").unwrap();
    assert!(store.del("k").is_err());
}

#[test]
fn vacuum_reclaims_tombstoned_space_and_preserves_live_values() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();

    let blob = vec![0xABu8; 2 * 1024 * 1024];
    store.put("a", Value::Int(1)).unwrap();
    store.put("b", Value::Int(2)).unwrap();
    store.put("c", Value::Int(3)).unwrap();
    store.put("d", Value::Bytes(blob.clone())).unwrap();
    store.put("e", Value::Int(5)).unwrap();
    store.put("f", Value::Int(6)).unwrap();
    store.put("g", Value::Int(7)).unwrap();
    store.put("h", Value::Int(8)).unwrap();

    store.del("b").unwrap();
    store.del("d").unwrap();
    store.del("f").unwrap();
    store.del("g").unwrap();

    let len_before_vacuum = fs::metadata(tmp.path()).unwrap().len();
    store.vacuum(1024 * 1024).unwrap();
    let len_after_vacuum = fs::metadata(tmp.path()).unwrap().len();

    assert!(len_after_vacuum < len_before_vacuum, "vacuum should shrink the file");
    assert_eq!(store.keys().unwrap(), ["a", "c", "e", "h"].into_iter().map(String::from).collect());
    assert_eq!(store.get("a").unwrap(), Value::Int(1));
    assert_eq!(store.get("c").unwrap(), Value::Int(3));
    assert_eq!(store.get("e").unwrap(), Value::Int(5));
    assert_eq!(store.get("h").unwrap(), Value::Int(8));
}

#[test]
fn vacuum_with_no_tombstones_is_a_no_op_on_keys() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("a", Value::Int(1)).unwrap();
    store.put("b", Value::Int(2)).unwrap();
    store.vacuum(1024).unwrap();
    assert_eq!(store.keys().unwrap(), ["a", "b"].into_iter().map(String::from).collect());
}

#[test]
fn opening_a_plain_pickled_dict_converts_it_in_place() {
    let tmp = tempfile::NamedTempFile::new().unwrap();

    // PROTO 4; EMPTY_DICT; MARK; "a" 1; "b" (1, 2, 3); "c" "test"; SETITEMS; STOP
    // — the shape of a real `pickle.dumps({"a": 1, "b": (1, 2, 3), "c": "test"})`.
    let mut raw = Vec::new();
    raw.push(opcode::PROTO);
    raw.push(4);
    raw.push(opcode::EMPTY_DICT);
    raw.push(opcode::MARK);
    push_str(&mut raw, "a");
    push_int(&mut raw, 1);
    push_str(&mut raw, "b");
    push_int(&mut raw, 1);
    push_int(&mut raw, 2);
    push_int(&mut raw, 3);
    raw.push(opcode::TUPLE3);
    push_str(&mut raw, "c");
    push_str(&mut raw, "test");
    raw.push(opcode::SETITEMS);
    raw.push(opcode::STOP);
    fs::write(tmp.path(), &raw).unwrap();

    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.keys().unwrap(), ["a", "b", "c"].into_iter().map(String::from).collect());
    assert_eq!(store.get("a").unwrap(), Value::Int(1));
    assert_eq!(store.get("b").unwrap(), Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    assert_eq!(store.get("c").unwrap(), Value::Str("test".to_string()));

    drop(store);
    // After conversion the file is a normal store: reopening must not
    // attempt conversion again.
    let mut reopened = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    assert_eq!(reopened.keys().unwrap(), ["a", "b", "c"].into_iter().map(String::from).collect());
}

#[test]
fn converting_a_non_dict_pickle_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut raw = Vec::new();
    raw.push(opcode::PROTO);
    raw.push(4);
    push_int(&mut raw, 42);
    raw.push(opcode::STOP);
    fs::write(tmp.path(), &raw).unwrap();

    assert!(Store::open(tmp.path(), StoreConfig::default()).is_err());
}

#[test]
fn fsck_recovers_from_a_file_truncated_mid_last_entry() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("a", Value::Int(1)).unwrap();
    store.put("b", Value::Int(2)).unwrap();
    let len_before_c = fs::metadata(tmp.path()).unwrap().len();
    store.put("c", Value::Int(3)).unwrap();
    let len_after_c = fs::metadata(tmp.path()).unwrap().len();
    drop(store);

    // Simulate a crash partway through writing the last entry: truncate to
    // somewhere between the end of "b" and the end of "c", which also
    // discards the terminator that followed it.
    let crash_point = len_before_c + (len_after_c - len_before_c) / 2;
    let file = fs::OpenOptions::new().write(true).open(tmp.path()).unwrap();
    file.set_len(crash_point).unwrap();
    drop(file);

    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.fsck().unwrap();

    assert_eq!(store.keys().unwrap(), ["a", "b"].into_iter().map(String::from).collect());
    assert_eq!(store.get("a").unwrap(), Value::Int(1));
    assert_eq!(store.get("b").unwrap(), Value::Int(2));

    // The store is writable again after recovery.
    store.put("d", Value::Int(4)).unwrap();
    assert_eq!(store.get("d").unwrap(), Value::Int(4));
}

#[test]
fn read_only_store_rejects_mutation() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    {
        let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
        store.put("a", Value::Int(1)).unwrap();
    }

    let mut store = Store::open(tmp.path(), StoreConfig::read_only()).unwrap();
    assert_eq!(store.get("a").unwrap(), Value::Int(1));
    assert!(store.put("b", Value::Int(2)).is_err());
    assert!(store.del("a").is_err());
}

#[test]
fn decode_stream_reads_a_real_store_file_as_a_plain_pickle() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();
    store.put("a", Value::Int(1)).unwrap();
    store.put("b", Value::Str("hi".to_string())).unwrap();
    store.put("c", Value::Int(3)).unwrap();
    store.del("c").unwrap();
    drop(store);

    // The whole point of the container format: nothing below reaches
    // through the Store at all, just the bare opcode decoder a stock
    // pickle-protocol-4 reader would run.
    let raw = fs::read(tmp.path()).unwrap();
    let (decoded, consumed) = picklekv::infrastructure::codecs::decode_stream(&raw).unwrap();
    assert_eq!(consumed, raw.len());
    let Value::Dict(map) = decoded else {
        panic!("top-level value must be a dict");
    };
    assert_eq!(map.len(), 2);
    assert_eq!(map.get("a"), Some(&Value::Int(1)));
    assert_eq!(map.get("b"), Some(&Value::Str("hi".to_string())));
    assert!(!map.contains_key("c"));
}

#[test]
fn nested_dict_round_trips_through_the_generic_codec() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let mut store = Store::open(tmp.path(), StoreConfig::default()).unwrap();

    let mut inner = BTreeMap::new();
    inner.insert("x".to_string(), Value::Int(1));
    inner.insert("y".to_string(), Value::List(vec![Value::None, Value::Bool(true), Value::Float(2.5)]));
    let value = Value::Dict(inner);

    store.put("meta", value.clone()).unwrap();
    assert_eq!(store.get("meta").unwrap(), value);
}
