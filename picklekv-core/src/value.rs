// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Value
//!
//! Marshaling an arbitrary native object is explicitly out of scope for this
//! crate (the store only needs a pluggable codec interface; how a codec
//! marshals a language-native object is its own business). `Value` is the
//! concrete object model the *default* codec (`GenericCodec`, in the
//! `picklekv` crate) marshals — a small, self-contained tree type standing in
//! for "arbitrary picklable object" so the rest of the store has something
//! concrete to round-trip.

use std::collections::BTreeMap;

/// A value storable through the default (generic) codec.
///
/// `Dict` uses a `BTreeMap<String, Value>` rather than arbitrary
/// value-keyed maps: the store's own key space is already string-keyed, and
/// nested dict values in practice are metadata blobs, not general hash maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// A dense, rectangular array of numbers, the stand-in for the bulk-array
    /// (e.g. tensor) values the specialized `BulkArrayCodec` in `picklekv`
    /// gives a zero-copy mapped representation to. Held here as an owned
    /// copy; [`crate::Codec::decode`] always returns one of these even when
    /// the entry was originally produced from a mapped write, since the
    /// `Codec` contract works over already-read bytes. Callers who need the
    /// zero-copy path go through the store's dedicated mapped-array
    /// accessor instead of this variant.
    Array(ArrayValue),
}

/// Element type of an [`Value::Array`], matching a fixed-width numeric
/// layout the `BulkArrayCodec` can lay out contiguously on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
}

impl DType {
    pub fn item_size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 => 1,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            DType::F32 => 0,
            DType::F64 => 1,
            DType::I32 => 2,
            DType::I64 => 3,
            DType::U8 => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            1 => Some(DType::F64),
            2 => Some(DType::I32),
            3 => Some(DType::I64),
            4 => Some(DType::U8),
            _ => None,
        }
    }
}

/// A rectangular array: element type, shape, and raw little-endian element
/// bytes in row-major order. `data.len()` must equal
/// `shape.iter().product::<u64>() as usize * dtype.item_size()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    pub dtype: DType,
    pub shape: Vec<u64>,
    pub data: Vec<u8>,
}

impl ArrayValue {
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<ArrayValue> for Value {
    fn from(v: ArrayValue) -> Self {
        Value::Array(v)
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}
