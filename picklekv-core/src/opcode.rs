// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Byte constants for the pickle protocol-4 opcodes this crate emits or
//! parses. Every frame in the container format (header, entry, terminator)
//! is built out of these bytes; see [`crate::header`], [`crate::entry`], and
//! [`crate::terminator`] for how they're assembled.
//!
//! Values match CPython's `pickle` module (`pickletools.opcodes`) exactly,
//! since a file written here must be byte-for-byte readable by any stock
//! protocol-4 deserializer.

pub const PROTO: u8 = 0x80;
pub const STOP: u8 = 0x2e;
pub const MARK: u8 = 0x28;
pub const POP: u8 = 0x30;
pub const POP_MARK: u8 = 0x31;
pub const NONE: u8 = 0x4e;
pub const NEWTRUE: u8 = 0x88;
pub const NEWFALSE: u8 = 0x89;
pub const BININT: u8 = 0x4a;
pub const BININT1: u8 = 0x4b;
pub const BININT2: u8 = 0x4d;
pub const LONG1: u8 = 0x8a;
pub const BINFLOAT: u8 = 0x47;
pub const BINUNICODE: u8 = 0x58;
pub const SHORT_BINUNICODE: u8 = 0x8c;
pub const BINUNICODE8: u8 = 0x8d;
pub const BINBYTES: u8 = 0x42;
pub const SHORT_BINBYTES: u8 = 0x43;
pub const BINBYTES8: u8 = 0x8e;
pub const EMPTY_LIST: u8 = 0x5d;
pub const EMPTY_DICT: u8 = 0x7d;
pub const EMPTY_TUPLE: u8 = 0x29;
pub const TUPLE: u8 = 0x74;
pub const TUPLE1: u8 = 0x85;
pub const TUPLE2: u8 = 0x86;
pub const TUPLE3: u8 = 0x87;
pub const APPEND: u8 = 0x61;
pub const APPENDS: u8 = 0x65;
pub const SETITEM: u8 = 0x73;
pub const SETITEMS: u8 = 0x75;
pub const DICT: u8 = 0x64;
pub const GET: u8 = 0x67;
pub const BINGET: u8 = 0x68;
pub const LONG_BINGET: u8 = 0x6a;
pub const PUT: u8 = 0x70;
pub const BINPUT: u8 = 0x71;
pub const LONG_BINPUT: u8 = 0x72;
pub const MEMOIZE: u8 = 0x94;
pub const FRAME: u8 = 0x95;

/// Frame length of the header's content (`BININT version POP BININT revision
/// POP MARK`), matching `_header._frame_length` in the design this crate's
/// layout is grounded on.
pub const HEADER_FRAME_CONTENT_LEN: u64 = 13;

/// Byte offset of the revision field from the start of the header.
pub const HEADER_REVISION_OFFSET: usize = 18;

/// Total byte length of the fixed header frame (`PROTO 4 FRAME <13> <13
/// bytes>`).
pub const HEADER_LEN: u64 = 2 + 9 + HEADER_FRAME_CONTENT_LEN;

/// Terminator content (`DICT STOP`).
pub const TERMINATOR_DATA: [u8; 11] = [
    FRAME, 2, 0, 0, 0, 0, 0, 0, 0, // FRAME <u64 = 2>
    DICT, STOP,
];

pub const TERMINATOR_LEN: u64 = TERMINATOR_DATA.len() as u64;
