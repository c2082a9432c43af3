// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # picklekv
//!
//! A persistent key-value store whose file is, at every point in time it is
//! not mid-mutation, a valid pickle protocol 4 object stream — one that
//! deserializes in any stock Python `pickle.load` to a single `dict`. This
//! crate is the concrete, I/O-performing half of that design; the frame
//! layout and codec contract it builds on live in `picklekv-core`.
//!
//! ## Layout
//!
//! - [`infrastructure::store`] — [`infrastructure::store::Store`], the
//!   public entry point: open/create/convert a file, get/put/delete/vacuum.
//! - [`infrastructure::byte_file`] — the two concrete
//!   [`picklekv_core::ByteFile`] backends: a local file accessed through
//!   positioned reads/writes (with `memmap2` reserved for zero-copy bulk
//!   array reads), and a block-cached remote file read over HTTP range
//!   requests.
//! - [`infrastructure::codecs`] — the two bundled
//!   [`picklekv_core::Codec`] implementations: a catch-all generic object
//!   codec and a bulk zero-copy array codec.
//! - [`infrastructure::cache`] — the in-memory index rebuilt from (and
//!   invalidated against) the file's revision counter.
//! - [`infrastructure::config`], [`infrastructure::logging`] — the ambient
//!   stack.
//!
//! Everything above sits on the frame-layout and error types re-exported
//! from [`picklekv_core`].

pub mod infrastructure;

pub use picklekv_core::{ByteFile, Codec, Entry, Header, Result, StoreError, Value};

pub use infrastructure::config::StoreConfig;
pub use infrastructure::store::{MappedArray, Store};
