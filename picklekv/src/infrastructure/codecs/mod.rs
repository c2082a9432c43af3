// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! The two bundled [`picklekv_core::Codec`] implementations, plus the
//! internal machinery [`generic::GenericCodec`] is built on.
//!
//! Replaces the source's class-reflection codec discovery
//! (`all_subclasses(BasePickler)`) with an explicit registry: callers pass
//! a codec list to [`crate::infrastructure::store::Store::open`], or get
//! [`default_codecs`] if they don't care.

pub mod bulk_array;
pub mod generic;
mod memo;
mod pickle_ops;

pub use bulk_array::BulkArrayCodec;
pub use generic::GenericCodec;
pub use pickle_ops::decode_stream;
use picklekv_core::Codec;

/// The codec list every `Store::open` gets unless the caller overrides it:
/// the bulk-array codec first (so arrays get their dedicated layout), the
/// generic codec last as the catch-all.
pub fn default_codecs() -> Vec<Box<dyn Codec>> {
    vec![Box::new(BulkArrayCodec), Box::new(GenericCodec)]
}
