// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Concrete backends and the store built on top of them.

pub mod byte_file;
pub mod cache;
pub mod codecs;
pub mod config;
pub mod logging;
pub mod store;
