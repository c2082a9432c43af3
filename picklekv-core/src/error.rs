// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! # Store Error Taxonomy
//!
//! `StoreError` is the single error type returned by every fallible operation
//! in this crate, from header validation up through the top-level [`Store`]
//! (`Store` lives in the `picklekv` crate; this crate only defines the
//! vocabulary). Each variant maps to one row of the error table in the store
//! design: `NotFound`, `NotWritable`, `InvalidFormat`, `InvalidState`,
//! `InvalidArgument`, `NoMatchingCodec`, and `Io`. `LockUnavailable` is
//! deliberately not a variant here, because it is downgraded to a `tracing`
//! warning rather than surfaced as an error (see `picklekv::infrastructure`).

use thiserror::Error;

/// Errors produced while reading, writing, or maintaining a store file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {0:?}")]
    KeyNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store is not writable (opened read-only)")]
    NotWritable,

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no codec could handle this value or payload")]
    NoMatchingCodec,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound(key.into())
    }

    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
