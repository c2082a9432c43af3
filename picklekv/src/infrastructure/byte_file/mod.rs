// /////////////////////////////////////////////////////////////////////////////
// picklekv
// /////////////////////////////////////////////////////////////////////////////

//! Concrete [`picklekv_core::ByteFile`] backends.

pub mod local;
pub mod remote;

pub use local::LocalByteFile;
pub use remote::RemoteByteFile;
