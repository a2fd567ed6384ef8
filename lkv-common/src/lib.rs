// lkv-common - Shared wire types and protocol definitions for LineKV
//
// This crate defines the line protocol: classification, push envelopes and
// the typed decoders used by the client.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
