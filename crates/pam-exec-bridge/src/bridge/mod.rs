//! Wire-level concerns: frame codec, RPC method protocol, and the binary
//! extension records that travel through the host's prompt mechanism.

pub mod codec;
pub mod extension;
pub mod protocol;
