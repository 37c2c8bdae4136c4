//! Bidirectional byte↔text codecs over the device contract.
//!
//! Both codecs work in either data-flow shape: opened `w` they transform
//! caller bytes and push the result down; opened `r` they pull from the
//! underlying and serve the transformed stream. Group remainders (a nibble,
//! a partial base64 quantum) are carried across calls; close flushes them.

pub mod base64;
pub mod hex;

pub use base64::{Base64Decoder, Base64Encoder};
pub use hex::{HexDecoder, HexEncoder};
