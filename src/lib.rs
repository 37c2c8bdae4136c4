//! nxio: composable byte-oriented I/O devices and filters.
//!
//! Everything in this crate speaks one uniform device contract: primitive
//! endpoints (memory buffers, string sources, files, null sinks) and
//! stackable transformation filters (hashes, block ciphers, padding,
//! hex/base64, tee, concat, repeat, limiter, cross-thread ring) are all a
//! [`Device`]. Clients assemble pipelines and move bytes through them with a
//! small vocabulary: read, write, seek, flush, close, printf/scanf,
//! getc/putc.
//!
//! ```text
//! ┌────────┐   ┌───────────┐   ┌──────────────┐   ┌────────────┐   ┌─────────┐
//! │ client ├──▶│ pkcs7 pad ├──▶│ aes-cbc enc  ├──▶│ hex encode ├──▶│ buffer  │
//! └────────┘   └───────────┘   └──────────────┘   └────────────┘   └─────────┘
//! ```
//!
//! Data flow is client-driven and strictly linear: an operation on the
//! outermost device recursively invokes the same operation down the chain.
//! The one concession to concurrency is the [`ring::ThreadRing`], the
//! designated hand-off point between threads.
//!
//! # Quick start
//!
//! ```rust
//! use nxio::codec::Base64Encoder;
//! use nxio::mem::str_source;
//!
//! let src = str_source("any carnal pleasur").unwrap();
//! let mut b64 = Base64Encoder::open(src, "r").unwrap();
//! let mut out = Vec::new();
//! b64.read_to_end(&mut out).unwrap();
//! assert_eq!(out, b"YW55IGNhcm5hbCBwbGVhc3Vy");
//! ```
//!
//! Custom kinds implement [`device::Backend`] and open with
//! [`Device::open`] like everything else.

pub mod cipher;
pub mod codec;
pub mod compose;
pub mod device;
pub mod error;
pub mod file;
pub mod fmt;
pub mod hash;
pub mod mem;
pub mod mode;
pub mod padding;
pub mod ring;

pub use cipher::{AesFilter, CipherMode, CryptoDir};
pub use codec::{Base64Decoder, Base64Encoder, HexDecoder, HexEncoder};
pub use compose::{shared, Concat, Limiter, Repeat, SharedDevice, Tee};
pub use device::{
    Backend, BufferPolicy, Device, DeviceFlags, Direction, IoStatus, SeekPos,
};
pub use error::{DeviceError, DeviceResult};
pub use file::FileDevice;
pub use fmt::{printf, scanf, ScanValue, Value};
pub use hash::{HashAlgorithm, HashFilter};
pub use mem::{DynBuffer, MemBuffer, NullSink, StrSource};
pub use mode::OpenMode;
pub use padding::{PadEncoder, Pkcs7Unpad};
pub use ring::{RingOptions, Shutdown, ThreadRing};
