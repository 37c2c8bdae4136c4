//! Streaming hash filter devices.
//!
//! One filter serves SHA-256, SHA-1 and MD5; the algorithms differ only in
//! digest length and core. What the filter does with the digest depends on
//! the open mode:
//!
//! | Mode  | Behavior |
//! |-------|----------|
//! | `r`   | pull everything from the underlying, then serve digest bytes |
//! | `w`   | absorb writes; close writes the full digest to the underlying |
//! | `rw`  | absorb writes; a read serves the digest; the next write restarts |
//! | `rw+` | absorb writes; each read serves the digest of the running state |
//!
//! Seeking is supported on the read-back side, within `[0, digest_len]`.
//! The `<` mode flag pins the scalar compression routine.

pub mod md5;
pub mod sha1;
pub mod sha256;

pub use md5::md5;
pub use sha1::sha1;
pub use sha256::sha256;

use crate::device::{Backend, Device, DeviceFlags, Direction, IoStatus, SeekPos};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

/// The supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Md5,
}

impl HashAlgorithm {
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => sha256::DIGEST_LEN,
            HashAlgorithm::Sha1 => sha1::DIGEST_LEN,
            HashAlgorithm::Md5 => md5::DIGEST_LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Md5 => "md5",
        }
    }
}

/// Object-safe streaming digest, implemented by the three cores.
trait Digest: Send {
    fn update(&mut self, data: &[u8]);
    fn peek(&self) -> Vec<u8>;
    fn reset(&mut self);
}

macro_rules! impl_digest {
    ($core:ty) => {
        impl Digest for $core {
            fn update(&mut self, data: &[u8]) {
                <$core>::update(self, data)
            }
            fn peek(&self) -> Vec<u8> {
                <$core>::peek(self).to_vec()
            }
            fn reset(&mut self) {
                <$core>::reset(self)
            }
        }
    };
}

impl_digest!(sha256::Sha256);
impl_digest!(sha1::Sha1);
impl_digest!(md5::Md5);

fn make_core(algo: HashAlgorithm, no_accel: bool) -> Box<dyn Digest> {
    match (algo, no_accel) {
        (HashAlgorithm::Sha256, true) => Box::new(sha256::Sha256::scalar()),
        (HashAlgorithm::Sha256, false) => Box::new(sha256::Sha256::new()),
        (HashAlgorithm::Sha1, true) => Box::new(sha1::Sha1::scalar()),
        (HashAlgorithm::Sha1, false) => Box::new(sha1::Sha1::new()),
        (HashAlgorithm::Md5, true) => Box::new(md5::Md5::scalar()),
        (HashAlgorithm::Md5, false) => Box::new(md5::Md5::new()),
    }
}

/// The hash filter. See the module docs for the per-mode behavior table.
pub struct HashFilter {
    inner: Device,
    algo: HashAlgorithm,
    core: Box<dyn Digest>,
    mode: OpenMode,
    /// Digest snapshot currently being served on the read-back side.
    snapshot: Option<Vec<u8>>,
    snap_pos: usize,
    /// A digest was observed since the last write (one-shot reset rule).
    served: bool,
}

impl HashFilter {
    /// Stack a hash filter over `inner`.
    pub fn open(inner: Device, algo: HashAlgorithm, mode: &str) -> DeviceResult<Device> {
        Device::open(
            HashFilter {
                inner,
                algo,
                core: make_core(algo, false),
                mode: OpenMode::default(),
                snapshot: None,
                snap_pos: 0,
                served: false,
            },
            mode,
        )
    }

    /// Exhaust the underlying and absorb everything (pull shape).
    fn pull_all(&mut self) -> DeviceResult<IoStatus> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if self.inner.eof() {
                    return Ok(IoStatus::End);
                }
                return Ok(IoStatus::Pending);
            }
            self.core.update(&chunk[..n]);
        }
    }

    fn ensure_snapshot(&mut self) -> DeviceResult<Option<IoStatus>> {
        if self.snapshot.is_some() {
            return Ok(None);
        }
        if self.mode.read && !self.mode.write {
            // Pull shape: the digest covers the whole underlying stream.
            match self.pull_all()? {
                IoStatus::End => {}
                other => return Ok(Some(other)),
            }
        }
        self.snapshot = Some(self.core.peek());
        self.snap_pos = 0;
        self.served = true;
        Ok(None)
    }
}

impl Backend for HashFilter {
    fn kind(&self) -> &'static str {
        "hash"
    }

    fn flags(&self) -> DeviceFlags {
        if self.mode.read {
            DeviceFlags::SEEKABLE
        } else {
            DeviceFlags::empty()
        }
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        self.mode = *mode;
        self.core = make_core(self.algo, mode.no_accel);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if let Some(status) = self.ensure_snapshot()? {
            return Ok(status);
        }
        let digest = self.snapshot.as_ref().map(Vec::as_slice).unwrap_or(&[]);
        if self.snap_pos >= digest.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(digest.len() - self.snap_pos);
        buf[..n].copy_from_slice(&digest[self.snap_pos..self.snap_pos + n]);
        self.snap_pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        self.core.update(buf);
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        if !self.mode.read {
            return Err(DeviceError::NotSeekable);
        }
        if self.ensure_snapshot()?.is_some() {
            return Err(DeviceError::BadState);
        }
        let len = self.algo.digest_len();
        let target = match pos {
            SeekPos::Start(p) => p as i64,
            SeekPos::Current(d) => self.snap_pos as i64 + d,
            SeekPos::End(d) => len as i64 + d,
        };
        if target < 0 || target as usize > len {
            return Err(DeviceError::BadState);
        }
        self.snap_pos = target as usize;
        Ok(self.snap_pos as u64)
    }

    fn supports_switch(&self) -> bool {
        true
    }

    fn switch(&mut self, to: Direction) -> DeviceResult<()> {
        if to == Direction::Writing {
            // One-shot shape: a digest has been served, the next write
            // starts a fresh message. Peek shape keeps accumulating.
            if !self.mode.update && self.served {
                self.core.reset();
            }
            self.snapshot = None;
            self.snap_pos = 0;
            self.served = false;
        }
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.mode.write && !self.mode.read {
            // Push-and-emit shape: the digest goes to the underlying.
            let digest = self.core.peek();
            if let Err(e) = self.inner.write_all(&digest) {
                first.get_or_insert(e);
            }
        }
        if let Err(e) = self.inner.close() {
            first.get_or_insert(e);
        }
        match first {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn clear_error(&mut self) {
        self.inner.clear_error();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{dyn_sink, str_source};

    #[test]
    fn test_pull_shape_serves_digest() {
        let src = str_source("abc").unwrap();
        let mut dev = HashFilter::open(src, HashAlgorithm::Sha256, "r").unwrap();
        let mut out = Vec::new();
        dev.read_to_end(&mut out).unwrap();
        assert_eq!(out, sha256(b"abc"));
        assert!(dev.eof());
    }

    #[test]
    fn test_pull_shape_partial_reads() {
        let src = str_source("abc").unwrap();
        let mut dev = HashFilter::open(src, HashAlgorithm::Sha256, "r").unwrap();
        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        assert_eq!(dev.read(&mut first).unwrap(), 16);
        assert_eq!(dev.read(&mut second).unwrap(), 16);
        let mut whole = first.to_vec();
        whole.extend_from_slice(&second);
        assert_eq!(whole, sha256(b"abc"));
    }

    #[test]
    fn test_push_shape_emits_on_close() {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = HashFilter::open(sink, HashAlgorithm::Sha256, "w").unwrap();
        dev.write(b"abc").unwrap();
        dev.close().unwrap();
        // The full digest, not a prefix.
        assert_eq!(&*bytes.lock(), &sha256(b"abc"));
    }

    #[test]
    fn test_push_shape_md5_and_sha1_lengths() {
        for (algo, len) in [(HashAlgorithm::Md5, 16), (HashAlgorithm::Sha1, 20)] {
            let (sink, bytes) = dyn_sink().unwrap();
            let mut dev = HashFilter::open(sink, algo, "w").unwrap();
            dev.write(b"abc").unwrap();
            dev.close().unwrap();
            assert_eq!(bytes.lock().len(), len);
        }
    }

    #[test]
    fn test_one_shot_shape_resets_after_read() {
        let (sink, _bytes) = dyn_sink().unwrap();
        let mut dev = HashFilter::open(sink, HashAlgorithm::Sha256, "rw").unwrap();
        dev.write(b"abc").unwrap();
        let mut digest = [0u8; 32];
        assert_eq!(dev.read(&mut digest).unwrap(), 32);
        assert_eq!(digest, sha256(b"abc"));
        // The next write starts a fresh message.
        dev.write(b"def").unwrap();
        assert_eq!(dev.read(&mut digest).unwrap(), 32);
        assert_eq!(digest, sha256(b"def"));
    }

    #[test]
    fn test_peek_shape_accumulates() {
        let (sink, _bytes) = dyn_sink().unwrap();
        let mut dev = HashFilter::open(sink, HashAlgorithm::Sha256, "rw+").unwrap();
        dev.write(b"abc").unwrap();
        let mut digest = [0u8; 32];
        assert_eq!(dev.read(&mut digest).unwrap(), 32);
        assert_eq!(digest, sha256(b"abc"));
        dev.write(b"def").unwrap();
        assert_eq!(dev.read(&mut digest).unwrap(), 32);
        assert_eq!(digest, sha256(b"abcdef"));
        dev.close().unwrap();
    }

    #[test]
    fn test_seek_within_digest() {
        let src = str_source("abc").unwrap();
        let mut dev = HashFilter::open(src, HashAlgorithm::Sha256, "r").unwrap();
        let mut head = [0u8; 4];
        dev.read(&mut head).unwrap();
        dev.seek(SeekPos::Start(0)).unwrap();
        let mut again = [0u8; 4];
        dev.read(&mut again).unwrap();
        assert_eq!(head, again);
        // Offsets beyond the digest are rejected.
        assert!(dev.seek(SeekPos::Start(33)).is_err());
    }

    #[test]
    fn test_scalar_pin_flag_matches_default() {
        let a = {
            let src = str_source("abc").unwrap();
            let mut dev = HashFilter::open(src, HashAlgorithm::Sha256, "r").unwrap();
            let mut out = Vec::new();
            dev.read_to_end(&mut out).unwrap();
            out
        };
        let b = {
            let src = str_source("abc").unwrap();
            let mut dev = HashFilter::open(src, HashAlgorithm::Sha256, "r<").unwrap();
            let mut out = Vec::new();
            dev.read_to_end(&mut out).unwrap();
            out
        };
        assert_eq!(a, b);
    }
}
