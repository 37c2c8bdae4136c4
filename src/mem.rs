//! In-memory primitive devices.
//!
//! - [`MemBuffer`]: a fixed-size byte span; writing past the end reports EOF,
//!   not an error.
//! - [`DynBuffer`]: a growable buffer (geometric growth) whose contents stay
//!   observable through a shared handle after the device has been moved into
//!   a filter chain.
//! - [`StrSource`]: a read-only view of a string; a NUL terminates it the way
//!   it would in C.
//! - [`NullSink`]: discards writes, EOF on read.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Backend, Device, DeviceFlags, IoStatus, SeekPos};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

fn resolve_seek(pos: SeekPos, cur: usize, len: usize) -> DeviceResult<usize> {
    let target = match pos {
        SeekPos::Start(p) => p as i64,
        SeekPos::Current(d) => cur as i64 + d,
        SeekPos::End(d) => len as i64 + d,
    };
    if target < 0 {
        return Err(DeviceError::BadState);
    }
    Ok(target as usize)
}

/// Fixed-size memory span device. Fully seekable; reads and writes advance a
/// single cursor; the span never grows.
pub struct MemBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl MemBuffer {
    pub fn new(size: usize) -> Self {
        MemBuffer {
            data: Arc::new(Mutex::new(vec![0; size])),
            pos: 0,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemBuffer {
            data: Arc::new(Mutex::new(data)),
            pos: 0,
        }
    }

    /// Shared handle to the backing span; stays valid after the device moves
    /// into a pipeline.
    pub fn contents(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.data)
    }
}

impl Backend for MemBuffer {
    fn kind(&self) -> &'static str {
        "membuf"
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::SEEKABLE
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        if mode.append {
            self.pos = self.data.lock().len();
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let data = self.data.lock();
        if self.pos >= data.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut data = self.data.lock();
        if self.pos >= data.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(data.len() - self.pos);
        data[self.pos..self.pos + n].copy_from_slice(&buf[..n]);
        self.pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        let len = self.data.lock().len();
        let target = resolve_seek(pos, self.pos, len)?;
        if target > len {
            return Err(DeviceError::BadState);
        }
        self.pos = target;
        Ok(self.pos as u64)
    }
}

/// Growable buffer device. Fully seekable; writes past the end extend the
/// buffer, growing the allocation geometrically (1.5×).
pub struct DynBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl DynBuffer {
    pub fn new() -> Self {
        DynBuffer {
            data: Arc::new(Mutex::new(Vec::new())),
            pos: 0,
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        DynBuffer {
            data: Arc::new(Mutex::new(data)),
            pos: 0,
        }
    }

    /// Shared handle to the accumulated bytes; stays valid after the device
    /// moves into a pipeline.
    pub fn contents(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl Default for DynBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DynBuffer {
    fn kind(&self) -> &'static str {
        "dynbuf"
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::SEEKABLE
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        let mut data = self.data.lock();
        if mode.truncate {
            data.clear();
        }
        if mode.append {
            self.pos = data.len();
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let data = self.data.lock();
        if self.pos >= data.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut data = self.data.lock();
        let end = self.pos + buf.len();
        if end > data.len() {
            if end > data.capacity() {
                let grown = data.capacity() + data.capacity() / 2;
                let want = grown.max(end).max(16);
                let cur_len = data.len();
                data.reserve_exact(want - cur_len);
            }
            // A seek past the end leaves a zero-filled gap.
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(IoStatus::Ready(buf.len()))
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        let len = self.data.lock().len();
        self.pos = resolve_seek(pos, self.pos, len)?;
        Ok(self.pos as u64)
    }
}

/// Read-only string source. The length is fixed at open: a NUL byte in the
/// input terminates it.
pub struct StrSource {
    data: Vec<u8>,
    pos: usize,
}

impl StrSource {
    pub fn new<S: AsRef<[u8]>>(s: S) -> Self {
        let bytes = s.as_ref();
        let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
        StrSource {
            data: bytes[..end].to_vec(),
            pos: 0,
        }
    }
}

impl Backend for StrSource {
    fn kind(&self) -> &'static str {
        "cstr"
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::SEEKABLE
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        if mode.write {
            return Err(DeviceError::InvalidMode(
                "string source is read-only".to_string(),
            ));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if self.pos >= self.data.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        let len = self.data.len();
        let target = resolve_seek(pos, self.pos, len)?;
        if target > len {
            return Err(DeviceError::BadState);
        }
        self.pos = target;
        Ok(self.pos as u64)
    }
}

/// Discards everything written to it; reads report EOF immediately.
pub struct NullSink;

impl Backend for NullSink {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn read(&mut self, _buf: &mut [u8]) -> DeviceResult<IoStatus> {
        Ok(IoStatus::End)
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        Ok(IoStatus::Ready(buf.len()))
    }
}

/// Open a read-only device over a string, the usual head of a pipeline.
pub fn str_source(s: &str) -> DeviceResult<Device> {
    Device::open(StrSource::new(s), "r")
}

/// Open a growable buffer sink, returning the device and the shared handle to
/// its contents.
pub fn dyn_sink() -> DeviceResult<(Device, Arc<Mutex<Vec<u8>>>)> {
    let buf = DynBuffer::new();
    let contents = buf.contents();
    let dev = Device::open(buf, "w")?;
    Ok((dev, contents))
}
