//! Structural filters: fan-out, concatenation, repetition and byte caps.
//!
//! These filters do not transform bytes; they reshape where bytes come from
//! or go to. `Concat`, `Repeat` and `Limiter` own the device below them and
//! close it on their own close. `Tee` is the exception: its two outputs are
//! only borrowed through [`SharedDevice`] handles, and the caller keeps
//! managing their lifetimes after the tee is gone.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Backend, Device, IoStatus, SeekPos};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

/// A device handle that can be lent to a tee while the caller keeps one.
pub type SharedDevice = Arc<Mutex<Device>>;

/// Wrap a device for sharing with [`Tee::open`].
pub fn shared(dev: Device) -> SharedDevice {
    Arc::new(Mutex::new(dev))
}

/// Write-only fan-out to two sinks. A write succeeds only if both sinks
/// accept every byte; otherwise the error of whichever sink failed first is
/// reported. The sinks are borrowed, not owned: flush fans out, but closing
/// the tee leaves both of them open for the caller.
pub struct Tee {
    left: SharedDevice,
    right: SharedDevice,
}

impl Tee {
    pub fn open(left: SharedDevice, right: SharedDevice) -> DeviceResult<Device> {
        Device::open(Tee { left, right }, "w")
    }
}

impl Backend for Tee {
    fn kind(&self) -> &'static str {
        "tee"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        if mode.read {
            return Err(DeviceError::InvalidMode("tee is write-only".to_string()));
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        self.left.lock().write_all(buf)?;
        self.right.lock().write_all(buf)?;
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.left.lock().flush()?;
        self.right.lock().flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        // The outputs stay open; their owners close them. Forward one flush
        // so nothing the tee accepted is still sitting in their buffers.
        let first = self.left.lock().flush();
        let second = self.right.lock().flush();
        first.and(second)
    }
}

/// Read-only concatenation of two sources; EOF of the first rolls over
/// transparently into the second.
pub struct Concat {
    first: Device,
    second: Device,
    on_second: bool,
}

impl Concat {
    pub fn open(first: Device, second: Device) -> DeviceResult<Device> {
        Device::open(
            Concat {
                first,
                second,
                on_second: false,
            },
            "r",
        )
    }
}

impl Backend for Concat {
    fn kind(&self) -> &'static str {
        "concat"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        if mode.write {
            return Err(DeviceError::InvalidMode("concat is read-only".to_string()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if !self.on_second {
            let n = self.first.read(buf)?;
            if n > 0 {
                return Ok(IoStatus::Ready(n));
            }
            if !self.first.eof() {
                return Ok(IoStatus::Pending);
            }
            self.on_second = true;
        }
        let n = self.second.read(buf)?;
        if n > 0 {
            Ok(IoStatus::Ready(n))
        } else if self.second.eof() {
            Ok(IoStatus::End)
        } else {
            Ok(IoStatus::Pending)
        }
    }

    fn close(&mut self) -> DeviceResult<()> {
        let first = self.first.close();
        let second = self.second.close();
        first.and(second)
    }
}

/// Read-only infinite repetition: when the underlying reaches EOF it is
/// rewound to position 0 and reading continues. Requires a seekable
/// underlying; over a non-seekable one the first EOF surfaces the seek
/// failure.
pub struct Repeat {
    inner: Device,
}

impl Repeat {
    pub fn open(inner: Device) -> DeviceResult<Device> {
        Device::open(Repeat { inner }, "r")
    }
}

impl Backend for Repeat {
    fn kind(&self) -> &'static str {
        "repeat"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        if mode.write {
            return Err(DeviceError::InvalidMode("repeat is read-only".to_string()));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            return Ok(IoStatus::Ready(n));
        }
        if !self.inner.eof() {
            return Ok(IoStatus::Pending);
        }
        self.inner.seek(SeekPos::Start(0))?;
        let n = self.inner.read(buf)?;
        if n > 0 {
            Ok(IoStatus::Ready(n))
        } else {
            // An empty underlying cannot produce an infinite sequence.
            Ok(IoStatus::End)
        }
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}

/// Caps the total bytes read and/or written through it. Exhausted reads
/// report EOF. Exhausted writes fail with [`DeviceError::LimitReached`] when
/// strict, and are silently discarded otherwise.
pub struct Limiter {
    inner: Device,
    read_left: Option<u64>,
    write_left: Option<u64>,
    strict: bool,
}

impl Limiter {
    /// `read_limit`/`write_limit` of `None` leave that side uncapped.
    pub fn open(
        inner: Device,
        read_limit: Option<u64>,
        write_limit: Option<u64>,
        strict: bool,
        mode: &str,
    ) -> DeviceResult<Device> {
        Device::open(
            Limiter {
                inner,
                read_left: read_limit,
                write_left: write_limit,
                strict,
            },
            mode,
        )
    }
}

impl Backend for Limiter {
    fn kind(&self) -> &'static str {
        "limiter"
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let cap = match self.read_left {
            None => buf.len(),
            Some(0) => return Ok(IoStatus::End),
            Some(left) => buf.len().min(left as usize),
        };
        let n = self.inner.read(&mut buf[..cap])?;
        if n == 0 {
            return if self.inner.eof() {
                Ok(IoStatus::End)
            } else {
                Ok(IoStatus::Pending)
            };
        }
        if let Some(left) = self.read_left.as_mut() {
            *left -= n as u64;
        }
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let cap = match self.write_left {
            None => buf.len(),
            Some(0) => {
                return if self.strict {
                    Err(DeviceError::LimitReached)
                } else {
                    Ok(IoStatus::Ready(buf.len()))
                };
            }
            Some(left) => buf.len().min(left as usize),
        };
        self.inner.write_all(&buf[..cap])?;
        if let Some(left) = self.write_left.as_mut() {
            *left -= cap as u64;
        }
        if cap < buf.len() && !self.strict {
            // Lenient mode swallows the overflow.
            return Ok(IoStatus::Ready(buf.len()));
        }
        Ok(IoStatus::Ready(cap))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }
}
