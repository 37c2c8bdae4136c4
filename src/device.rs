//! The device kernel.
//!
//! Every byte-stream endpoint and every transformation filter in this crate is
//! driven through one object, [`Device`]. A device pairs a raw transport (a
//! [`Backend`] trait object) with the user-level machinery the transport does
//! not want to reimplement: open-mode bookkeeping, a read/write direction
//! state machine, buffered I/O, single-byte pushback, a sticky error slot and
//! a sticky EOF flag, logical position tracking, and an orderly
//! flush-then-close teardown.
//!
//! Filters are backends that own another [`Device`] and transform bytes on the
//! way through; clients stack them freely:
//!
//! ```text
//! client ──▶ pkcs7 pad ──▶ aes-cbc encrypt ──▶ hex encode ──▶ growable buffer
//! ```
//!
//! Data flow is client-driven: a `read`/`write` on the outermost device
//! recursively invokes the same operation down the chain.

use std::io;

use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

/// Default capacity of the user-level buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

bitflags::bitflags! {
    /// Capability bits a backend advertises at open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceFlags: u32 {
        /// Direction is irrelevant to this backend: the kernel may drive it
        /// read-then-write-then-read in any order without a state switch.
        /// The thread ring sets this.
        const NO_STATE_SWITCH = 1 << 0;
        /// The backend implements [`Backend::seek`].
        const SEEKABLE = 1 << 1;
    }
}

/// Seek target, relative to the start, the current position, or the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPos {
    Start(u64),
    Current(i64),
    End(i64),
}

/// The current I/O polarity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Idle,
    Reading,
    Writing,
}

/// User-level buffering policy, installed via [`Device::set_buffer_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    Unbuffered,
    LineBuffered,
    FullyBuffered,
}

/// Outcome of a raw backend transfer.
///
/// `Ready(n)` carries a non-zero count. `End` is the end of the stream on
/// reads and a full fixed-size device on writes; it is sticky at the device
/// level but is not an error. `Pending` means no progress is possible right
/// now but more may become possible later (a ring with live writers, a
/// non-blocking ring write against a full buffer); the kernel returns a short
/// count without setting EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Ready(usize),
    End,
    Pending,
}

/// The raw transport contract. Implementing this trait and handing the result
/// to [`Device::open`] is how every kind in the crate is constructed, and is
/// equally the extension point for custom kinds.
///
/// All hooks except [`read`](Backend::read)/[`write`](Backend::write) have
/// do-nothing defaults; a backend overrides only the points where it actually
/// transforms or transports bytes.
pub trait Backend: Send {
    /// Kind name for diagnostics ("membuf", "aes", "thread-ring", ...).
    fn kind(&self) -> &'static str;

    /// Capability flags; queried once at open.
    fn flags(&self) -> DeviceFlags {
        DeviceFlags::empty()
    }

    /// Called once from [`Device::open`] with the parsed mode. A backend that
    /// cannot honor the mode fails the open here.
    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        let _ = mode;
        Ok(())
    }

    /// Produce bytes into `buf`. `Ready(n)` must have `n > 0`.
    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let _ = buf;
        Err(DeviceError::BadState)
    }

    /// Accept bytes from `buf`. `Ready(n)` must have `n > 0`.
    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let _ = buf;
        Err(DeviceError::BadState)
    }

    /// Forward buffered state toward the sink. Never emits trailing transform
    /// output such as padding; that is [`close`](Backend::close)'s job.
    fn flush(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    /// Reposition. Only called when [`flags`](Backend::flags) contains
    /// [`DeviceFlags::SEEKABLE`]; the kernel guarantees a clean buffer
    /// boundary before invoking it.
    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        let _ = pos;
        Err(DeviceError::NotSeekable)
    }

    /// Whether this backend implements the reading↔writing transition hook.
    fn supports_switch(&self) -> bool {
        false
    }

    /// Reading↔writing transition for transform filters whose state
    /// distinguishes directions (ciphers, hashes). Only called when
    /// [`supports_switch`](Backend::supports_switch) returns true.
    fn switch(&mut self, to: Direction) -> DeviceResult<()> {
        let _ = to;
        Ok(())
    }

    /// Final teardown. Transform filters emit trailing output (padding, a
    /// digest) and close their underlying device here.
    fn close(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    /// Clear kind-specific error state, invoked from [`Device::clear_error`].
    fn clear_error(&mut self) {}
}

/// A polymorphic byte-stream endpoint or transformer. See the module docs.
pub struct Device {
    backend: Box<dyn Backend>,
    mode: OpenMode,
    flags: DeviceFlags,
    dir: Direction,
    policy: BufferPolicy,
    buf: Vec<u8>,
    /// Read-side drain cursor into `buf`.
    buf_pos: usize,
    buf_cap: usize,
    pushback: Option<u8>,
    err: Option<DeviceError>,
    eof: bool,
    /// Logical position of the next byte to be read or written.
    pos: u64,
    closed: bool,
}

impl Device {
    /// Open a device over `backend` with an `fopen`-style mode string.
    ///
    /// This is the single constructor for every kind, built-in or custom: the
    /// mode is parsed once, the backend's [`Backend::open`] hook observes it
    /// (and may veto), and capability flags are cached.
    pub fn open<B: Backend + 'static>(backend: B, mode: &str) -> DeviceResult<Device> {
        Device::open_boxed(Box::new(backend), mode)
    }

    /// [`open`](Device::open) for an already-boxed backend.
    pub fn open_boxed(mut backend: Box<dyn Backend>, mode: &str) -> DeviceResult<Device> {
        let mode = OpenMode::parse(mode)?;
        backend.open(&mode)?;
        let flags = backend.flags();
        // Direction-tagged buffering cannot sit in front of a device that is
        // legitimately driven from both sides at once.
        let policy = if flags.contains(DeviceFlags::NO_STATE_SWITCH) {
            BufferPolicy::Unbuffered
        } else {
            BufferPolicy::FullyBuffered
        };
        log::trace!("open {} device (mode {:?})", backend.kind(), mode);
        Ok(Device {
            backend,
            mode,
            flags,
            dir: Direction::Idle,
            policy,
            buf: Vec::new(),
            buf_pos: 0,
            buf_cap: DEFAULT_BUFFER_SIZE,
            pushback: None,
            err: None,
            eof: false,
            pos: 0,
            closed: false,
        })
    }

    /// Read up to `out.len()` bytes. Returns the number of bytes produced;
    /// `Ok(0)` means EOF, no data currently available, or an empty `out`;
    /// callers distinguish via [`eof`](Device::eof). An error that interrupts
    /// a partial transfer is recorded sticky and the partial count is
    /// returned.
    pub fn read(&mut self, out: &mut [u8]) -> DeviceResult<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        self.check_open()?;
        self.check_error()?;
        if !self.mode.read {
            return self.fail(DeviceError::BadState);
        }
        self.enter_reading()?;

        let mut n = 0usize;
        if let Some(b) = self.pushback.take() {
            out[0] = b;
            n = 1;
        }
        while n < out.len() {
            let avail = self.buf.len() - self.buf_pos;
            if avail > 0 {
                let take = avail.min(out.len() - n);
                out[n..n + take].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + take]);
                self.buf_pos += take;
                n += take;
                continue;
            }
            if self.eof {
                break;
            }
            let want = out.len() - n;
            if self.policy == BufferPolicy::Unbuffered || want >= self.buf_cap {
                // Large or unbuffered transfers bypass the buffer.
                match self.backend.read(&mut out[n..]) {
                    Ok(IoStatus::Ready(k)) => n += k,
                    Ok(IoStatus::End) => {
                        self.eof = true;
                        break;
                    }
                    Ok(IoStatus::Pending) => break,
                    Err(e) => return self.finish_partial(e, n),
                }
            } else {
                self.buf.clear();
                self.buf_pos = 0;
                self.buf.resize(self.buf_cap, 0);
                match self.backend.read(&mut self.buf[..]) {
                    Ok(IoStatus::Ready(k)) => self.buf.truncate(k),
                    Ok(IoStatus::End) => {
                        self.buf.clear();
                        self.eof = true;
                        break;
                    }
                    Ok(IoStatus::Pending) => {
                        self.buf.clear();
                        break;
                    }
                    Err(e) => {
                        self.buf.clear();
                        return self.finish_partial(e, n);
                    }
                }
            }
        }
        self.pos += n as u64;
        Ok(n)
    }

    /// Write up to `data.len()` bytes through the write-side buffer. Returns
    /// the number of bytes accepted; a short count with [`eof`](Device::eof)
    /// set means the device filled up. An error that interrupts a partial
    /// transfer is recorded sticky and the partial count is returned.
    pub fn write(&mut self, data: &[u8]) -> DeviceResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        self.check_open()?;
        self.check_error()?;
        if !self.mode.write {
            return self.fail(DeviceError::BadState);
        }
        self.enter_writing()?;

        let mut n = 0usize;
        if self.policy == BufferPolicy::Unbuffered {
            while n < data.len() {
                match self.backend.write(&data[n..]) {
                    Ok(IoStatus::Ready(k)) => n += k,
                    Ok(IoStatus::End) => {
                        self.eof = true;
                        break;
                    }
                    Ok(IoStatus::Pending) => break,
                    Err(e) => return self.finish_partial(e, n),
                }
            }
        } else {
            while n < data.len() {
                let space = self.buf_cap - self.buf.len();
                if space == 0 {
                    match self.drain_some() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => return self.finish_partial(e, n),
                    }
                }
                let take = space.min(data.len() - n);
                self.buf.extend_from_slice(&data[n..n + take]);
                n += take;
            }
            if self.policy == BufferPolicy::LineBuffered && data[..n].contains(&b'\n') {
                if let Err(e) = self.flush_writes() {
                    return self.finish_partial(e, n);
                }
            }
        }
        self.pos += n as u64;
        Ok(n)
    }

    /// Read a single byte. `Ok(None)` at EOF or when nothing is available.
    pub fn getc(&mut self) -> DeviceResult<Option<u8>> {
        let mut b = [0u8; 1];
        match self.read(&mut b)? {
            0 => Ok(None),
            _ => Ok(Some(b[0])),
        }
    }

    /// Write a single byte; `Ok(false)` if the device did not accept it.
    pub fn putc(&mut self, byte: u8) -> DeviceResult<bool> {
        Ok(self.write(&[byte])? == 1)
    }

    /// Push one byte back onto the read side. At least one byte of pushback
    /// is guaranteed after any successful read. Returns false, without
    /// touching the sticky error slot, when the device is not readable, is
    /// mid-write, or already holds a pushed-back byte.
    pub fn ungetc(&mut self, byte: u8) -> bool {
        if self.closed || !self.mode.read || self.pushback.is_some() {
            return false;
        }
        if self.dir == Direction::Writing {
            return false;
        }
        self.pushback = Some(byte);
        self.dir = Direction::Reading;
        self.eof = false;
        self.pos = self.pos.saturating_sub(1);
        true
    }

    /// Drain the write-side buffer through the backend. A no-op returning
    /// success for devices that are idle or reading. Never forces trailing
    /// transform output (padding, digests) out of filters; that is
    /// [`close`](Device::close)'s job.
    pub fn flush(&mut self) -> DeviceResult<()> {
        self.check_open()?;
        self.check_error()?;
        if self.dir != Direction::Writing {
            return Ok(());
        }
        match self.flush_writes() {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e),
        }
    }

    /// Reposition to `pos`. Flushes the write side, invalidates the read
    /// side, clears EOF and pushback, and presents the backend with a clean
    /// boundary. Fails with [`DeviceError::NotSeekable`] for kinds without a
    /// seek hook.
    pub fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        self.check_open()?;
        self.check_error()?;
        if !self.flags.contains(DeviceFlags::SEEKABLE) {
            return self.fail(DeviceError::NotSeekable);
        }
        let mut target = pos;
        match self.dir {
            Direction::Writing => {
                if let Err(e) = self.flush_writes() {
                    return self.fail(e);
                }
            }
            Direction::Reading => {
                // The backend is ahead of the logical position by the unread
                // lookahead; relative seeks must account for it.
                let lookahead =
                    (self.buf.len() - self.buf_pos) as i64 + self.pushback.is_some() as i64;
                if let SeekPos::Current(delta) = target {
                    target = SeekPos::Current(delta - lookahead);
                }
            }
            Direction::Idle => {}
        }
        self.buf.clear();
        self.buf_pos = 0;
        self.pushback = None;
        match self.backend.seek(target) {
            Ok(p) => {
                self.eof = false;
                self.dir = Direction::Idle;
                self.pos = p;
                Ok(p)
            }
            Err(e) => self.fail(e),
        }
    }

    /// Logical position of the next byte to be read or written, accounting
    /// for unconsumed read-buffer content, unflushed write-buffer content and
    /// pushback.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Flush, run the backend's close hook, and mark the device closed.
    /// Returns the first error observed in that chain; later errors are
    /// swallowed (the device is finished either way). Idempotent. Dropping an
    /// unclosed device performs the same chain best-effort.
    pub fn close(&mut self) -> DeviceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first: Option<DeviceError> = None;
        if self.dir == Direction::Writing {
            if let Err(e) = self.flush_writes() {
                first.get_or_insert(e);
            }
        }
        if let Err(e) = self.backend.close() {
            first.get_or_insert(e);
        }
        log::trace!("closed {} device", self.backend.kind());
        match first {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Install or replace the user-level buffer. Only legal while the
    /// direction is idle; the failure is reported but not recorded sticky
    /// (it is a configuration error, not an I/O error).
    pub fn set_buffer_policy(&mut self, policy: BufferPolicy, size: usize) -> DeviceResult<()> {
        if self.dir != Direction::Idle {
            return Err(DeviceError::BadState);
        }
        self.policy = policy;
        self.buf_cap = size.max(1);
        self.buf = Vec::new();
        self.buf_pos = 0;
        Ok(())
    }

    /// The sticky error, if any.
    pub fn error(&self) -> Option<DeviceError> {
        self.err.clone()
    }

    /// Whether the sticky EOF flag is set.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Clear the sticky error and EOF flags, and let the backend clear its
    /// own error state.
    pub fn clear_error(&mut self) {
        self.err = None;
        self.eof = false;
        self.backend.clear_error();
    }

    pub fn readable(&self) -> bool {
        self.mode.read
    }

    pub fn writable(&self) -> bool {
        self.mode.write
    }

    pub fn opened_for_update(&self) -> bool {
        self.mode.update
    }

    pub fn just_read(&self) -> bool {
        self.dir == Direction::Reading
    }

    pub fn just_wrote(&self) -> bool {
        self.dir == Direction::Writing
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn device_flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn open_mode(&self) -> &OpenMode {
        &self.mode
    }

    /// Write the whole of `data`, erroring if the device stops accepting.
    pub fn write_all(&mut self, mut data: &[u8]) -> DeviceResult<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(DeviceError::Io(format!(
                    "{}: device stopped accepting bytes",
                    self.backend.kind()
                )));
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Read until EOF (or until no further progress is possible), appending
    /// to `out`. Returns the number of bytes appended.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> DeviceResult<usize> {
        let mut chunk = [0u8; DEFAULT_BUFFER_SIZE];
        let mut total = 0usize;
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_open(&self) -> DeviceResult<()> {
        if self.closed {
            Err(DeviceError::BadState)
        } else {
            Ok(())
        }
    }

    fn check_error(&self) -> DeviceResult<()> {
        match &self.err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn fail<T>(&mut self, e: DeviceError) -> DeviceResult<T> {
        self.err = Some(e.clone());
        Err(e)
    }

    /// Sticky-record `e`; report the partial count when there is one.
    fn finish_partial(&mut self, e: DeviceError, n: usize) -> DeviceResult<usize> {
        self.err = Some(e.clone());
        if n > 0 {
            self.pos += n as u64;
            Ok(n)
        } else {
            Err(e)
        }
    }

    /// One drain attempt against the backend. `Ok(false)` when no forward
    /// progress is possible right now (device full or pending).
    fn drain_some(&mut self) -> DeviceResult<bool> {
        if self.buf.is_empty() {
            return Ok(true);
        }
        match self.backend.write(&self.buf[..])? {
            IoStatus::Ready(k) => {
                self.buf.drain(..k);
                Ok(true)
            }
            IoStatus::End => {
                self.eof = true;
                Ok(false)
            }
            IoStatus::Pending => Ok(false),
        }
    }

    fn flush_writes(&mut self) -> DeviceResult<()> {
        while !self.buf.is_empty() {
            if !self.drain_some()? {
                return Err(DeviceError::Io(format!(
                    "{}: short write while flushing",
                    self.backend.kind()
                )));
            }
        }
        self.backend.flush()
    }

    fn enter_reading(&mut self) -> DeviceResult<()> {
        match self.dir {
            Direction::Reading => Ok(()),
            Direction::Idle => {
                self.dir = Direction::Reading;
                Ok(())
            }
            Direction::Writing => {
                if self.flags.contains(DeviceFlags::NO_STATE_SWITCH) {
                    if let Err(e) = self.flush_writes() {
                        return self.fail(e);
                    }
                } else if self.backend.supports_switch() {
                    if let Err(e) = self.flush_writes() {
                        return self.fail(e);
                    }
                    if let Err(e) = self.backend.switch(Direction::Reading) {
                        return self.fail(e);
                    }
                } else if self.mode.update {
                    if let Err(e) = self.flush_writes() {
                        return self.fail(e);
                    }
                } else {
                    return self.fail(DeviceError::BadState);
                }
                self.dir = Direction::Reading;
                Ok(())
            }
        }
    }

    fn enter_writing(&mut self) -> DeviceResult<()> {
        match self.dir {
            Direction::Writing => Ok(()),
            Direction::Idle => {
                self.dir = Direction::Writing;
                Ok(())
            }
            Direction::Reading => {
                if self.flags.contains(DeviceFlags::NO_STATE_SWITCH) {
                    self.buf.clear();
                    self.buf_pos = 0;
                    self.pushback = None;
                } else if self.backend.supports_switch() {
                    self.buf.clear();
                    self.buf_pos = 0;
                    self.pushback = None;
                    if let Err(e) = self.backend.switch(Direction::Writing) {
                        return self.fail(e);
                    }
                } else if self.mode.update {
                    self.buf.clear();
                    self.buf_pos = 0;
                    self.pushback = None;
                    if self.flags.contains(DeviceFlags::SEEKABLE) {
                        // Realign the backend with the logical position now
                        // that the read lookahead is gone.
                        let pos = self.pos;
                        if let Err(e) = self.backend.seek(SeekPos::Start(pos)) {
                            return self.fail(e);
                        }
                    }
                } else {
                    return self.fail(DeviceError::BadState);
                }
                self.dir = Direction::Writing;
                Ok(())
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

impl io::Read for Device {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Device::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for Device {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Device::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Device::flush(self).map_err(Into::into)
    }
}
