//! Streaming hex codec.
//!
//! Lowercase on encode, case-insensitive on decode. Odd-length decode input
//! is a [`DeviceError::Truncated`] error, as is any non-hex digit. The
//! encoder supports seeking by *output* position when its underlying seeks
//! (two output characters per input byte).

use crate::device::{Backend, Device, DeviceFlags, IoStatus, SeekPos};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

const DIGITS: &[u8; 16] = b"0123456789abcdef";

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn encode_into(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        out.push(DIGITS[(b >> 4) as usize]);
        out.push(DIGITS[(b & 0x0f) as usize]);
    }
}

/// Byte → lowercase-hex filter.
pub struct HexEncoder {
    inner: Device,
    mode: OpenMode,
    /// Read shape: encoded output awaiting delivery.
    pending: Vec<u8>,
    pending_pos: usize,
    /// Output-position cursor for seeking.
    out_pos: u64,
}

impl HexEncoder {
    pub fn open(inner: Device, mode: &str) -> DeviceResult<Device> {
        Device::open(
            HexEncoder {
                inner,
                mode: OpenMode::default(),
                pending: Vec::new(),
                pending_pos: 0,
                out_pos: 0,
            },
            mode,
        )
    }

    fn serve(&mut self, buf: &mut [u8]) -> usize {
        let avail = self.pending.len() - self.pending_pos;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        self.out_pos += n as u64;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        n
    }
}

impl Backend for HexEncoder {
    fn kind(&self) -> &'static str {
        "hex-encode"
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
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if self.pending_pos < self.pending.len() {
            return Ok(IoStatus::Ready(self.serve(buf)));
        }
        let mut chunk = [0u8; 2048];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            return if self.inner.eof() {
                Ok(IoStatus::End)
            } else {
                Ok(IoStatus::Pending)
            };
        }
        let mut out = std::mem::take(&mut self.pending);
        encode_into(&chunk[..n], &mut out);
        self.pending = out;
        Ok(IoStatus::Ready(self.serve(buf)))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut out = Vec::with_capacity(buf.len() * 2);
        encode_into(buf, &mut out);
        self.inner.write_all(&out)?;
        Ok(IoStatus::Ready(buf.len()))
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        if !self.mode.read {
            return Err(DeviceError::NotSeekable);
        }
        let target = match pos {
            SeekPos::Start(p) => p as i64,
            SeekPos::Current(d) => self.out_pos as i64 + d,
            SeekPos::End(d) => {
                let input_end = self.inner.seek(SeekPos::End(0))?;
                (input_end * 2) as i64 + d
            }
        };
        if target < 0 {
            return Err(DeviceError::BadState);
        }
        let target = target as u64;
        self.inner.seek(SeekPos::Start(target / 2))?;
        self.pending.clear();
        self.pending_pos = 0;
        if target % 2 == 1 {
            // Mid-byte: stage the low-nibble character.
            match self.inner.getc()? {
                Some(b) => self.pending.push(DIGITS[(b & 0x0f) as usize]),
                None => return Err(DeviceError::BadState),
            }
        }
        self.out_pos = target;
        Ok(target)
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.inner.close()
    }

    fn clear_error(&mut self) {
        self.inner.clear_error();
    }
}

/// Hex → byte filter.
pub struct HexDecoder {
    inner: Device,
    /// Carried high nibble of a split pair.
    carry: Option<u8>,
    /// Read shape: decoded output awaiting delivery.
    pending: Vec<u8>,
    pending_pos: usize,
    mode: OpenMode,
}

impl HexDecoder {
    pub fn open(inner: Device, mode: &str) -> DeviceResult<Device> {
        Device::open(
            HexDecoder {
                inner,
                carry: None,
                pending: Vec::new(),
                pending_pos: 0,
                mode: OpenMode::default(),
            },
            mode,
        )
    }

    fn decode_into(&mut self, data: &[u8], out: &mut Vec<u8>) -> DeviceResult<()> {
        for &c in data {
            let v = nibble(c).ok_or(DeviceError::Truncated)?;
            match self.carry.take() {
                None => self.carry = Some(v),
                Some(high) => out.push((high << 4) | v),
            }
        }
        Ok(())
    }

    fn serve(&mut self, buf: &mut [u8]) -> usize {
        let avail = self.pending.len() - self.pending_pos;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        n
    }
}

impl Backend for HexDecoder {
    fn kind(&self) -> &'static str {
        "hex-decode"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        self.mode = *mode;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        loop {
            if self.pending_pos < self.pending.len() {
                return Ok(IoStatus::Ready(self.serve(buf)));
            }
            let mut chunk = [0u8; 2048];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if !self.inner.eof() {
                    return Ok(IoStatus::Pending);
                }
                if self.carry.is_some() {
                    // Odd number of hex digits.
                    return Err(DeviceError::Truncated);
                }
                return Ok(IoStatus::End);
            }
            let mut out = std::mem::take(&mut self.pending);
            let res = self.decode_into(&chunk[..n], &mut out);
            self.pending = out;
            res?;
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut out = Vec::with_capacity(buf.len() / 2 + 1);
        self.decode_into(buf, &mut out)?;
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.mode.write && self.carry.is_some() {
            first = Some(DeviceError::Truncated);
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
