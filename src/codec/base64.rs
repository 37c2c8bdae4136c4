//! Streaming base64 codec (RFC 4648, standard alphabet).
//!
//! The encoder emits `=` padding for a trailing partial quantum on close (or
//! at the underlying's EOF in the read shape). The decoder is strict by
//! default: whitespace or any other byte outside the alphabet is a
//! [`DeviceError::Truncated`] error. It is lenient when requested, in which
//! case ASCII whitespace is skipped and an unpadded final quantum accepted.

use crate::device::{Backend, Device, IoStatus};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn value_of(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

fn encode_quantum(group: &[u8], out: &mut Vec<u8>) {
    let b0 = group[0];
    let b1 = group.get(1).copied().unwrap_or(0);
    let b2 = group.get(2).copied().unwrap_or(0);
    out.push(ALPHABET[(b0 >> 2) as usize]);
    out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize]);
    if group.len() > 1 {
        out.push(ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize]);
    } else {
        out.push(b'=');
    }
    if group.len() > 2 {
        out.push(ALPHABET[(b2 & 0x3f) as usize]);
    } else {
        out.push(b'=');
    }
}

/// Byte → base64 filter.
pub struct Base64Encoder {
    inner: Device,
    mode: OpenMode,
    /// Carried partial input quantum (0..=2 bytes).
    carry: [u8; 2],
    carry_len: usize,
    /// Read shape: encoded output awaiting delivery.
    pending: Vec<u8>,
    pending_pos: usize,
    finished: bool,
}

impl Base64Encoder {
    pub fn open(inner: Device, mode: &str) -> DeviceResult<Device> {
        Device::open(
            Base64Encoder {
                inner,
                mode: OpenMode::default(),
                carry: [0; 2],
                carry_len: 0,
                pending: Vec::new(),
                pending_pos: 0,
                finished: false,
            },
            mode,
        )
    }

    /// Encode `data` (behind any carried bytes) into `out`, keeping a new
    /// partial quantum back.
    fn encode_stream(&mut self, data: &[u8], out: &mut Vec<u8>) {
        let mut input = Vec::with_capacity(self.carry_len + data.len());
        input.extend_from_slice(&self.carry[..self.carry_len]);
        input.extend_from_slice(data);
        let mut chunks = input.chunks_exact(3);
        for group in &mut chunks {
            encode_quantum(group, out);
        }
        let rest = chunks.remainder();
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
    }

    fn finish_stream(&mut self, out: &mut Vec<u8>) {
        if self.carry_len > 0 {
            let group = self.carry[..self.carry_len].to_vec();
            encode_quantum(&group, out);
            self.carry_len = 0;
        }
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

impl Backend for Base64Encoder {
    fn kind(&self) -> &'static str {
        "base64-encode"
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
            if self.finished {
                return Ok(IoStatus::End);
            }
            let mut chunk = [0u8; 3072];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if !self.inner.eof() {
                    return Ok(IoStatus::Pending);
                }
                let mut out = std::mem::take(&mut self.pending);
                self.finish_stream(&mut out);
                self.pending = out;
                self.finished = true;
                continue;
            }
            let mut out = std::mem::take(&mut self.pending);
            self.encode_stream(&chunk[..n], &mut out);
            self.pending = out;
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut out = Vec::with_capacity(buf.len() / 3 * 4 + 4);
        self.encode_stream(buf, &mut out);
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        // The partial quantum stays staged until close.
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.mode.write {
            let mut out = Vec::new();
            self.finish_stream(&mut out);
            if !out.is_empty() {
                if let Err(e) = self.inner.write_all(&out) {
                    first.get_or_insert(e);
                }
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

/// Base64 → byte filter.
pub struct Base64Decoder {
    inner: Device,
    mode: OpenMode,
    lenient: bool,
    /// Collected sextets of the current quantum.
    group: [u8; 4],
    group_len: usize,
    /// Number of `=` characters seen in the current quantum.
    pad_count: usize,
    /// Padding terminated the stream; nothing further is acceptable.
    done: bool,
    pending: Vec<u8>,
    pending_pos: usize,
}

impl Base64Decoder {
    /// Strict decoder: the input must be pure RFC 4648 base64, padding
    /// included.
    pub fn open(inner: Device, mode: &str) -> DeviceResult<Device> {
        Self::with_leniency(inner, false, mode)
    }

    /// Lenient decoder: ASCII whitespace is skipped and an unpadded final
    /// quantum accepted.
    pub fn open_lenient(inner: Device, mode: &str) -> DeviceResult<Device> {
        Self::with_leniency(inner, true, mode)
    }

    fn with_leniency(inner: Device, lenient: bool, mode: &str) -> DeviceResult<Device> {
        Device::open(
            Base64Decoder {
                inner,
                mode: OpenMode::default(),
                lenient,
                group: [0; 4],
                group_len: 0,
                pad_count: 0,
                done: false,
                pending: Vec::new(),
                pending_pos: 0,
            },
            mode,
        )
    }

    fn emit_group(&mut self, out: &mut Vec<u8>) -> DeviceResult<()> {
        let data_sextets = self.group_len - self.pad_count;
        if data_sextets < 2 {
            return Err(DeviceError::Truncated);
        }
        let b0 = (self.group[0] << 2) | (self.group[1] >> 4);
        out.push(b0);
        if data_sextets > 2 {
            out.push((self.group[1] << 4) | (self.group[2] >> 2));
        }
        if data_sextets > 3 {
            out.push((self.group[2] << 6) | self.group[3]);
        }
        if self.pad_count > 0 {
            self.done = true;
        }
        self.group_len = 0;
        self.pad_count = 0;
        Ok(())
    }

    fn decode_stream(&mut self, data: &[u8], out: &mut Vec<u8>) -> DeviceResult<()> {
        for &c in data {
            if self.lenient && (c == b' ' || c == b'\t' || c == b'\r' || c == b'\n') {
                continue;
            }
            if self.done {
                return Err(DeviceError::Truncated);
            }
            if c == b'=' {
                if self.group_len < 2 {
                    return Err(DeviceError::Truncated);
                }
                self.group[self.group_len] = 0;
                self.group_len += 1;
                self.pad_count += 1;
            } else {
                match value_of(c) {
                    Some(v) if self.pad_count == 0 => {
                        self.group[self.group_len] = v;
                        self.group_len += 1;
                    }
                    _ => return Err(DeviceError::Truncated),
                }
            }
            if self.group_len == 4 {
                self.emit_group(out)?;
            }
        }
        Ok(())
    }

    /// End-of-input bookkeeping: a dangling quantum is an error unless the
    /// lenient decoder can finish it without padding.
    fn finish_stream(&mut self, out: &mut Vec<u8>) -> DeviceResult<()> {
        if self.group_len == 0 {
            return Ok(());
        }
        if !self.lenient || self.group_len < 2 {
            return Err(DeviceError::Truncated);
        }
        let missing = 4 - self.group_len;
        for _ in 0..missing {
            self.group[self.group_len] = 0;
            self.group_len += 1;
            self.pad_count += 1;
        }
        self.emit_group(out)
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

impl Backend for Base64Decoder {
    fn kind(&self) -> &'static str {
        "base64-decode"
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
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if !self.inner.eof() {
                    return Ok(IoStatus::Pending);
                }
                let mut out = std::mem::take(&mut self.pending);
                let res = self.finish_stream(&mut out);
                self.pending = out;
                res?;
                if self.pending_pos < self.pending.len() {
                    continue;
                }
                return Ok(IoStatus::End);
            }
            let mut out = std::mem::take(&mut self.pending);
            let res = self.decode_stream(&chunk[..n], &mut out);
            self.pending = out;
            res?;
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut out = Vec::with_capacity(buf.len() / 4 * 3 + 3);
        self.decode_stream(buf, &mut out)?;
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
        if self.mode.write {
            let mut out = Vec::new();
            match self.finish_stream(&mut out) {
                Ok(()) => {
                    if !out.is_empty() {
                        if let Err(e) = self.inner.write_all(&out) {
                            first.get_or_insert(e);
                        }
                    }
                }
                Err(e) => first = Some(e),
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
    use crate::mem::{dyn_sink, str_source, DynBuffer};
    use base64::Engine;

    fn encode_all(data: &[u8]) -> Vec<u8> {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = Base64Encoder::open(sink, "w").unwrap();
        dev.write_all(data).unwrap();
        dev.close().unwrap();
        let out = bytes.lock().clone();
        out
    }

    #[test]
    fn test_wikipedia_vector() {
        let src = str_source("any carnal pleasur").unwrap();
        let mut dev = Base64Encoder::open(src, "r").unwrap();
        let mut out = Vec::new();
        dev.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"YW55IGNhcm5hbCBwbGVhc3Vy");
    }

    #[test]
    fn test_padding_variants() {
        assert_eq!(encode_all(b"f"), b"Zg==");
        assert_eq!(encode_all(b"fo"), b"Zm8=");
        assert_eq!(encode_all(b"foo"), b"Zm9v");
        assert_eq!(encode_all(b""), b"");
    }

    #[test]
    fn test_matches_reference_implementation() {
        let data: Vec<u8> = (0u8..=255).collect();
        let want = base64::engine::general_purpose::STANDARD.encode(&data);
        assert_eq!(encode_all(&data), want.as_bytes());
    }

    #[test]
    fn test_decode_round_trip() {
        let data: Vec<u8> = (0u8..200).collect();
        let encoded = encode_all(&data);
        let src = Device::open(DynBuffer::from_vec(encoded), "r").unwrap();
        let mut dec = Base64Decoder::open(src, "r").unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_strict_rejects_whitespace() {
        let src = str_source("Zm 9v").unwrap();
        let mut dec = Base64Decoder::open(src, "r").unwrap();
        assert!(matches!(
            dec.read_to_end(&mut Vec::new()),
            Err(DeviceError::Truncated)
        ));
    }

    #[test]
    fn test_lenient_skips_whitespace() {
        let src = str_source("Zm9v\nZg==\n").unwrap();
        let mut dec = Base64Decoder::open_lenient(src, "r").unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"foof");
    }

    #[test]
    fn test_lenient_accepts_unpadded_tail() {
        let src = str_source("Zm8").unwrap();
        let mut dec = Base64Decoder::open_lenient(src, "r").unwrap();
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"fo");
    }

    #[test]
    fn test_strict_rejects_unpadded_tail() {
        let src = str_source("Zm8").unwrap();
        let mut dec = Base64Decoder::open(src, "r").unwrap();
        assert!(matches!(
            dec.read_to_end(&mut Vec::new()),
            Err(DeviceError::Truncated)
        ));
    }

    #[test]
    fn test_decoder_write_shape() {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dec = Base64Decoder::open(sink, "w").unwrap();
        dec.write_all(b"aGVsbG8=").unwrap();
        dec.close().unwrap();
        assert_eq!(&*bytes.lock(), b"hello");
    }

    #[test]
    fn test_data_after_padding_rejected() {
        let src = str_source("Zg==Zg==").unwrap();
        let mut dec = Base64Decoder::open(src, "r").unwrap();
        assert!(matches!(
            dec.read_to_end(&mut Vec::new()),
            Err(DeviceError::Truncated)
        ));
    }
}
