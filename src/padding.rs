//! Padding filters: PKCS#7 and bit padding (ISO/IEC 7816-4).
//!
//! These sit next to the block-cipher filter and resolve the trailing partial
//! block the cipher itself refuses to handle. The encoders pass bytes through
//! untouched and append the pad on close (write shape) or synthesize it once
//! the underlying reaches EOF (read shape). Both schemes always pad: an
//! aligned input gains a whole extra block.
//!
//! The PKCS#7 decoder strips and validates the trailing pad; any mismatch is
//! [`DeviceError::PadInvalid`].

use crate::device::{Backend, Device, IoStatus};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

/// Padding scheme of an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PadStyle {
    Pkcs7,
    Bit,
}

fn check_block_size(block: usize) -> DeviceResult<()> {
    if block == 0 || block > 255 {
        return Err(DeviceError::InvalidMode(format!(
            "pad block size {} (want 1..=255)",
            block
        )));
    }
    Ok(())
}

fn pad_bytes(style: PadStyle, block: usize, count: u64) -> Vec<u8> {
    let k = block - (count % block as u64) as usize;
    match style {
        PadStyle::Pkcs7 => vec![k as u8; k],
        PadStyle::Bit => {
            let mut pad = vec![0u8; k];
            pad[0] = 0x80;
            pad
        }
    }
}

/// Pad-appending filter; see the module docs.
pub struct PadEncoder {
    inner: Device,
    style: PadStyle,
    block: usize,
    mode: OpenMode,
    /// Bytes passed through so far.
    count: u64,
    /// Read shape: synthesized pad being served after the underlying's EOF.
    pad: Option<Vec<u8>>,
    pad_pos: usize,
}

impl PadEncoder {
    /// PKCS#7: append `k` copies of the byte `k`.
    pub fn pkcs7(inner: Device, block: usize, mode: &str) -> DeviceResult<Device> {
        Self::open(inner, PadStyle::Pkcs7, block, mode)
    }

    /// ISO/IEC 7816-4: append `0x80`, then zeros to the block boundary.
    pub fn bit(inner: Device, block: usize, mode: &str) -> DeviceResult<Device> {
        Self::open(inner, PadStyle::Bit, block, mode)
    }

    fn open(inner: Device, style: PadStyle, block: usize, mode: &str) -> DeviceResult<Device> {
        check_block_size(block)?;
        Device::open(
            PadEncoder {
                inner,
                style,
                block,
                mode: OpenMode::default(),
                count: 0,
                pad: None,
                pad_pos: 0,
            },
            mode,
        )
    }
}

impl Backend for PadEncoder {
    fn kind(&self) -> &'static str {
        match self.style {
            PadStyle::Pkcs7 => "pkcs7-pad",
            PadStyle::Bit => "bit-pad",
        }
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        self.mode = *mode;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if self.pad.is_none() {
            let n = self.inner.read(buf)?;
            if n > 0 {
                self.count += n as u64;
                return Ok(IoStatus::Ready(n));
            }
            if !self.inner.eof() {
                return Ok(IoStatus::Pending);
            }
            self.pad = Some(pad_bytes(self.style, self.block, self.count));
            self.pad_pos = 0;
        }
        let pad = self.pad.as_ref().map(Vec::as_slice).unwrap_or(&[]);
        if self.pad_pos >= pad.len() {
            return Ok(IoStatus::End);
        }
        let n = buf.len().min(pad.len() - self.pad_pos);
        buf[..n].copy_from_slice(&pad[self.pad_pos..self.pad_pos + n]);
        self.pad_pos += n;
        Ok(IoStatus::Ready(n))
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        self.inner.write_all(buf)?;
        self.count += buf.len() as u64;
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.mode.write {
            let pad = pad_bytes(self.style, self.block, self.count);
            if let Err(e) = self.inner.write_all(&pad) {
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

/// PKCS#7 pad-stripping filter. Holds back one block's worth of bytes until
/// the end of the stream is known, then validates and drops the pad.
pub struct Pkcs7Unpad {
    inner: Device,
    block: usize,
    mode: OpenMode,
    /// The trailing candidate pad block.
    hold: Vec<u8>,
    /// Read shape: overflow beyond the holdback, awaiting delivery.
    pending: Vec<u8>,
    pending_pos: usize,
    /// Read shape: validated remainder of the final block.
    final_rest: Option<Vec<u8>>,
    final_pos: usize,
}

impl Pkcs7Unpad {
    pub fn open(inner: Device, block: usize, mode: &str) -> DeviceResult<Device> {
        check_block_size(block)?;
        Device::open(
            Pkcs7Unpad {
                inner,
                block,
                mode: OpenMode::default(),
                hold: Vec::new(),
                pending: Vec::new(),
                pending_pos: 0,
                final_rest: None,
                final_pos: 0,
            },
            mode,
        )
    }

    /// Validate the held-back block and return the payload prefix.
    fn strip(&mut self) -> DeviceResult<Vec<u8>> {
        if self.hold.len() != self.block {
            return Err(DeviceError::PadInvalid);
        }
        let k = *self.hold.last().unwrap_or(&0) as usize;
        if k == 0 || k > self.block {
            return Err(DeviceError::PadInvalid);
        }
        if !self.hold[self.block - k..].iter().all(|&b| b == k as u8) {
            return Err(DeviceError::PadInvalid);
        }
        Ok(self.hold[..self.block - k].to_vec())
    }

    /// Stage `data` behind the holdback; anything older than one block moves
    /// to `pending` (read shape) or straight to the underlying (write shape).
    fn stage(&mut self, data: &[u8], forward: bool) -> DeviceResult<()> {
        self.hold.extend_from_slice(data);
        if self.hold.len() > self.block {
            let excess = self.hold.len() - self.block;
            let released: Vec<u8> = self.hold.drain(..excess).collect();
            if forward {
                self.inner.write_all(&released)?;
            } else {
                self.pending.extend_from_slice(&released);
            }
        }
        Ok(())
    }

    fn serve(slice: &[u8], pos: &mut usize, buf: &mut [u8]) -> usize {
        let n = buf.len().min(slice.len() - *pos);
        buf[..n].copy_from_slice(&slice[*pos..*pos + n]);
        *pos += n;
        n
    }
}

impl Backend for Pkcs7Unpad {
    fn kind(&self) -> &'static str {
        "pkcs7-unpad"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        self.mode = *mode;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        loop {
            if self.pending_pos < self.pending.len() {
                let n = Self::serve(&self.pending, &mut self.pending_pos, buf);
                if self.pending_pos == self.pending.len() {
                    self.pending.clear();
                    self.pending_pos = 0;
                }
                return Ok(IoStatus::Ready(n));
            }
            if let Some(rest) = &self.final_rest {
                if self.final_pos >= rest.len() {
                    return Ok(IoStatus::End);
                }
                let n = Self::serve(rest, &mut self.final_pos, buf);
                return Ok(IoStatus::Ready(n));
            }
            let mut chunk = [0u8; 4096];
            let n = self.inner.read(&mut chunk)?;
            if n > 0 {
                self.stage(&chunk[..n], false)?;
                continue;
            }
            if !self.inner.eof() {
                return Ok(IoStatus::Pending);
            }
            let rest = self.strip()?;
            self.final_rest = Some(rest);
            self.final_pos = 0;
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        self.stage(buf, true)?;
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.mode.write {
            match self.strip() {
                Ok(rest) => {
                    if let Err(e) = self.inner.write_all(&rest) {
                        first.get_or_insert(e);
                    }
                }
                Err(e) => {
                    first = Some(e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{dyn_sink, str_source, DynBuffer};

    fn pkcs7_encode(input: &[u8], block: usize) -> Vec<u8> {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = PadEncoder::pkcs7(sink, block, "w").unwrap();
        dev.write_all(input).unwrap();
        dev.close().unwrap();
        let out = bytes.lock().clone();
        out
    }

    #[test]
    fn test_pkcs7_encode_lengths() {
        // Encoded length is always the next multiple of 16 strictly above L.
        for len in [0usize, 1, 15, 16, 17, 31, 32] {
            let input = vec![0xabu8; len];
            let out = pkcs7_encode(&input, 16);
            assert_eq!(out.len(), 16 * (len / 16 + 1), "len {}", len);
            assert_eq!(&out[..len], &input[..]);
        }
    }

    #[test]
    fn test_pkcs7_encode_values() {
        let out = pkcs7_encode(b"yellow submarine!", 16);
        // 17 bytes -> 15 bytes of 0x0f
        assert_eq!(out.len(), 32);
        assert!(out[17..].iter().all(|&b| b == 15));

        let aligned = pkcs7_encode(&[0u8; 16], 16);
        assert_eq!(aligned.len(), 32);
        assert!(aligned[16..].iter().all(|&b| b == 16));
    }

    #[test]
    fn test_pkcs7_read_shape_synthesizes_pad() {
        let src = str_source("abc").unwrap();
        let mut dev = PadEncoder::pkcs7(src, 8, "r").unwrap();
        let mut out = Vec::new();
        dev.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc\x05\x05\x05\x05\x05");
    }

    #[test]
    fn test_pkcs7_round_trip() {
        for len in [0usize, 1, 7, 15, 16, 33] {
            let input: Vec<u8> = (0..len as u8).collect();
            let encoded = pkcs7_encode(&input, 16);

            let src = Device::open(DynBuffer::from_vec(encoded), "r").unwrap();
            let mut dec = Pkcs7Unpad::open(src, 16, "r").unwrap();
            let mut out = Vec::new();
            dec.read_to_end(&mut out).unwrap();
            assert_eq!(out, input, "len {}", len);
        }
    }

    #[test]
    fn test_pkcs7_unpad_write_shape() {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = Pkcs7Unpad::open(sink, 16, "w").unwrap();
        dev.write_all(&pkcs7_encode(b"hello", 16)).unwrap();
        dev.close().unwrap();
        assert_eq!(&*bytes.lock(), b"hello");
    }

    #[test]
    fn test_pkcs7_unpad_rejects_bad_pad() {
        let mut bad = vec![0x41u8; 16];
        bad[15] = 0; // k = 0 is never valid
        let src = Device::open(DynBuffer::from_vec(bad), "r").unwrap();
        let mut dec = Pkcs7Unpad::open(src, 16, "r").unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            dec.read_to_end(&mut out),
            Err(DeviceError::PadInvalid)
        ));

        let mut mismatched = vec![0x41u8; 16];
        mismatched[14] = 3;
        mismatched[15] = 4;
        let src = Device::open(DynBuffer::from_vec(mismatched), "r").unwrap();
        let mut dec = Pkcs7Unpad::open(src, 16, "r").unwrap();
        assert!(matches!(
            dec.read_to_end(&mut Vec::new()),
            Err(DeviceError::PadInvalid)
        ));
    }

    #[test]
    fn test_pkcs7_unpad_rejects_short_input() {
        let src = Device::open(DynBuffer::from_vec(vec![1u8; 5]), "r").unwrap();
        let mut dec = Pkcs7Unpad::open(src, 16, "r").unwrap();
        assert!(matches!(
            dec.read_to_end(&mut Vec::new()),
            Err(DeviceError::PadInvalid)
        ));
    }

    #[test]
    fn test_bit_pad_values() {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = PadEncoder::bit(sink, 16, "w").unwrap();
        dev.write_all(b"abc").unwrap();
        dev.close().unwrap();
        let out = bytes.lock().clone();
        assert_eq!(out.len(), 16);
        assert_eq!(out[3], 0x80);
        assert!(out[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bit_pad_aligned_adds_full_block() {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = PadEncoder::bit(sink, 16, "w").unwrap();
        dev.write_all(&[7u8; 16]).unwrap();
        dev.close().unwrap();
        let out = bytes.lock().clone();
        assert_eq!(out.len(), 32);
        assert_eq!(out[16], 0x80);
    }

    #[test]
    fn test_block_size_bounds() {
        let (sink, _) = dyn_sink().unwrap();
        assert!(matches!(
            PadEncoder::pkcs7(sink, 256, "w"),
            Err(DeviceError::InvalidMode(_))
        ));
        let (sink, _) = dyn_sink().unwrap();
        assert!(matches!(
            Pkcs7Unpad::open(sink, 0, "r"),
            Err(DeviceError::InvalidMode(_))
        ));
    }
}
