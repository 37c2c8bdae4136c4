//! AES cipher filter.
//!
//! The filter is encrypt-only or decrypt-only, fixed at open, and works in
//! either data-flow shape: opened `r` it pulls from the underlying and serves
//! transformed bytes; opened `w` it takes bytes from the caller and pushes
//! transformed bytes down. `rw` permits both, with explicit state switches.
//!
//! Block modes (ECB/CBC/PCBC) process whole 16-byte blocks only; a trailing
//! partial block is held back and must be resolved by an adjacent padding
//! filter; the cipher itself never pads. Stream modes (CFB/OFB) are
//! byte-granular. CTR is declared but not supported.

pub mod aes;

use crate::device::{Backend, Device, Direction, IoStatus};
use crate::error::{DeviceError, DeviceResult};
use crate::mode::OpenMode;

use aes::{BlockFn, RoundKeys, BLOCK_LEN};

/// Block-cipher chaining discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Ecb,
    Cbc,
    Pcbc,
    /// Byte-granular cipher feedback (CFB-8).
    Cfb,
    Ofb,
    /// Declared for completeness; open fails with `Unsupported`.
    Ctr,
}

impl CipherMode {
    fn is_stream(self) -> bool {
        matches!(self, CipherMode::Cfb | CipherMode::Ofb)
    }

    fn needs_iv(self) -> bool {
        !matches!(self, CipherMode::Ecb)
    }
}

/// Transform polarity, fixed at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoDir {
    Encrypt,
    Decrypt,
}

/// The AES filter device.
pub struct AesFilter {
    inner: Device,
    keys: RoundKeys,
    cipher_mode: CipherMode,
    dir: CryptoDir,
    enc: BlockFn,
    dec: BlockFn,
    /// Chaining register (IV / previous block) for the chained modes.
    iv: [u8; BLOCK_LEN],
    /// Staged input for block modes, always < one block.
    partial: [u8; BLOCK_LEN],
    partial_len: usize,
    /// OFB keystream consumption cursor; 16 forces regeneration.
    ks_used: usize,
    /// Transformed output awaiting delivery on the read side.
    pending: Vec<u8>,
    pending_pos: usize,
}

impl AesFilter {
    /// Stack a cipher filter over `inner`. Chained modes require an IV;
    /// ECB rejects one. Key must be 16, 24 or 32 bytes.
    pub fn open(
        inner: Device,
        key: &[u8],
        iv: Option<[u8; BLOCK_LEN]>,
        cipher_mode: CipherMode,
        dir: CryptoDir,
        mode: &str,
    ) -> DeviceResult<Device> {
        if cipher_mode == CipherMode::Ctr {
            return Err(DeviceError::Unsupported(
                "CTR mode has no standardized counter contract here".to_string(),
            ));
        }
        let iv = match (cipher_mode.needs_iv(), iv) {
            (true, Some(iv)) => iv,
            (true, None) => {
                return Err(DeviceError::InvalidMode(format!(
                    "{:?} mode requires an IV",
                    cipher_mode
                )))
            }
            (false, None) => [0u8; BLOCK_LEN],
            (false, Some(_)) => {
                return Err(DeviceError::InvalidMode("ECB mode takes no IV".to_string()))
            }
        };
        let keys = RoundKeys::expand(key)?;
        Device::open(
            AesFilter {
                inner,
                keys,
                cipher_mode,
                dir,
                enc: aes::encrypt_block,
                dec: aes::decrypt_block,
                iv,
                partial: [0; BLOCK_LEN],
                partial_len: 0,
                ks_used: BLOCK_LEN,
                pending: Vec::new(),
                pending_pos: 0,
            },
            mode,
        )
    }

    /// Apply the chaining discipline to one whole block, in place.
    fn crypt_block(&mut self, block: &mut [u8; BLOCK_LEN]) {
        match (self.cipher_mode, self.dir) {
            (CipherMode::Ecb, CryptoDir::Encrypt) => (self.enc)(&self.keys, block),
            (CipherMode::Ecb, CryptoDir::Decrypt) => (self.dec)(&self.keys, block),
            (CipherMode::Cbc, CryptoDir::Encrypt) => {
                xor_into(block, &self.iv);
                (self.enc)(&self.keys, block);
                self.iv = *block;
            }
            (CipherMode::Cbc, CryptoDir::Decrypt) => {
                let cipher = *block;
                (self.dec)(&self.keys, block);
                xor_into(block, &self.iv);
                self.iv = cipher;
            }
            (CipherMode::Pcbc, CryptoDir::Encrypt) => {
                let plain = *block;
                xor_into(block, &self.iv);
                (self.enc)(&self.keys, block);
                self.iv = xor_of(&plain, block);
            }
            (CipherMode::Pcbc, CryptoDir::Decrypt) => {
                let cipher = *block;
                (self.dec)(&self.keys, block);
                xor_into(block, &self.iv);
                self.iv = xor_of(block, &cipher);
            }
            (stream, _) => {
                debug_assert!(stream.is_stream());
            }
        }
    }

    /// Byte-granular transform for the stream modes, in place.
    fn crypt_stream(&mut self, data: &mut [u8]) {
        match self.cipher_mode {
            CipherMode::Cfb => {
                for b in data.iter_mut() {
                    let mut ks = self.iv;
                    (self.enc)(&self.keys, &mut ks);
                    let feedback = match self.dir {
                        CryptoDir::Encrypt => {
                            *b ^= ks[0];
                            *b
                        }
                        CryptoDir::Decrypt => {
                            let cipher_byte = *b;
                            *b ^= ks[0];
                            cipher_byte
                        }
                    };
                    self.iv.copy_within(1.., 0);
                    self.iv[BLOCK_LEN - 1] = feedback;
                }
            }
            CipherMode::Ofb => {
                for b in data.iter_mut() {
                    if self.ks_used == BLOCK_LEN {
                        let mut ks = self.iv;
                        (self.enc)(&self.keys, &mut ks);
                        self.iv = ks;
                        self.ks_used = 0;
                    }
                    *b ^= self.iv[self.ks_used];
                    self.ks_used += 1;
                }
            }
            _ => unreachable!("block modes go through crypt_block"),
        }
    }

    /// Transform `input`, appending the produced bytes to `out`. Block modes
    /// stage a trailing partial block.
    fn transform(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if self.cipher_mode.is_stream() {
            let mut buf = input.to_vec();
            self.crypt_stream(&mut buf);
            out.extend_from_slice(&buf);
            return;
        }
        let mut input = input;
        if self.partial_len > 0 {
            let take = (BLOCK_LEN - self.partial_len).min(input.len());
            self.partial[self.partial_len..self.partial_len + take]
                .copy_from_slice(&input[..take]);
            self.partial_len += take;
            input = &input[take..];
            if self.partial_len == BLOCK_LEN {
                let mut block = self.partial;
                self.crypt_block(&mut block);
                out.extend_from_slice(&block);
                self.partial_len = 0;
            }
        }
        let mut chunks = input.chunks_exact(BLOCK_LEN);
        for chunk in &mut chunks {
            let mut block: [u8; BLOCK_LEN] = chunk.try_into().expect("whole block");
            self.crypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        let rest = chunks.remainder();
        if !rest.is_empty() {
            self.partial[..rest.len()].copy_from_slice(rest);
            self.partial_len = rest.len();
        }
    }

    fn serve_pending(&mut self, buf: &mut [u8]) -> usize {
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

fn xor_into(dst: &mut [u8; BLOCK_LEN], src: &[u8; BLOCK_LEN]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

fn xor_of(a: &[u8; BLOCK_LEN], b: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let mut out = *a;
    xor_into(&mut out, b);
    out
}

impl Backend for AesFilter {
    fn kind(&self) -> &'static str {
        "aes"
    }

    fn open(&mut self, mode: &OpenMode) -> DeviceResult<()> {
        let (enc, dec) = aes::select_block_transforms(mode.no_accel);
        self.enc = enc;
        self.dec = dec;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        if self.pending_pos < self.pending.len() {
            return Ok(IoStatus::Ready(self.serve_pending(buf)));
        }
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                if !self.inner.eof() {
                    return Ok(IoStatus::Pending);
                }
                if self.partial_len > 0 {
                    // The input was not a whole number of blocks and no
                    // padding filter resolved it.
                    return Err(DeviceError::Truncated);
                }
                return Ok(IoStatus::End);
            }
            let mut out = std::mem::take(&mut self.pending);
            self.transform(&chunk[..n], &mut out);
            self.pending = out;
            if !self.pending.is_empty() {
                return Ok(IoStatus::Ready(self.serve_pending(buf)));
            }
            // Everything landed in the partial block; pull more.
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        let mut out = Vec::with_capacity(buf.len() + BLOCK_LEN);
        self.transform(buf, &mut out);
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(IoStatus::Ready(buf.len()))
    }

    fn flush(&mut self) -> DeviceResult<()> {
        // A staged partial block stays staged; flush only forwards.
        self.inner.flush()
    }

    fn supports_switch(&self) -> bool {
        true
    }

    fn switch(&mut self, to: Direction) -> DeviceResult<()> {
        // Direction changes are only legal on a block boundary; the chaining
        // register carries across.
        if self.partial_len > 0 {
            return Err(DeviceError::BadState);
        }
        if to == Direction::Writing {
            self.pending.clear();
            self.pending_pos = 0;
        }
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        let mut first: Option<DeviceError> = None;
        if self.partial_len > 0 {
            // Unresolved trailing bytes: the adjacent padding filter was
            // missing or the input was short.
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
