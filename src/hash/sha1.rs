//! SHA-1 (FIPS 180-4). Same streaming shape as the SHA-256 core: 64-byte
//! blocks, big-endian length trailer, pluggable compression routine.

const H0: [u32; 5] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476, 0xc3d2e1f0];

pub const DIGEST_LEN: usize = 20;
pub const BLOCK_LEN: usize = 64;

pub type Compression = fn(&mut [u32; 5], &[u8; BLOCK_LEN]);

#[derive(Clone)]
pub struct Sha1 {
    state: [u32; 5],
    buffer: [u8; BLOCK_LEN],
    buffer_len: usize,
    total_bits: u64,
    compress: Compression,
}

impl Sha1 {
    pub fn new() -> Self {
        Self::with_compression(compress_scalar)
    }

    pub fn scalar() -> Self {
        Self::with_compression(compress_scalar)
    }

    pub fn with_compression(compress: Compression) -> Self {
        Sha1 {
            state: H0,
            buffer: [0; BLOCK_LEN],
            buffer_len: 0,
            total_bits: 0,
            compress,
        }
    }

    pub fn reset(&mut self) {
        self.state = H0;
        self.buffer = [0; BLOCK_LEN];
        self.buffer_len = 0;
        self.total_bits = 0;
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut offset = 0;
        if self.buffer_len > 0 {
            let take = (BLOCK_LEN - self.buffer_len).min(data.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&data[..take]);
            self.buffer_len += take;
            offset = take;
            if self.buffer_len == BLOCK_LEN {
                let block = self.buffer;
                (self.compress)(&mut self.state, &block);
                self.buffer_len = 0;
            }
        }
        while offset + BLOCK_LEN <= data.len() {
            let block: &[u8; BLOCK_LEN] = data[offset..offset + BLOCK_LEN].try_into().expect("whole block");
            (self.compress)(&mut self.state, block);
            offset += BLOCK_LEN;
        }
        if offset < data.len() {
            let rest = data.len() - offset;
            self.buffer[..rest].copy_from_slice(&data[offset..]);
            self.buffer_len = rest;
        }
        self.total_bits = self.total_bits.wrapping_add((data.len() as u64) * 8);
    }

    /// Digest of everything absorbed so far; the live state is untouched.
    pub fn peek(&self) -> [u8; DIGEST_LEN] {
        let mut copy = self.clone();
        copy.pad();
        let mut out = [0u8; DIGEST_LEN];
        for (i, word) in copy.state.iter().enumerate() {
            out[i * 4..(i + 1) * 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    fn pad(&mut self) {
        let total_bits = self.total_bits;
        let mut trailer = [0u8; BLOCK_LEN * 2];
        trailer[0] = 0x80;
        let pad_len = if self.buffer_len < 56 {
            56 - self.buffer_len
        } else {
            120 - self.buffer_len
        };
        trailer[pad_len..pad_len + 8].copy_from_slice(&total_bits.to_be_bytes());
        self.update(&trailer[..pad_len + 8]);
    }
}

impl Default for Sha1 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience.
pub fn sha1(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut h = Sha1::new();
    h.update(data);
    h.peek()
}

/// Scalar FIPS 180-4 compression step.
pub fn compress_scalar(state: &mut [u32; 5], block: &[u8; BLOCK_LEN]) {
    let mut w = [0u32; 80];
    for (i, chunk) in block.chunks_exact(4).enumerate() {
        w[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    for i in 16..80 {
        w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = *state;
    for (i, &word) in w.iter().enumerate() {
        let (f, k) = match i {
            0..=19 => ((b & c) | ((!b) & d), 0x5a827999),
            20..=39 => (b ^ c ^ d, 0x6ed9eba1),
            40..=59 => ((b & c) | (b & d) | (c & d), 0x8f1bbcdc),
            _ => (b ^ c ^ d, 0xca62c1d6),
        };
        let t = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(k)
            .wrapping_add(word);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = t;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
}
