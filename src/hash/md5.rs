//! MD5 (RFC 1321). Same streaming shape as the SHA cores but little-endian
//! throughout: the length trailer and the digest words are both emitted
//! little-endian, per the published algorithm.

const H0: [u32; 4] = [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476];

/// Per-round left-rotation amounts.
const S: [u32; 64] = [
    7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22,
    5, 9, 14, 20, 5, 9, 14, 20, 5, 9, 14, 20, 5, 9, 14, 20,
    4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23,
    6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
];

/// Sine-derived round constants.
const K: [u32; 64] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee,
    0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be,
    0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
    0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa,
    0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
    0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed,
    0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
    0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c,
    0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
    0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05,
    0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
    0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039,
    0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
    0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1,
    0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

pub const DIGEST_LEN: usize = 16;
pub const BLOCK_LEN: usize = 64;

pub type Compression = fn(&mut [u32; 4], &[u8; BLOCK_LEN]);

#[derive(Clone)]
pub struct Md5 {
    state: [u32; 4],
    buffer: [u8; BLOCK_LEN],
    buffer_len: usize,
    total_bits: u64,
    compress: Compression,
}

impl Md5 {
    pub fn new() -> Self {
        Self::with_compression(compress_scalar)
    }

    pub fn scalar() -> Self {
        Self::with_compression(compress_scalar)
    }

    pub fn with_compression(compress: Compression) -> Self {
        Md5 {
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
            out[i * 4..(i + 1) * 4].copy_from_slice(&word.to_le_bytes());
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
        trailer[pad_len..pad_len + 8].copy_from_slice(&total_bits.to_le_bytes());
        self.update(&trailer[..pad_len + 8]);
    }
}

impl Default for Md5 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience.
pub fn md5(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut h = Md5::new();
    h.update(data);
    h.peek()
}

/// Scalar RFC 1321 compression step.
pub fn compress_scalar(state: &mut [u32; 4], block: &[u8; BLOCK_LEN]) {
    let mut m = [0u32; 16];
    for (i, chunk) in block.chunks_exact(4).enumerate() {
        m[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let [mut a, mut b, mut c, mut d] = *state;
    for i in 0..64 {
        let (f, g) = match i {
            0..=15 => ((b & c) | ((!b) & d), i),
            16..=31 => ((d & b) | ((!d) & c), (5 * i + 1) % 16),
            32..=47 => (b ^ c ^ d, (3 * i + 5) % 16),
            _ => (c ^ (b | !d), (7 * i) % 16),
        };
        let tmp = d;
        d = c;
        c = b;
        b = b.wrapping_add(
            a.wrapping_add(f)
                .wrapping_add(K[i])
                .wrapping_add(m[g])
                .rotate_left(S[i]),
        );
        a = tmp;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}
