// Claxon -- A FLAC decoding library in Rust
// Copyright 2021 Ruud van Asseldonk
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// A copy of the License has been included in the root of the repository.

//! A streaming MD5 implementation, public-domain in origin (the algorithm
//! traces back to Colin Plumb's reference code). The codec feeds it the
//! interleaved raw PCM image of every decoded or encoded block, and the
//! resulting 16-byte digest is what STREAMINFO stores and what decoders use
//! to verify end-to-end correctness.

const S: [u32; 64] = [
    7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22,
    5, 9, 14, 20, 5, 9, 14, 20, 5, 9, 14, 20, 5, 9, 14, 20,
    4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23,
    6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
];

const K: [u32; 64] = [
    0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
    0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
    0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
    0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
    0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
    0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
    0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
    0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
];

/// A streaming MD5 hasher.
///
/// Feed it arbitrarily-sized chunks with [`Md5Writer::write`]; call
/// [`Md5Writer::finish`] exactly once to obtain the digest.
pub struct Md5Writer {
    state: [u32; 4],
    /// Total message length seen so far, in bytes.
    length: u64,
    /// Bytes not yet folded into a full 64-byte block.
    buffer: [u8; 64],
    buffer_len: usize,
}

impl Md5Writer {
    /// Creates a writer in the initial MD5 state.
    pub fn new() -> Md5Writer {
        Md5Writer {
            state: [0x67452301, 0xefcdab89, 0x98badcfe, 0x10325476],
            length: 0,
            buffer: [0u8; 64],
            buffer_len: 0,
        }
    }

    /// Feeds `data` into the running hash.
    pub fn write(&mut self, data: &[u8]) {
        self.length = self.length.wrapping_add(data.len() as u64);
        let mut data = data;

        if self.buffer_len > 0 {
            let need = 64 - self.buffer_len;
            let take = need.min(data.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&data[..take]);
            self.buffer_len += take;
            data = &data[take..];
            if self.buffer_len == 64 {
                let block = self.buffer;
                process_block(&mut self.state, &block);
                self.buffer_len = 0;
            }
        }

        while data.len() >= 64 {
            let mut block = [0u8; 64];
            block.copy_from_slice(&data[..64]);
            process_block(&mut self.state, &block);
            data = &data[64..];
        }

        if !data.is_empty() {
            self.buffer[..data.len()].copy_from_slice(data);
            self.buffer_len = data.len();
        }
    }

    /// Pads and finalizes the hash, returning the 16-byte digest.
    ///
    /// Consumes the writer, since feeding more data after padding would be
    /// meaningless.
    pub fn finish(mut self) -> [u8; 16] {
        let bit_length = self.length.wrapping_mul(8);
        let mut pad = [0u8; 64];
        pad[0] = 0x80;
        let pad_len = if self.buffer_len < 56 {
            56 - self.buffer_len
        } else {
            64 + 56 - self.buffer_len
        };
        self.write(&pad[..pad_len]);

        self.buffer[56..64].copy_from_slice(&bit_length.to_le_bytes());
        let block = self.buffer;
        process_block(&mut self.state, &block);

        let mut digest = [0u8; 16];
        for (i, word) in self.state.iter().enumerate() {
            digest[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        digest
    }
}

impl Default for Md5Writer {
    fn default() -> Md5Writer {
        Md5Writer::new()
    }
}

fn process_block(state: &mut [u32; 4], block: &[u8; 64]) {
    let mut m = [0u32; 16];
    for i in 0..16 {
        m[i] = u32::from_le_bytes([block[i * 4], block[i * 4 + 1], block[i * 4 + 2], block[i * 4 + 3]]);
    }

    let (mut a, mut b, mut c, mut d) = (state[0], state[1], state[2], state[3]);

    for i in 0..64 {
        let (f, g) = match i {
            0..=15 => ((b & c) | (!b & d), i),
            16..=31 => ((d & b) | (!d & c), (5 * i + 1) % 16),
            32..=47 => (b ^ c ^ d, (3 * i + 5) % 16),
            _ => (c ^ (b | !d), (7 * i) % 16),
        };
        let f = f.wrapping_add(a).wrapping_add(K[i]).wrapping_add(m[g]);
        a = d;
        d = c;
        c = b;
        b = b.wrapping_add(f.rotate_left(S[i]));
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
}

/// Writes one interleaved sample frame's worth of bytes into `out`, in the
/// little-endian, channel-interleaved layout MD5 is computed over.
///
/// `bytes_per_sample` is `ceil(bits_per_sample / 8)`.
pub fn push_sample_frame(out: &mut Vec<u8>, channel_samples: &[i32], bytes_per_sample: u32) {
    for &sample in channel_samples {
        let bytes = sample.to_le_bytes();
        out.extend_from_slice(&bytes[..bytes_per_sample as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_hex(data: &[u8]) -> String {
        let mut w = Md5Writer::new();
        w.write(data);
        w.finish().iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn empty_message() {
        assert_eq!(digest_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn known_vector_abc() {
        assert_eq!(digest_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn known_vector_alphabet() {
        assert_eq!(
            digest_hex(b"abcdefghijklmnopqrstuvwxyz"),
            "c3fcd3d76192e4007dfb496cca67e13b"
        );
    }

    #[test]
    fn chunked_write_matches_single_write() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();

        let mut whole = Md5Writer::new();
        whole.write(&data);

        let mut chunked = Md5Writer::new();
        for chunk in data.chunks(7) {
            chunked.write(chunk);
        }

        assert_eq!(whole.finish(), chunked.finish());
    }
}
