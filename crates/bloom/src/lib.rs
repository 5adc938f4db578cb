//! # Bloom filter bits
//!
//! The bit-array probe shared by every filter block flavour of the table
//! reader: the legacy per-data-block filter, the whole-file filter and the
//! fixed-size filter segments all store one or more serialized
//! [`BloomFilter`]s.
//!
//! A negative answer from [`BloomFilter::may_contain`] is definite; a
//! positive one may be a false positive with a rate bounded by the
//! parameters the filter was built with.
//!
//! ## Wire format
//!
//! ```text
//! [num_bits: u64 LE][num_hashes: u32 LE][bits_len: u32 LE][bits: bytes]
//! ```
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.01);
//! bf.insert(b"hello");
//! let encoded = bf.to_bytes();
//!
//! let decoded = BloomFilter::from_bytes(&encoded).unwrap();
//! assert!(decoded.may_contain(b"hello"));
//! ```
use std::io::{self, Read, Write};

/// Size of the fixed header preceding the bit array.
pub const HEADER_BYTES: usize = 8 + 4 + 4;

/// Largest bit array accepted while decoding (128 MiB). Guards against
/// allocating from a corrupt length field.
pub const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// A bloom filter backed by a bit vector with `k` probes.
///
/// Probe positions use double hashing: `h(i) = h1 + i * h2` where `h1` and
/// `h2` are FNV-1a with two different bases.
#[derive(Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_items` keys at the given
    /// target `false_positive_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in `(0, 1)`.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        // m = -n * ln(p) / (ln(2)^2)
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
        let m = m.max(8);

        // k = (m/n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.max(1);

        Self {
            bits: vec![0u8; m.div_ceil(8) as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Creates a filter sized by a bits-per-key budget, the way filter
    /// policies are usually configured.
    pub fn with_bits_per_key(expected_items: usize, bits_per_key: usize) -> Self {
        let expected_items = expected_items.max(1);
        let m = ((expected_items * bits_per_key.max(1)) as u64).max(8);
        let k = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        Self {
            bits: vec![0u8; m.div_ceil(8) as usize],
            num_bits: m,
            num_hashes: k.clamp(1, 30),
        }
    }

    /// Adds a key.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Returns `false` if `key` was definitely never inserted.
    ///
    /// A filter with no bits (only reachable through a malformed encoding)
    /// cannot rule anything out and always answers `true`.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }
        let (h1, h2) = hash_pair(key);
        (0..self.num_hashes).all(|i| self.get_bit(self.bit_index(h1, h2, i)))
    }

    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Heap bytes held by the bit array.
    #[must_use]
    pub fn approximate_memory_usage(&self) -> usize {
        self.bits.capacity()
    }

    /// Returns the size of the serialized filter in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        HEADER_BYTES + self.bits.len()
    }

    /// Serializes into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.encode_into(&mut out);
        out
    }

    /// Appends the serialized filter to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&(self.bits.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.bits);
    }

    /// Serializes the filter to a writer.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    /// Decodes a filter from the exact bytes of a filter block or segment.
    ///
    /// Trailing bytes after the bit array are rejected, as is a bit count
    /// that the array cannot hold.
    pub fn from_bytes(data: &[u8]) -> io::Result<Self> {
        if data.len() < HEADER_BYTES {
            return Err(invalid("bloom filter shorter than its header"));
        }
        let num_bits = u64::from_le_bytes(fixed(&data[0..8]));
        let num_hashes = u32::from_le_bytes(fixed(&data[8..12]));
        let bits_len = u32::from_le_bytes(fixed(&data[12..16])) as usize;
        if bits_len > MAX_BLOOM_BYTES {
            return Err(invalid(format!("bloom filter too large: {} bytes", bits_len)));
        }
        if data.len() != HEADER_BYTES + bits_len {
            return Err(invalid(format!(
                "bloom filter length mismatch: header says {} bytes, found {}",
                bits_len,
                data.len() - HEADER_BYTES
            )));
        }
        if num_bits > (bits_len as u64) * 8 {
            return Err(invalid(format!(
                "bloom filter claims {} bits in a {} byte array",
                num_bits, bits_len
            )));
        }
        Ok(Self {
            bits: data[HEADER_BYTES..].to_vec(),
            num_bits,
            num_hashes,
        })
    }

    /// Deserializes a bloom filter from a reader.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut header = [0u8; HEADER_BYTES];
        r.read_exact(&mut header)?;
        let bits_len = u32::from_le_bytes(fixed(&header[12..16])) as usize;
        if bits_len > MAX_BLOOM_BYTES {
            return Err(invalid(format!("bloom filter too large: {} bytes", bits_len)));
        }
        let mut buf = header.to_vec();
        buf.resize(HEADER_BYTES + bits_len, 0);
        r.read_exact(&mut buf[HEADER_BYTES..])?;
        Self::from_bytes(&buf)
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        self.bits[(idx / 8) as usize] |= 1 << (idx % 8);
    }

    fn get_bit(&self, idx: u64) -> bool {
        (self.bits[(idx / 8) as usize] >> (idx % 8)) & 1 == 1
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

fn hash_pair(key: &[u8]) -> (u64, u64) {
    (
        fnv1a_64(key, 0xcbf2_9ce4_8422_2325),
        fnv1a_64(key, 0x517c_c1b7_2722_0a95),
    )
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    data.iter()
        .fold(basis, |hash, &byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

fn fixed<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(src);
    out
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests;
