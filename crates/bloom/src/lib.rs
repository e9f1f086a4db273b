//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits and hash functions used.
//!
//! ## Usage in StrataKV
//!
//! Every SSTable has a `<name>.bloom` companion built from its encoded keys.
//! During point lookups the level manager checks the bloom filter first -- if
//! it says "not present", the SSTable is skipped entirely, avoiding the sparse
//! index lookup and the page read.
//!
//! ## Persisted form
//!
//! ```text
//! <num_hashes>\n
//! <bit0>,<bit1>,...,<bitN-1>
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1000, 0.2);
//! bf.insert(b"hello");
//! assert!(bf.may_contain(b"hello"));
//! ```
use std::io::{self, BufRead, Write};

/// A bloom filter backed by a bit vector with `k` independent hash functions.
///
/// Uses double hashing: `h(i) = h1 + i * h2` where `h1` and `h2` are derived
/// from FNV-1a with two different seeds, each passed through a 64-bit
/// finalizer so that fixed-width numeric keys spread evenly.
pub struct BloomFilter {
    /// The bit vector storing the filter state.
    bits: Vec<u8>,
    /// Number of bits in the filter.
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a new bloom filter sized for `expected_items` with the given
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

        // Optimal number of bits: m = -n * ln(p) / (ln(2)^2)
        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil() as u64;
        let m = m.max(8);

        // Optimal number of hashes: k = (m/n) * ln(2)
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.max(1);

        Self {
            bits: vec![0u8; byte_len(m)],
            num_bits: m,
            num_hashes: k,
        }
    }

    /// Builds a filter sized for `keys.len()` items and inserts every key.
    pub fn from_keys<'a, I>(keys: I, expected_items: usize, false_positive_rate: f64) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bf = Self::new(expected_items.max(1), false_positive_rate);
        for key in keys {
            bf.insert(key);
        }
        bf
    }

    /// Inserts a key into the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            self.set_bit(bit_idx);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        for i in 0..self.num_hashes {
            let bit_idx = self.get_bit_index(h1, h2, i);
            if !self.get_bit(bit_idx) {
                return false;
            }
        }
        true
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of bits currently set.
    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.bits.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    /// Writes the filter in its text form: the hash count on the first line,
    /// the comma-joined bit array on the second.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "{}", self.num_hashes)?;
        for idx in 0..self.num_bits {
            if idx > 0 {
                w.write_all(b",")?;
            }
            w.write_all(if self.get_bit(idx) { b"1" } else { b"0" })?;
        }
        w.write_all(b"\n")?;
        Ok(())
    }

    /// Reads a filter previously written by [`write_to`](BloomFilter::write_to).
    pub fn read_from<R: BufRead>(r: &mut R) -> io::Result<Self> {
        let mut line = String::new();
        r.read_line(&mut line)?;
        let num_hashes: u32 = line
            .trim()
            .parse()
            .map_err(|_| invalid(format!("bad bloom hash count: {:?}", line.trim())))?;
        if num_hashes == 0 {
            return Err(invalid("bloom hash count must be > 0".to_string()));
        }

        line.clear();
        r.read_line(&mut line)?;
        let mut bits = Vec::new();
        let mut num_bits = 0u64;
        for token in line.trim().split(',').filter(|t| !t.is_empty()) {
            let bit = match token {
                "0" => false,
                "1" => true,
                other => return Err(invalid(format!("bad bloom bit: {:?}", other))),
            };
            if num_bits % 8 == 0 {
                bits.push(0u8);
            }
            if bit {
                let last = bits.len() - 1;
                bits[last] |= 1 << (num_bits % 8);
            }
            num_bits += 1;
        }
        if num_bits == 0 {
            return Err(invalid("empty bloom bit array".to_string()));
        }

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    // ---- Internal helpers ----

    /// Double hashing: h(i) = (h1 + i * h2) mod num_bits.
    fn get_bit_index(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }

    fn set_bit(&mut self, idx: u64) {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        self.bits[byte_idx] |= 1 << bit_offset;
    }

    fn get_bit(&self, idx: u64) -> bool {
        let byte_idx = (idx / 8) as usize;
        let bit_offset = (idx % 8) as u8;
        (self.bits[byte_idx] >> bit_offset) & 1 == 1
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

fn byte_len(num_bits: u64) -> usize {
    ((num_bits + 7) / 8) as usize
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Computes two independent 64-bit hashes using FNV-1a with different seeds.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    let h1 = fmix64(fnv1a_64(key, 0xcbf29ce484222325));
    let h2 = fmix64(fnv1a_64(key, 0x517cc1b727220a95));
    (h1, h2)
}

/// FNV-1a 64-bit hash with a configurable starting basis.
fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    const FNV_PRIME: u64 = 0x00000100000001b3;
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// MurmurHash3 64-bit finalizer.
fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51afd7ed558ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests;
