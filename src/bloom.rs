//! Per-partition Bloom filter over rare terms.
//!
//! Classical bit-array filter with `k` independent probes derived from two
//! 64-bit base hashes via double hashing (Kirsch-Mitzenmacher). No false
//! negatives: every term actually posted in the partition tests positive.
//! False positives are permitted and bounded by the configured
//! `bloom_fpr`.

use std::hash::Hasher;

/// A frozen, lock-free-readable Bloom filter.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Size a filter for `expected_items` at the target false-positive rate.
    ///
    /// Standard formulas: `m = -n*ln(p) / (ln(2)^2)`, `k = (m/n)*ln(2)`.
    pub fn with_fpr(expected_items: usize, fpr: f64) -> Self {
        let n = (expected_items.max(1)) as f64;
        let fpr = fpr.clamp(1e-6, 0.5);
        let m = (-n * fpr.ln() / (std::f64::consts::LN_2.powi(2)))
            .ceil()
            .max(8.0);
        let k = ((m / n) * std::f64::consts::LN_2).round().clamp(1.0, 16.0) as u32;
        let num_bits = m as u64;
        let words = num_bits.div_ceil(64).max(1);
        Self {
            bits: vec![0u64; words as usize],
            num_bits,
            num_hashes: k,
        }
    }

    /// An empty filter that reports "definitely absent" for everything
    /// (used for partitions with zero rare terms).
    pub fn empty() -> Self {
        Self {
            bits: vec![0u64; 1],
            num_bits: 64,
            num_hashes: 1,
        }
    }

    fn base_hashes(term: &str) -> (u64, u64) {
        let mut h1 = rustc_fnv1a(term, 0xcbf29ce484222325);
        let mut h2 = rustc_fnv1a(term, 0x1000000000001b3);
        // Avoid a degenerate double-hash cycle when both bases collide.
        if h2 == 0 {
            h2 = 1;
        }
        if h1 == 0 {
            h1 = 1;
        }
        (h1, h2)
    }

    fn bit_indices(&self, term: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::base_hashes(term);
        let num_bits = self.num_bits;
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            combined % num_bits
        })
    }

    /// Insert a term into the filter.
    pub fn insert(&mut self, term: &str) {
        for idx in self.bit_indices(term).collect::<Vec<_>>() {
            let word = (idx / 64) as usize;
            let bit = idx % 64;
            self.bits[word] |= 1 << bit;
        }
    }

    /// Test membership. `true` means "possibly present"; `false` means
    /// "definitely absent" (no false negatives).
    pub fn contains(&self, term: &str) -> bool {
        self.bit_indices(term).all(|idx| {
            let word = (idx / 64) as usize;
            let bit = idx % 64;
            self.bits[word] & (1 << bit) != 0
        })
    }

    /// Number of bits in the underlying array.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash probes per test.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Raw bit storage, for serialization.
    pub fn bits(&self) -> &[u64] {
        &self.bits
    }

    /// Reconstruct a filter from its serialized parts.
    pub fn from_parts(bits: Vec<u64>, num_bits: u64, num_hashes: u32) -> Self {
        Self {
            bits,
            num_bits,
            num_hashes,
        }
    }
}

/// FNV-1a over UTF-8 bytes with a caller-chosen offset basis, giving two
/// independent base hashes from the same algorithm by varying the basis.
fn rustc_fnv1a(s: &str, offset_basis: u64) -> u64 {
    struct Fnv1a(u64);
    impl Hasher for Fnv1a {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            const PRIME: u64 = 0x100000001b3;
            for &b in bytes {
                self.0 ^= b as u64;
                self.0 = self.0.wrapping_mul(PRIME);
            }
        }
    }
    let mut hasher = Fnv1a(offset_basis);
    hasher.write(s.as_bytes());
    hasher.finish()
}
