//! Bloom filter for fast existence checks

/// Smallest filter ever built, keeps false positives sane for tiny tables
const MIN_BITS: usize = 64;

/// Bloom filter implementation
///
/// Uses double hashing over a stable 32-bit hash so filters written by one
/// build are readable by any other.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a new bloom filter sized for `num_keys`
    pub fn new(num_keys: usize, bits_per_key: usize) -> Self {
        let num_bits = (num_keys * bits_per_key).max(MIN_BITS);
        let num_bytes = num_bits.div_ceil(8);

        // Optimal number of hash functions
        let num_hashes = ((bits_per_key as f64) * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Build a filter over a set of keys
    pub fn build<'a>(keys: impl IntoIterator<Item = &'a [u8]>, bits_per_key: usize) -> Self {
        let keys: Vec<&[u8]> = keys.into_iter().collect();
        let mut filter = Self::new(keys.len(), bits_per_key);
        for key in keys {
            filter.add(key);
        }
        filter
    }

    /// Create from existing data
    pub fn from_bytes(data: Vec<u8>, num_hashes: usize) -> Self {
        let num_bits = data.len() * 8;
        Self {
            bits: data,
            num_bits,
            num_hashes,
        }
    }

    /// Add a key to the filter
    pub fn add(&mut self, key: &[u8]) {
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);

        for _ in 0..self.num_hashes {
            let bit = (h as usize) % self.num_bits;
            self.set_bit(bit);
            h = h.wrapping_add(delta);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);

        for _ in 0..self.num_hashes {
            let bit = (h as usize) % self.num_bits;
            if !self.get_bit(bit) {
                return false;
            }
            h = h.wrapping_add(delta);
        }

        true
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Get number of hash functions
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    fn set_bit(&mut self, bit: usize) {
        self.bits[bit / 8] |= 1 << (bit % 8);
    }

    fn get_bit(&self, bit: usize) -> bool {
        (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
    }
}

/// Murmur-style 32-bit hash, stable across platforms and releases
fn bloom_hash(data: &[u8]) -> u32 {
    const SEED: u32 = 0xbc9f_1d34;
    const M: u32 = 0xc6a4_a793;

    let mut h = SEED ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        for (i, byte) in rest.iter().enumerate() {
            h = h.wrapping_add((*byte as u32) << (8 * i));
        }
        h = h.wrapping_mul(M);
        h ^= h >> 24;
    }

    h
}
