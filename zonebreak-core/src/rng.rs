//! Deterministic RNG hierarchy.
//!
//! A master seed generates deterministic sub-seeds for each `(asset, stream)`
//! pair. Sub-seeds are derived via BLAKE3 hashing, independently of thread
//! scheduling order, so multi-asset runs are identical at any thread count.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for `(asset, stream)`. Order of derivation does not matter.
    pub fn sub_seed(&self, asset: &str, stream: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(asset.as_bytes());
        hasher.update(&stream.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, asset: &str, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(asset, stream))
    }
}
