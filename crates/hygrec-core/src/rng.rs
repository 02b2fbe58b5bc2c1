//! Deterministic RNG keys.
//!
//! Keys are plain u64 seeds split through ChaCha8, so k-means restarts, batch
//! shuffling and synthetic catalogs are reproducible from a single seed.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// An RNG key for deterministic random number generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RngKey(pub u64);

impl RngKey {
    /// Create a new RNG key from a seed.
    pub fn new(seed: u64) -> Self {
        RngKey(seed)
    }

    /// Split this key into `n` independent keys.
    pub fn split(self, n: usize) -> Vec<RngKey> {
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![self];
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.0);
        (0..n).map(|_| RngKey(rng.next_u64())).collect()
    }

    /// Split into exactly two keys (common case).
    pub fn split_two(self) -> (RngKey, RngKey) {
        let keys = self.split(2);
        (keys[0], keys[1])
    }

    /// Derive the key for a numbered step (epoch, restart, level).
    pub fn fold_in(self, step: u64) -> RngKey {
        let mut rng = ChaCha8Rng::seed_from_u64(self.0 ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        RngKey(rng.next_u64())
    }

    /// Build a seeded generator from this key.
    pub fn rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }

    /// Get the seed value.
    pub fn seed(&self) -> u64 {
        self.0
    }
}

/// Fisher-Yates shuffle of `0..n` driven by `key`.
pub fn shuffled_indices(n: usize, key: RngKey) -> Vec<usize> {
    use rand::seq::SliceRandom;

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut key.rng());
    indices
}
