//! Splittable random keys.
//!
//! A [`PrngKey`] never produces numbers by itself. It is split into child keys
//! or folded together with a counter, and only then turned into a generator
//! with [`PrngKey::rng`]. Every derivation is a pure function of its inputs, so
//! the same root seed reproduces the same tree of keys.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const SPLIT_DOMAIN: u64 = 0x7370_6c69_7400_0001;
const FOLD_DOMAIN: u64 = 0x666f_6c64_0000_0002;

/// Deterministic, splittable random key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrngKey(u64);

impl PrngKey {
    /// Build a root key from a signed seed (the shape of hardware-sourced seeds).
    pub fn from_seed(seed: i64) -> Self {
        Self(seed as u64)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    fn derive(&self, domain: u64, stream: u64) -> ChaCha8Rng {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&self.0.to_le_bytes());
        seed[8..16].copy_from_slice(&domain.to_le_bytes());
        let mut rng = ChaCha8Rng::from_seed(seed);
        rng.set_stream(stream);
        rng
    }

    /// Split into `n` independent child keys.
    pub fn split(&self, n: usize) -> Vec<PrngKey> {
        let mut rng = self.derive(SPLIT_DOMAIN, 0);
        (0..n).map(|_| PrngKey(rng.next_u64())).collect()
    }

    pub fn split2(&self) -> [PrngKey; 2] {
        let mut rng = self.derive(SPLIT_DOMAIN, 0);
        [PrngKey(rng.next_u64()), PrngKey(rng.next_u64())]
    }

    pub fn split4(&self) -> [PrngKey; 4] {
        let mut rng = self.derive(SPLIT_DOMAIN, 0);
        [
            PrngKey(rng.next_u64()),
            PrngKey(rng.next_u64()),
            PrngKey(rng.next_u64()),
            PrngKey(rng.next_u64()),
        ]
    }

    /// Mix `data` (typically a step index) into the key.
    pub fn fold_in(&self, data: u64) -> PrngKey {
        let mut rng = self.derive(FOLD_DOMAIN, data);
        PrngKey(rng.next_u64())
    }

    /// Generator seeded from this key, for drawing actual numbers.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }
}

impl std::fmt::Display for PrngKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    #[test]
    fn split_is_deterministic() {
        let key = PrngKey::from_seed(42);
        assert_eq!(key.split4(), PrngKey::from_seed(42).split4());
        assert_eq!(key.split(4), key.split4().to_vec());
        assert_eq!(key.split(2), key.split2().to_vec());
    }

    #[test]
    fn split_children_are_distinct() {
        let children = PrngKey::from_seed(0).split(64);
        let unique: HashSet<_> = children.iter().collect();
        assert_eq!(unique.len(), 64);
    }

    #[test]
    fn fold_in_differs_per_step_and_from_split() {
        let key = PrngKey::from_seed(-7);
        let folded: HashSet<_> = (0..256).map(|step| key.fold_in(step)).collect();
        assert_eq!(folded.len(), 256);
        assert_eq!(key.fold_in(3), key.fold_in(3));
        assert!(!key.split(4).contains(&key.fold_in(0)));
    }

    #[test]
    fn different_seeds_give_different_children() {
        assert_ne!(PrngKey::from_seed(1).split4(), PrngKey::from_seed(2).split4());
    }

    #[test]
    fn rng_reproduces_draws() {
        let key = PrngKey::from_seed(9);
        let first: Vec<f64> = (0..5).map(|_| key.rng().gen()).collect();
        assert!(first.iter().all(|v| *v == first[0]));
    }
}
