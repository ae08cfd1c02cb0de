use rand::{Rng as _, RngCore, SeedableRng, rngs::StdRng};
use serde::Serialize;

/// Seedable random number generator.
///
/// Every random draw of an experiment (flush touches, attack sequences, decoy
/// choice) goes through an instance of this type, so a run is reproducible
/// from its seed alone.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Rng {
    seed: u64,
    #[serde(skip_serializing)]
    rng: StdRng,
}

impl Rng {
    /// Creates a new RNG from a seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a new RNG from a fresh OS-provided seed.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random())
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derives an independent generator for a sub-component.
    ///
    /// The child seed is drawn from this generator, so the derivation itself is
    /// deterministic.
    pub fn fork(&mut self) -> Self {
        Self::from_seed(self.rng.next_u64())
    }

    /// Uniform draw from `0..=max`.
    pub fn up_to(&mut self, max: usize) -> usize {
        self.rng.random_range(0..=max)
    }

    /// Uniform draw from `0..len`. `len` must be non-zero.
    pub fn below(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    /// Fair coin.
    pub fn coin(&mut self) -> bool {
        self.rng.random_bool(0.5)
    }
}

impl RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

impl Clone for Rng {
    fn clone(&self) -> Self {
        Self::from_seed(self.seed)
    }
}
