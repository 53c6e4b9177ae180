//! Random Replacement Policy.
//!
//! Evicts a uniformly chosen block from the set. Uses an xorshift generator
//! seeded at construction so runs are deterministic and reproducible.

use super::ReplacementPolicy;

/// Random Policy state.
#[derive(Debug)]
pub struct RandomPolicy {
    /// Number of ways in the cache.
    ways: usize,
    /// Internal state for the pseudo-random number generator.
    state: u64,
}

impl RandomPolicy {
    /// Creates a new Random policy instance.
    ///
    /// # Arguments
    ///
    /// * `sets` - The number of sets (unused in this policy but required by interface).
    /// * `ways` - The associativity (number of ways) of the cache.
    pub fn new(_sets: usize, ways: usize) -> Self {
        Self {
            ways,
            state: 123456789,
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    /// Access patterns do not affect random replacement, so this is a no-op.
    fn update(&mut self, _set: usize, _way: usize) {}

    /// Generates a pseudo-random number and maps it to a valid way index.
    fn get_victim(&mut self, _set: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x as usize) % self.ways
    }
}
