use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::constants::producer::SAMPLE_SEED_SALT;
use crate::types::Iteration;

pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Seed for the RNG of one sample task; depends only on its coordinates.
pub fn sample_seed(seed: u64, iteration: Iteration, index: usize) -> u64 {
    stable_hash_with(|hasher| {
        SAMPLE_SEED_SALT.hash(hasher);
        seed.hash(hasher);
        iteration.hash(hasher);
        index.hash(hasher);
    })
}

/// Seed for batch-level decisions (strategy order, row order) of one iteration.
pub fn batch_seed(seed: u64, iteration: Iteration) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        iteration.hash(hasher);
    })
}
