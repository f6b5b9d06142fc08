/*!
    Deterministic key material for reproducible tests

    Seeds and lock-keys derived from a fixed RNG seed, so a failing test
    sees the same keys on every run.
*/

use crate::core_crypto::SEED_LEN;
use crate::core_lockkey::{derive_lock_key, LockKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default seed for deterministic tests
pub const DEFAULT_TEST_SEED: u64 = 42;

/// Create a deterministic RNG with a custom seed
pub fn test_rng_with_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Generate a deterministic vec of random bytes with custom seed
pub fn deterministic_bytes_with_seed(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = test_rng_with_seed(seed);
    (0..len).map(|_| rng.random()).collect()
}

/// Lock-key seed for `seed`
pub fn deterministic_key_seed(seed: u64) -> [u8; SEED_LEN] {
    test_rng_with_seed(seed).random()
}

/// Lock-key derived from the default test seed
pub fn test_lock_key() -> LockKey {
    test_lock_key_with_seed(DEFAULT_TEST_SEED)
}

/// Lock-key derived from `seed`
pub fn test_lock_key_with_seed(seed: u64) -> LockKey {
    match derive_lock_key(Some(&deterministic_key_seed(seed))) {
        Ok(key) => key,
        Err(e) => panic!("Deriving a test lock-key failed: {}", e),
    }
}
