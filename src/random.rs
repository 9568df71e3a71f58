//! Cryptographically secure randomness for salts and tokens.

use rand::{rngs::OsRng, RngCore};

use crate::Result;

pub trait SecureRandom: Send + Sync {
    /// Fill `dest` entirely with random bytes.
    ///
    /// # Errors
    /// Returns an error if the entropy source is unavailable.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;
}

/// Operating system entropy. The only source production code should use.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(dest)?;
        Ok(())
    }
}

/// Create `len` random bytes from `random`.
///
/// # Errors
/// Returns an error if the entropy source fails.
pub fn random_bytes(random: &dyn SecureRandom, len: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    random.fill(&mut bytes)?;
    Ok(bytes)
}
