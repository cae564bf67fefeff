use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Mutex;

use rand::{RngCore, SeedableRng};
use rand::rngs::StdRng;
use ring::rand::{SecureRandom, SystemRandom};

define_error!(RandomError = "cannot generate random bytes");

/// Source of key and nonce material, injected wherever randomness is consumed.
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), RandomError>;
}

pub struct SystemRandomSource {
    rng: SystemRandom,
}

impl SystemRandomSource {
    pub fn new() -> SystemRandomSource {
        SystemRandomSource { rng: SystemRandom::new() }
    }
}

impl Default for SystemRandomSource {
    fn default() -> Self {
        SystemRandomSource::new()
    }
}

impl RandomSource for SystemRandomSource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), RandomError> {
        self.rng.fill(dest).or(Err(RandomError))
    }
}

impl Debug for SystemRandomSource {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "SystemRandomSource")
    }
}

/// Reproducible byte stream for tests; never use for real key material.
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> SeededRandomSource {
        SeededRandomSource { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl RandomSource for SeededRandomSource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), RandomError> {
        let mut rng = self.rng.lock().or(Err(RandomError))?;
        rng.fill_bytes(dest);
        Ok(())
    }
}

impl Debug for SeededRandomSource {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "SeededRandomSource")
    }
}
