//! Randomness: slow hardware entropy for seeding, a fast xorshift PRNG
//! for timing jitter and decoy key material.

use rand::RngCore;

/// On-device true random number generator. Slow; drawn once at boot to
/// seed the fast PRNG and not used on command hot paths.
pub trait EntropySource {
    fn random_u32(&mut self) -> u32;
}

/// xorshift32 generator. One instance lives in the system context and
/// advances on every call.
pub struct FastRng {
    state: u32,
}

impl FastRng {
    /// Seeds from hardware entropy. xorshift state must be nonzero.
    pub fn seeded<E: EntropySource>(entropy: &mut E) -> Self {
        Self::from_seed(entropy.random_u32())
    }

    pub fn from_seed(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    fn step(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn random_u32(&mut self) -> u32 {
        self.step()
    }

    /// Random integer in `[min, max)`. The multiply-shift mapping carries
    /// a slight bias, acceptable for jitter intervals.
    pub fn range(&mut self, min: u32, max: u32) -> u32 {
        min + ((u64::from(max - min) * u64::from(self.step())) >> 32) as u32
    }

    /// Fills `buf` with PRNG output, word-sized chunks then a partial tail.
    pub fn fill(&mut self, buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.step().to_le_bytes());
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            let word = self.step().to_le_bytes();
            tail.copy_from_slice(&word[..tail.len()]);
        }
    }
}

impl RngCore for FastRng {
    fn next_u32(&mut self) -> u32 {
        self.step()
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(self.step()) << 32) | u64::from(self.step())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.fill(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill(dest);
        Ok(())
    }
}
