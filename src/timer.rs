//! Elapsed-time measurement, busy-wait delays and the system context.

use crate::rand::{EntropySource, FastRng};

/// Free-running microsecond counter provided by the platform (RTC-backed
/// on real hardware). The absolute value is meaningless; only differences
/// are used, so wrap-around is tolerated.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

impl<C: Clock> Clock for &C {
    fn now_micros(&self) -> u64 {
        (**self).now_micros()
    }
}

/// Measures time elapsed since a fixed starting point, in particular
/// since the header of the current command arrived.
pub struct CommandTimer {
    start_micros: u64,
}

impl CommandTimer {
    pub fn start<C: Clock>(clock: &C) -> Self {
        Self {
            start_micros: clock.now_micros(),
        }
    }

    pub fn elapsed_micros<C: Clock>(&self, clock: &C) -> u64 {
        clock.now_micros().wrapping_sub(self.start_micros)
    }

    /// Busy-waits until `deadline_micros` have elapsed since the timer
    /// started. Returns immediately when the deadline has already passed.
    pub fn wait_until_elapsed_micros<C: Clock>(&self, clock: &C, deadline_micros: u64) {
        while self.elapsed_micros(clock) < deadline_micros {}
    }
}

const JITTER_MIN_MICROS: u32 = 250;
const JITTER_MAX_MICROS: u32 = 750;

/// Platform state threaded explicitly through the handlers: the monotonic
/// clock and the process-wide fast PRNG.
pub struct SystemCtx<C: Clock> {
    pub clock: C,
    pub rng: FastRng,
}

impl<C: Clock> SystemCtx<C> {
    /// Seeds the fast PRNG from hardware entropy. Entropy is consumed
    /// only here, at boot.
    pub fn new<E: EntropySource>(clock: C, entropy: &mut E) -> Self {
        Self {
            clock,
            rng: FastRng::seeded(entropy),
        }
    }

    /// Busy-waits for the given number of microseconds.
    pub fn delay_micros(&self, micros: u64) {
        let timer = CommandTimer::start(&self.clock);
        timer.wait_until_elapsed_micros(&self.clock, micros);
    }

    /// Randomized micro-delay, 0.5 ms on average. Decorrelates the timing
    /// of the cryptographic steps that follow it.
    pub fn jitter_delay(&mut self) {
        let micros = self.rng.range(JITTER_MIN_MICROS, JITTER_MAX_MICROS);
        self.delay_micros(u64::from(micros));
    }
}
