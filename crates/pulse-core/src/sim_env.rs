//! Simulated environment with a manual clock and seeded RNG.
//!
//! Every clone shares the same clock and RNG, so a test can hold one handle
//! and advance time while components hold the others.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::env::Environment;

/// Deterministic [`Environment`] for tests.
///
/// `sleep` completes immediately and advances the clock by the requested
/// duration, so retry backoff costs no real time.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

struct SimState {
    /// Virtual time elapsed since construction
    elapsed: Duration,
    /// Wall clock at construction, in Unix seconds
    epoch_secs: u64,
    rng: ChaCha20Rng,
}

impl SimEnv {
    /// Create with a seed and a starting wall-clock time.
    pub fn new(seed: u64, start_secs: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                elapsed: Duration::ZERO,
                epoch_secs: start_secs,
                rng: ChaCha20Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Jump the wall clock to `secs`. Fails if that would move time backwards.
    pub fn set_wall_clock(&self, secs: u64) -> Result<(), u64> {
        let mut state = self.lock();
        let current = state.epoch_secs + state.elapsed.as_secs();
        if secs < current {
            return Err(current);
        }
        state.elapsed += Duration::from_secs(secs - current);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        let state = self.lock();
        state.epoch_secs + state.elapsed.as_secs()
    }
}
