//! Manually stepped environment for the in-memory network.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::env::Environment;

#[derive(Debug)]
struct StepState {
    now: Instant,
    rng: ChaCha8Rng,
}

/// Deterministic environment: a manually advanced clock and a seeded RNG.
///
/// Clones share the same clock and RNG, so the server driver and every
/// client on a [`SimNetwork`](crate::SimNetwork) observe one timeline.
/// Needs no async runtime, unlike [`SimEnv`](crate::SimEnv).
#[derive(Debug, Clone)]
pub struct StepEnv {
    state: Arc<Mutex<StepState>>,
}

impl StepEnv {
    /// Create an environment whose RNG is seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        let state = StepState { now: Instant::now(), rng: ChaCha8Rng::seed_from_u64(seed) };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.lock().now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StepState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for StepEnv {
    fn now(&self) -> Instant {
        self.lock().now
    }

    /// Advances virtual time and completes immediately.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}
