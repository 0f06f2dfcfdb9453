//! Environment for code running inside a turmoil simulation.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::env::Environment;

/// Turmoil-backed environment.
///
/// Time is Tokio's clock, which turmoil pauses and advances itself, so a
/// thirty second idle timeout costs no wall-clock time. Random bytes come
/// from a ChaCha8 stream; give each host its own seed to keep participant
/// ids reproducible.
///
/// Only usable from inside a turmoil host or client.
#[derive(Debug, Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Create an environment whose RNG is seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeping_advances_simulated_time() {
        let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();

        sim.client("clock", async {
            let env = SimEnv::with_seed(1);
            let start = env.now();
            env.sleep(Duration::from_secs(45)).await;
            assert!(env.now() - start >= Duration::from_secs(45));
            Ok(())
        });

        assert!(sim.run().is_ok());
    }

    #[test]
    fn same_seed_same_ids() {
        let a = SimEnv::with_seed(9);
        let b = SimEnv::with_seed(9);
        assert_eq!(a.random_u64(), b.random_u64());
    }
}
