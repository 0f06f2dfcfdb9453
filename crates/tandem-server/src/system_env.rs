//! Production environment using system time and OS entropy.

use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use rand::{RngCore, SeedableRng, rngs::StdRng};
use tandem_core::env::Environment;

/// Clock-seeded generator used only when the OS refuses entropy.
static FALLBACK: OnceLock<Mutex<StdRng>> = OnceLock::new();

/// Production environment.
///
/// - `std::time::Instant::now()` for time
/// - `tokio::time::sleep()` for async sleeping
/// - `getrandom` for participant id entropy, with a clock-seeded `StdRng`
///   if the OS has none to give
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(err) = getrandom::fill(buffer) {
            // Ids only need to be unique, not secret. The driver also
            // rejects collisions with open connections.
            tracing::error!(%err, "getrandom failed, falling back to clock-seeded rng");
            fallback_fill(buffer);
        }
    }
}

fn fallback_fill(buffer: &mut [u8]) {
    let rng = FALLBACK.get_or_init(|| {
        #[allow(clippy::cast_possible_truncation)]
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0x9e37_79b9_7f4a_7c15, |elapsed| elapsed.as_nanos() as u64);
        Mutex::new(StdRng::seed_from_u64(seed))
    });
    rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1);
    }

    #[test]
    fn fallback_never_repeats_itself() {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        fallback_fill(&mut first);
        fallback_fill(&mut second);
        assert_ne!(first, second);
    }

    #[test]
    fn participant_ids_differ() {
        let env = SystemEnv::new();
        assert_ne!(env.random_u64(), env.random_u64());
    }

    #[tokio::test]
    async fn sleep_waits() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(50)).await;

        assert!(env.now() - start >= Duration::from_millis(50));
    }
}
