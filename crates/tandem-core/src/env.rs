//! Clock and entropy seam.
//!
//! Nothing in the coordinator or participant state machines reads the system
//! clock or an RNG directly. Request deadlines, idle timers and participant
//! ids all go through [`Environment`], so the simulation harness can run a
//! whole session on virtual time from a single seed.
//!
//! Implementations must keep `now()` monotonic and must not share mutable
//! state with other environments. Clones of one environment share a
//! timeline.

use std::time::{Duration, Instant};

/// Time, randomness and sleeping for drivers and state machines.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current time. Never earlier than a previous call.
    fn now(&self) -> Instant;

    /// Wait for `duration`.
    ///
    /// Only drivers await this (retry backoff in the executor); state
    /// machines take deadlines from [`now`](Self::now) and are woken by ticks.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes. Seeded implementations replay the
    /// same bytes for the same seed.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, big-endian from [`random_bytes`](Self::random_bytes).
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
