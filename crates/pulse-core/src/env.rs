//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). Enables
//! deterministic tests with a manually advanced clock and seeded RNG, and
//! production use with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `wall_clock_secs()` never goes backwards within one process
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Sleeps for the specified duration.
    ///
    /// Only used at the I/O boundary (retry backoff), never by protocol logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall-clock time in seconds since the Unix epoch.
    ///
    /// Time windows, token expiry and record timestamps are all expressed in
    /// this clock, so client and server must roughly agree on it.
    fn wall_clock_secs(&self) -> u64;

    /// Generates a random `u64`.
    ///
    /// This is a convenience method for common use cases like generating
    /// record IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random fixed-size array (salts, nonces, key seeds).
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
