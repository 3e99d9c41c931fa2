//! Production [`Environment`]: OS clocks, OS entropy, Tokio timers.
//!
//! Every key pair, key-id, salt, refresh token and one-time code minted by a
//! running server draws from here, so the RNG must be the OS CSPRNG. Tests use
//! [`pulse_core::SimEnv`] instead.

use std::time::Duration;

use pulse_core::env::Environment;

/// Environment backed by the operating system.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. A session server that cannot
/// draw entropy must not keep issuing secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG is available to a server issuing secrets");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        // A clock before 1970 reads as the epoch; every window then lands in
        // the past and tokens simply fail to verify.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}
