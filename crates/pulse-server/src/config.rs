//! Tunables for every server component.

use std::{fmt, time::Duration};

use crate::{cache::MAX_TTL_SECS, error::ServerError};

/// Bypass tokens never outlive this, whatever the configuration says.
pub const MAX_BYPASS_TTL_SECS: u64 = 60;

/// Retry policy for transient storage failures at the I/O boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(50) }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct PulseConfig {
    /// Integrity window length
    pub window_interval_secs: u64,
    /// Hot-cache TTL for session secrets
    pub key_cache_ttl_secs: u64,
    /// Deadline for one durable-store call
    pub durable_timeout: Duration,
    /// Retry policy for transient durable-store failures
    pub retry: RetryPolicy,
    /// Reject a second presentation of the same integrity salt
    pub replay_protection: bool,
    /// Bind integrity tokens to method, path and body
    pub bind_context: bool,
    /// Session token lifetime; also the idle age after which key records are purged
    pub session_lifetime_secs: u64,
    /// Base access token lifetime
    pub access_token_lifetime_secs: u64,
    /// Sudo access token lifetime
    pub sudo_token_lifetime_secs: u64,
    /// Bypass token lifetime, clamped to [`MAX_BYPASS_TTL_SECS`]
    pub bypass_ttl_secs: u64,
    /// Email code lifetime
    pub otp_ttl_secs: u64,
    /// Wrong email codes tolerated before the request is burned
    pub otp_max_attempts: u32,
    /// Passkey challenge lifetime
    pub challenge_ttl_secs: u64,
    /// Sign-in attempts allowed per email per window
    pub signin_attempt_limit: u32,
    /// Sign-in rate-limit window
    pub signin_window_secs: u64,
    /// How often the background sweeper runs
    pub sweep_interval: Duration,
    /// Entries evicted per lock acquisition while sweeping
    pub sweep_batch: usize,
    /// Pepper for key-id storage ids and refresh-token hashes
    pub pepper: [u8; 32],
    /// Signing key for session and access tokens
    pub token_secret: [u8; 32],
    /// Expected WebAuthn origin
    pub origin: String,
}

impl PulseConfig {
    /// Defaults with the two server secrets filled in.
    pub fn with_secrets(pepper: [u8; 32], token_secret: [u8; 32]) -> Self {
        Self { pepper, token_secret, ..Self::default() }
    }

    /// Bypass TTL after clamping.
    pub fn bypass_ttl(&self) -> u64 {
        self.bypass_ttl_secs.min(MAX_BYPASS_TTL_SECS)
    }

    /// Reject configurations no component can run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |msg: &str| Err(ServerError::Config(msg.to_string()));

        if self.window_interval_secs == 0 {
            return invalid("window interval must be non-zero");
        }
        if self.key_cache_ttl_secs == 0 || self.key_cache_ttl_secs > MAX_TTL_SECS {
            return invalid("key cache TTL must be between 1s and 24h");
        }
        if self.otp_ttl_secs > MAX_TTL_SECS || self.challenge_ttl_secs > MAX_TTL_SECS {
            return invalid("step-up TTLs must not exceed 24h");
        }
        if self.durable_timeout.is_zero() {
            return invalid("durable timeout must be non-zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry policy needs at least one attempt");
        }
        if self.sweep_interval.is_zero() || self.sweep_batch == 0 {
            return invalid("sweeper interval and batch must be non-zero");
        }
        if self.otp_max_attempts == 0 || self.signin_attempt_limit == 0 {
            return invalid("attempt limits must be non-zero");
        }
        if self.pepper == [0; 32] || self.token_secret == [0; 32] {
            return invalid("server secrets must be set");
        }
        if self.pepper == self.token_secret {
            return invalid("pepper and token secret must differ");
        }

        Ok(())
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            window_interval_secs: 120,
            key_cache_ttl_secs: 3_600,
            durable_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            replay_protection: true,
            bind_context: true,
            session_lifetime_secs: 31 * 24 * 3_600,
            access_token_lifetime_secs: 15 * 60,
            sudo_token_lifetime_secs: 5 * 60,
            bypass_ttl_secs: MAX_BYPASS_TTL_SECS,
            otp_ttl_secs: 120,
            otp_max_attempts: 3,
            challenge_ttl_secs: 60,
            signin_attempt_limit: 5,
            signin_window_secs: 15 * 60,
            sweep_interval: Duration::from_secs(600),
            sweep_batch: 256,
            pepper: [0; 32],
            token_secret: [0; 32],
            origin: "http://localhost:3000".to_string(),
        }
    }
}

impl fmt::Debug for PulseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseConfig")
            .field("window_interval_secs", &self.window_interval_secs)
            .field("key_cache_ttl_secs", &self.key_cache_ttl_secs)
            .field("durable_timeout", &self.durable_timeout)
            .field("retry", &self.retry)
            .field("replay_protection", &self.replay_protection)
            .field("bind_context", &self.bind_context)
            .field("session_lifetime_secs", &self.session_lifetime_secs)
            .field("access_token_lifetime_secs", &self.access_token_lifetime_secs)
            .field("bypass_ttl_secs", &self.bypass_ttl())
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PulseConfig {
        PulseConfig::with_secrets([1; 32], [2; 32])
    }

    #[test]
    fn defaults_with_secrets_validate() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn missing_secrets_rejected() {
        assert!(PulseConfig::default().validate().is_err());
        assert!(PulseConfig::with_secrets([3; 32], [3; 32]).validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let config = PulseConfig { window_interval_secs: 0, ..valid() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cache_ttl_above_a_day_rejected() {
        let config = PulseConfig { key_cache_ttl_secs: MAX_TTL_SECS + 1, ..valid() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bypass_ttl_is_clamped() {
        let config = PulseConfig { bypass_ttl_secs: 600, ..valid() };
        assert_eq!(config.bypass_ttl(), MAX_BYPASS_TTL_SECS);
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(0), Duration::from_millis(50));
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.delay(2), Duration::from_millis(200));
    }

    #[test]
    fn debug_hides_secrets() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("pepper"));
        assert!(!rendered.contains("token_secret"));
    }
}
