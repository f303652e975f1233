//! Confirmation mail queue configuration.
//!
//! Deliveries are retried with exponential backoff: the delay before retry
//! `n` is `base_retry_delay_ms * 2^(n-1)`, capped at `max_retry_delay_ms`.
//!
//! # Environment Variables
//!
//! - `MAIL_QUEUE_CAPACITY`: pending jobs buffered before new ones are dropped (default: 256)
//! - `MAIL_MAX_ATTEMPTS`: delivery attempts per job, including the first (default: 5)
//! - `MAIL_BASE_RETRY_DELAY_MS`: first retry delay (default: 500)
//! - `MAIL_MAX_RETRY_DELAY_MS`: upper bound on any retry delay (default: 30000)

use std::time::Duration;

use crate::env_parse;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailQueueConfig {
    pub capacity: usize,
    pub max_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for MailQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_attempts: 5,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl MailQueueConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: env_parse("MAIL_QUEUE_CAPACITY", defaults.capacity).max(1),
            max_attempts: env_parse("MAIL_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            base_retry_delay_ms: env_parse("MAIL_BASE_RETRY_DELAY_MS", defaults.base_retry_delay_ms),
            max_retry_delay_ms: env_parse("MAIL_MAX_RETRY_DELAY_MS", defaults.max_retry_delay_ms),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .base_retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_retry_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MailQueueConfig::default();
        assert_eq!(config.capacity, 256);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = MailQueueConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
        assert_eq!(config.retry_delay(2), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = MailQueueConfig {
            max_retry_delay_ms: 1500,
            ..MailQueueConfig::default()
        };
        assert_eq!(config.retry_delay(3), Duration::from_millis(1500));
        assert_eq!(config.retry_delay(60), Duration::from_millis(1500));
    }
}
