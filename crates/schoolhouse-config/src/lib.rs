//! # Schoolhouse Config
//!
//! Configuration types loaded from environment variables:
//!
//! - [`email`]: SMTP delivery settings for account notifications
//! - [`mail_queue`]: capacity and retry policy of the confirmation mail queue
//!
//! # Example
//!
//! ```ignore
//! use schoolhouse_config::{EmailConfig, MailQueueConfig};
//!
//! let email_config = EmailConfig::from_env();
//! let queue_config = MailQueueConfig::from_env();
//! ```

pub mod email;
pub mod mail_queue;

// Re-export commonly used types at crate root
pub use email::EmailConfig;
pub use mail_queue::MailQueueConfig;

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
